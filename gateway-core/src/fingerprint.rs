//! Forged browser fingerprint fields shared by the adapters that need to
//! impersonate a real web client closely enough to pass vendor WAFs
//! (MiniMax, Qwen domestic, Qwen-AI, and Z.ai all need this).
//! Values are the same literal constants a recent desktop Chrome session
//! would present; vendors check shape and plausibility, not an exact
//! registered fingerprint.

use std::collections::HashMap;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Query-string fields appended to MiniMax and Qwen domestic requests,
/// impersonating the web client's device/browser telemetry.
pub fn query_fingerprint() -> Vec<(&'static str, &'static str)> {
    vec![
        ("platform", "web"),
        ("browser_name", "chrome"),
        ("browser_version", "124.0.0.0"),
        ("os_name", "windows"),
        ("os_version", "10"),
        ("device_memory", "8"),
        ("screen_width", "1920"),
        ("screen_height", "1080"),
        ("cpu_cores", "12"),
        ("language", "en-US"),
        ("timezone", "UTC"),
    ]
}

/// Z.ai/Qwen-AI's WAF-required constant header triplet: sent
/// verbatim, never derived per-request.
pub fn waf_headers() -> HashMap<&'static str, &'static str> {
    let mut h = HashMap::new();
    h.insert("bx-ua", "231!YAAAMBQ2e3y5+jYGcAZ6D3dhcWk9PvpY/OCR7hVR4EpZxYAHPSx7IeJu1lWOLhXH4ZAnwy2cTXn0ilLTcbUkqNq2bP8O91gkJGa/");
    h.insert("bx-v", "2.5.31");
    h.insert("bx-umidtoken", "T2gAbk1x0qfGjK8S0b5x4m6cRH3fVvYtQZp9Lz3dWc7nJY2gkxNvHhzqV8tD6rBsE1F");
    h
}
