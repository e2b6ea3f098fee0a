//! Per-vendor request-signing envelopes: GLM's MD5 triplet, MiniMax's
//! three-header MD5 scheme, and
//! Z.ai's two-layer HMAC-SHA-256. Each vendor's quirks live in their own
//! function; nothing here is shared structure, only shared primitives
//! (`md5_hex`, `hmac_sha256_hex`).

use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;

pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex_lower(&hasher.finalize())
}

fn hmac_sha256_hex(key: &[u8], message: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex_lower(&mac.finalize().into_bytes())
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// GLM: `X-Sign = md5(timestamp + "-" + nonce + "-" + secret)`. The
/// timestamp itself is rewritten: its last two decimal digits are replaced
/// by a checksum derived from every digit of the raw millisecond epoch
/// (sum of digits mod 100, zero-padded) before it is used both in the
/// header and inside the signed string — an undocumented quirk of the web
/// client the adapter must reproduce byte-for-byte or the vendor rejects
/// the signature.
pub struct GlmSignature {
    pub timestamp: String,
    pub nonce: String,
    pub sign: String,
}

pub fn glm_sign(now_ms: i64, secret: &str) -> GlmSignature {
    let timestamp = glm_checksum_timestamp(now_ms);
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let sign = md5_hex(&format!("{timestamp}-{nonce}-{secret}"));
    GlmSignature {
        timestamp,
        nonce,
        sign,
    }
}

fn glm_checksum_timestamp(now_ms: i64) -> String {
    let raw = now_ms.to_string();
    let digit_sum: u32 = raw.chars().filter_map(|c| c.to_digit(10)).sum();
    let checksum = digit_sum % 100;
    let mut rewritten = raw.clone();
    let len = rewritten.len();
    if len >= 2 {
        rewritten.replace_range(len - 2.., &format!("{checksum:02}"));
    }
    rewritten
}

/// MiniMax: three headers signed per request.
pub struct MiniMaxSignature {
    pub x_timestamp: String,
    pub x_signature: String,
    pub yy: String,
}

/// `jwt` is the bearer token, `body_json` the exact serialized request body,
/// `path_and_query` the request-target (`path?query`) being signed.
pub fn minimax_sign(now_ms: i64, jwt: &str, body_json: &str, path_and_query: &str) -> MiniMaxSignature {
    let timestamp_secs = (now_ms / 1000).to_string();
    let x_signature = md5_hex(&format!("{timestamp_secs}{jwt}{body_json}"));
    let unix_millis = now_ms.to_string();
    let yy = md5_hex(&format!(
        "{}_{}{}ooui",
        urlencode(path_and_query),
        body_json,
        md5_hex(&unix_millis)
    ));
    MiniMaxSignature {
        x_timestamp: timestamp_secs,
        x_signature,
        yy,
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Z.ai: two-layer HMAC-SHA-256 over a 5-minute epoch window. A
/// signature computed in one 300_000ms window is invalid in the next — the
/// adapter must sign just before sending, never ahead of time.
const ZAI_SECRET: &str = "junjie";

pub fn zai_sign(now_ms: i64, request_id: &str, user_id: &str, message_text: &str) -> String {
    let epoch = now_ms / 300_000;
    let derived_key_hex = hmac_sha256_hex(ZAI_SECRET.as_bytes(), &epoch.to_string());
    let encoded_message = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, message_text);
    let payload = format!(
        "requestId,{request_id},timestamp,{now_ms},user_id,{user_id}|{encoded_message}|{now_ms}"
    );
    hmac_sha256_hex(derived_key_hex.as_bytes(), &payload)
}

/// Extracts `user_id` (Z.ai) from an unverified JWT payload — the gateway
/// never validates vendor JWTs, only reads claims already trusted by virtue
/// of being supplied by the account owner.
pub fn jwt_claim(jwt: &str, claim: &str) -> Option<String> {
    let mut parts = jwt.split('.');
    let _header = parts.next()?;
    let payload_b64 = parts.next()?;
    let payload_bytes = base64::Engine::decode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        payload_b64,
    )
    .ok()?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes).ok()?;
    payload
        .get(claim)
        .and_then(|v| v.as_str().map(|s| s.to_string()).or_else(|| v.as_i64().map(|n| n.to_string())))
}

/// MiniMax: `realUserID` may live under `user.id`, `id`, or `sub`.
pub fn jwt_user_id(jwt: &str) -> Option<String> {
    jwt_claim(jwt, "sub")
        .or_else(|| jwt_claim(jwt, "id"))
        .or_else(|| jwt_nested_user_id(jwt))
}

fn jwt_nested_user_id(jwt: &str) -> Option<String> {
    let mut parts = jwt.split('.');
    let _header = parts.next()?;
    let payload_b64 = parts.next()?;
    let payload_bytes = base64::Engine::decode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        payload_b64,
    )
    .ok()?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes).ok()?;
    payload
        .get("user")
        .and_then(|u| u.get("id"))
        .and_then(|v| v.as_str().map(|s| s.to_string()))
}

/// Kimi: recognizes a JWT vs. a raw refresh token by shape —
/// `eyJ` prefix and three dot-separated segments, payload
/// `app_id == "kimi" && typ == "access"`.
pub fn looks_like_kimi_jwt(token: &str) -> bool {
    if !token.starts_with("eyJ") || token.split('.').count() != 3 {
        return false;
    }
    jwt_claim(token, "app_id").as_deref() == Some("kimi") && jwt_claim(token, "typ").as_deref() == Some("access")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_matches_known_vector() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn glm_checksum_rewrites_last_two_digits() {
        let ts = glm_checksum_timestamp(1_700_000_000_123);
        assert_eq!(ts.len(), "1700000000123".len());
        assert_ne!(ts, "1700000000123");
    }

    #[test]
    fn zai_sign_changes_across_epoch_boundaries() {
        let a = zai_sign(0, "r1", "u1", "hi");
        let b = zai_sign(300_000, "r1", "u1", "hi");
        assert_ne!(a, b);
        let c = zai_sign(1, "r1", "u1", "hi");
        assert_eq!(zai_sign(0, "r1", "u1", "hi"), c);
    }

    #[test]
    fn jwt_claim_reads_payload_field() {
        // header {"alg":"none"} . payload {"app_id":"kimi","typ":"access"} . sig
        let jwt = "eyJhbGciOiJub25lIn0.eyJhcHBfaWQiOiJraW1pIiwidHlwIjoiYWNjZXNzIn0.sig";
        assert!(looks_like_kimi_jwt(jwt));
        assert_eq!(jwt_claim(jwt, "app_id").as_deref(), Some("kimi"));
    }

    #[test]
    fn non_jwt_refresh_token_is_not_mistaken_for_a_jwt() {
        assert!(!looks_like_kimi_jwt("refresh_abcdef123456"));
    }
}
