//! Adapter-layer error taxonomy. These are explicit result values, not
//! exceptions: the forwarder converts every variant into the OpenAI error
//! envelope before it reaches the HTTP layer, and never lets one escape.

use serde::Serialize;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Vendor returned 401 or its sentinel error code. Triggers token-cache
    /// eviction; surfaced as HTTP 401.
    AuthExpired,
    /// DNS, TCP, TLS, premature close, decode failure. Retryable.
    Transport,
    /// HTTP 429 or 5xx. Retryable.
    VendorBusy,
    /// 4xx other than 429. Terminal.
    VendorReject,
    /// The adapter's frame parser could not make progress. Terminal.
    ProtocolDrift,
    /// No eligible account, daily-limit exhausted, or provider disabled.
    /// Terminal, surfaced as HTTP 503.
    InternalPolicy,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct AdapterError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status observed from the vendor, when applicable.
    pub status: Option<u16>,
}

impl AdapterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthExpired, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn vendor_busy(message: impl Into<String>, status: u16) -> Self {
        Self::new(ErrorKind::VendorBusy, message).with_status(status)
    }

    pub fn vendor_reject(message: impl Into<String>, status: u16) -> Self {
        Self::new(ErrorKind::VendorReject, message).with_status(status)
    }

    pub fn protocol_drift(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolDrift, message)
    }

    pub fn internal_policy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalPolicy, message)
    }

    /// Whether the forwarder's retry loop should attempt this request again
    /// on the same account: transport errors and 5xx/429 retry; other
    /// 4xx are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport | ErrorKind::VendorBusy)
    }

    /// HTTP status this error should surface to the caller when it escapes
    /// the forwarder's retry loop.
    pub fn http_status(&self) -> u16 {
        match self.kind {
            ErrorKind::AuthExpired => 401,
            ErrorKind::InternalPolicy => 503,
            ErrorKind::VendorReject | ErrorKind::ProtocolDrift => self.status.unwrap_or(400),
            ErrorKind::VendorBusy => self.status.unwrap_or(502),
            ErrorKind::Transport => 502,
        }
    }

    /// Renders the OpenAI-shaped `{error:{message,type,code}}` envelope.
    pub fn to_openai_error(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.message,
                "type": format!("{:?}", self.kind).to_lowercase(),
                "code": self.code(),
            }
        })
    }

    fn code(&self) -> &'static str {
        match self.kind {
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::Transport => "transport_error",
            ErrorKind::VendorBusy => "vendor_busy",
            ErrorKind::VendorReject => "vendor_reject",
            ErrorKind::ProtocolDrift => "protocol_drift",
            ErrorKind::InternalPolicy => "no_account",
        }
    }
}

/// Pulls a human-readable message out of a vendor error body, trying each
/// vendor's known field names in order.
pub fn extract_vendor_message(body: &serde_json::Value) -> Option<String> {
    let candidates = [
        "data.msg",
        "data.message",
        "data.error.message",
        "statusInfo.message",
        "base_resp.status_msg",
    ];
    for path in candidates {
        let mut cur = body;
        let mut ok = true;
        for segment in path.split('.') {
            match cur.get(segment) {
                Some(v) => cur = v,
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            if let Some(s) = cur.as_str() {
                return Some(s.to_string());
            }
        }
    }
    None
}
