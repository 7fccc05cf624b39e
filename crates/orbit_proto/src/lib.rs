//! Wire types shared by the execution and coordination nodes: the response
//! envelope, the execute request, and the three identity formats.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on stored report bodies, matching the VM's string bound.
pub const REPORT_MAX: usize = 1024;

/// Every endpoint answers HTTP 200 with this envelope; `ok` carries the
/// domain outcome and infrastructure trouble collapses to a generic error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// Body of the execution node's run endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(rename = "vmId")]
    pub vm_id: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub opcodes: Vec<serde_json::Value>,
}

/// Mint a fresh run identity: lowercase hyphenated UUID.
pub fn mint_vm_id() -> String {
    Uuid::new_v4().to_string()
}

/// Run identities and access keys share the same shape: exactly the
/// lowercase hyphenated UUID form, nothing looser.
pub fn is_vm_id(s: &str) -> bool {
    matches!(Uuid::try_parse(s), Ok(u) if u.hyphenated().to_string() == s)
}

pub fn is_access_key(s: &str) -> bool {
    is_vm_id(s)
}

/// The inter-node key is derived from the shared secret, never stored.
pub fn derive_api_key(secret: &str) -> String {
    format!("API_{secret}_KEY")
}

/// `API_` + 16 chars of the base32 uppercase alphabet + `_KEY`.
pub fn is_api_key(s: &str) -> bool {
    let body = match s.strip_prefix("API_").and_then(|r| r.strip_suffix("_KEY")) {
        Some(body) => body,
        None => return false,
    };
    body.len() == 16
        && body
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}
