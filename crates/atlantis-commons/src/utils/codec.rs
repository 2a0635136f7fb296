use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use crate::utils::error::SupervisorError;

/// Opaque codec for dependency payloads. The controller hands the supervisor
/// encoded blobs; this seam turns them back into the JSON the app config
/// needs. Key management is the controller's concern, not ours.
pub fn encode_payload(value: &Value) -> Result<String, SupervisorError> {
    let raw = serde_json::to_vec(value)?;
    Ok(STANDARD.encode(raw))
}

pub fn decode_payload(data: &str) -> Result<Value, SupervisorError> {
    if data.is_empty() {
        return Ok(Value::Null);
    }
    let raw = STANDARD
        .decode(data)
        .map_err(|err| SupervisorError::ManifestInvalid(format!("bad dependency payload: {err}")))?;
    serde_json::from_slice(&raw)
        .map_err(|err| SupervisorError::ManifestInvalid(format!("bad dependency payload: {err}")))
}
