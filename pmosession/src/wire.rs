//! JSON documents pushed by remote session authorities.
//!
//! ```json
//! {"format": "modern", "snapshot": {...}, "exclusions": {"timeline_excluded": true}}
//! {"format": "legacy", "changes": [{"kind": "repeat_mode", "value": 2}]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SessionError;
use crate::legacy::LegacyChange;
use crate::snapshot::{ExclusionFlags, PlaybackSnapshot};

const FORMATS: [&str; 2] = ["modern", "legacy"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum AuthorityUpdate {
    /// Full or partial snapshot. `snapshot.capabilities` carries the
    /// explicit command set of the session.
    Modern {
        snapshot: PlaybackSnapshot,
        #[serde(default)]
        exclusions: ExclusionFlags,
    },
    /// Partial updates of a legacy session, aggregated before merging.
    Legacy { changes: Vec<LegacyChange> },
}

impl AuthorityUpdate {
    pub fn format(&self) -> &'static str {
        match self {
            AuthorityUpdate::Modern { .. } => "modern",
            AuthorityUpdate::Legacy { .. } => "legacy",
        }
    }
}

pub fn decode_update(json: &str) -> Result<AuthorityUpdate, SessionError> {
    let value: Value = serde_json::from_str(json).map_err(SessionError::wire_decode)?;
    match value.get("format").and_then(Value::as_str) {
        Some(format) if FORMATS.contains(&format) => {}
        Some(format) => return Err(SessionError::UnsupportedFormat(format.to_string())),
        None => return Err(SessionError::wire_decode("missing \"format\" field")),
    }
    serde_json::from_value(value).map_err(SessionError::wire_decode)
}

pub fn encode_update(update: &AuthorityUpdate) -> Result<String, SessionError> {
    serde_json::to_string(update).map_err(|e| SessionError::WireEncode(e.to_string()))
}
