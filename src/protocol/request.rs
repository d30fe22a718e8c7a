use crate::error::BrokerError;
use serde::{Deserialize, Serialize};

/// Wire protocol request format:
///
/// One JSON object per frame, tagged by `type`:
/// ```text
/// {"type":"append","value":[104,105]}
/// {"type":"retrieve","offset":3}
/// {"type":"ping"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Append one record; answered with the offset it was assigned.
    Append { value: Vec<u8> },

    /// Read the record at an absolute offset.
    Retrieve { offset: u64 },

    /// Connection health check.
    Ping,
}

impl Request {
    pub fn encode(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self).map_err(|e| BrokerError::EncodeError(e.to_string()))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, BrokerError> {
        serde_json::from_slice(buf).map_err(|e| BrokerError::DecodeError(e.to_string()))
    }
}
