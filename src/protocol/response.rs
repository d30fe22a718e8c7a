use crate::error::{BrokerError, LogError};
use crate::log::{Record, Segment};
use crate::protocol::request::Request;
use serde::{Deserialize, Serialize};

/// Request could not be decoded.
pub const BAD_REQUEST: u16 = 400;
/// Offset, entry or position does not exist.
pub const NOT_FOUND: u16 = 404;
/// Storage fault; the request may or may not have taken effect.
pub const INTERNAL_ERROR: u16 = 500;
/// The segment's index is full; nothing was written.
pub const LOG_FULL: u16 = 507;

/// Wire protocol response format:
///
/// One JSON object per frame, tagged by `type`:
/// ```text
/// {"type":"appended","offset":3}
/// {"type":"retrieved","record":{"value":[104,105],"offset":3}}
/// {"type":"error","code":404,"message":"offset not found: 9"}
/// {"type":"pong"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Offset assigned to an appended record.
    Appended { offset: u64 },

    /// Record found at the requested offset.
    Retrieved { record: Record },

    /// Error response for any failed request.
    Error { code: u16, message: String },

    /// Simple health check response.
    Pong,
}

impl Response {
    /// Handle a request against a segment.
    ///
    /// Blocking: storage calls do file I/O. The connection handler runs this
    /// on the blocking pool.
    ///
    /// Error handling:
    /// - not found family → 404
    /// - index full → 507
    /// - everything else → 500
    pub fn handle(req: Request, segment: &Segment) -> Self {
        match req {
            Request::Append { value } => match segment.append(&value) {
                Ok(offset) => Response::Appended { offset },
                Err(e) => Response::from_error(&e),
            },
            Request::Retrieve { offset } => match segment.read(offset) {
                Ok(record) => Response::Retrieved { record },
                Err(e) => Response::from_error(&e),
            },
            Request::Ping => Response::Pong,
        }
    }

    /// Map a storage error to an error response, keeping "not found" and
    /// "full" apart from internal faults.
    pub fn from_error(err: &LogError) -> Self {
        let code = if err.is_not_found() {
            NOT_FOUND
        } else if err.is_full() {
            LOG_FULL
        } else {
            tracing::warn!(error = %err, "storage fault while handling request");
            INTERNAL_ERROR
        };

        Response::Error {
            code,
            message: err.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self).map_err(|e| BrokerError::EncodeError(e.to_string()))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, BrokerError> {
        serde_json::from_slice(buf).map_err(|e| BrokerError::DecodeError(e.to_string()))
    }
}
