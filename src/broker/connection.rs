use crate::error::BrokerError;
use crate::log::Segment;
use crate::protocol::{frame, request::Request, response::{Response, BAD_REQUEST}};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Handle a single client connection.
///
/// Connection lifecycle:
/// 1. Loop: read frame → decode request → handle → encode response → write frame
/// 2. On EOF, return Ok
/// 3. On frame or I/O error, answer with an error response if possible and close
///
/// Undecodable requests get a 400 and the connection stays open.
///
/// Storage calls block on file I/O and locks, so each request runs on the
/// blocking pool instead of the async worker threads.
pub async fn handle_connection<S>(mut stream: S, segment: Arc<Segment>) -> Result<(), BrokerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame_bytes = match frame::read_frame(&mut stream).await {
            Ok(bytes) => bytes,
            Err(BrokerError::ConnectionClosed) => return Ok(()),
            Err(e) => {
                let error_response = Response::Error {
                    code: BAD_REQUEST,
                    message: format!("frame error: {}", e),
                };
                if let Ok(bytes) = error_response.encode() {
                    let _ = frame::write_frame(&mut stream, &bytes).await;
                }
                return Err(e);
            }
        };

        let response = match Request::decode(&frame_bytes) {
            Ok(request) => {
                let segment = Arc::clone(&segment);
                tokio::task::spawn_blocking(move || Response::handle(request, &segment))
                    .await
                    .map_err(|e| BrokerError::TaskFailed(e.to_string()))?
            }
            Err(e) => Response::Error {
                code: BAD_REQUEST,
                message: e.to_string(),
            },
        };

        let response_bytes = response.encode()?;
        frame::write_frame(&mut stream, &response_bytes).await?;
    }
}
