//! Turning an upstream HTTP response into a byte stream for the driver.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::warn;

use crate::error::RelayError;
use crate::protocol::error_shapes::extract_error_message;

/// Accept a streaming response, or read the error body of a rejected one.
///
/// # Errors
///
/// Returns [`RelayError::Upstream`] for a non-2xx status, carrying the
/// vendor's error message.
pub async fn open_stream(
    response: reqwest::Response,
) -> Result<impl Stream<Item = Result<Bytes, RelayError>>, RelayError> {
    let status = response.status();
    if !status.is_success() {
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                warn!(status = status.as_u16(), error = %err, "failed to read upstream error body");
                Bytes::new()
            }
        };
        return Err(upstream_error(status.as_u16(), &body));
    }
    Ok(response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|err| RelayError::Transport(err.to_string()))))
}

/// Map a rejected upstream response to an error.
#[must_use]
pub fn upstream_error(status: u16, body: &[u8]) -> RelayError {
    RelayError::Upstream {
        status,
        message: extract_error_message(body),
    }
}
