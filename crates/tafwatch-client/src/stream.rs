//! Push-stream transport over `tokio-tungstenite`.
//!
//! Each text frame carries one or more events as newline-delimited JSON.

use futures::{Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("push stream error: {0}")]
    Protocol(String),
}

pub async fn connect(url: &str) -> Result<WsStream, StreamError> {
    let (ws, response) = connect_async(url).await.map_err(|e| StreamError::Connect {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    debug!(url, status = %response.status(), "push stream connected");
    Ok(ws)
}

/// Individual event messages in one frame, blank lines skipped.
pub fn split_frame(frame: &str) -> impl Iterator<Item = &str> {
    frame.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Read until the next frame that carries data.
///
/// Returns `Ok(None)` once the peer closes the stream. Control frames are
/// consumed here; binary frames are accepted if they are UTF-8.
pub async fn next_messages<S>(ws: &mut S) -> Result<Option<Vec<String>>, StreamError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = ws.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(None),
            Err(e) => return Err(StreamError::Protocol(e.to_string())),
        };
        let text = match &frame {
            Message::Text(text) => text.as_str(),
            Message::Binary(data) => match std::str::from_utf8(data) {
                Ok(text) => text,
                Err(e) => {
                    warn!(len = data.len(), error = %e, "dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Message::Close(reason) => {
                debug!(?reason, "push stream closed by peer");
                return Ok(None);
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };
        let messages: Vec<String> = split_frame(text).map(str::to_owned).collect();
        if !messages.is_empty() {
            return Ok(Some(messages));
        }
    }
    Ok(None)
}
