//! WebSocket relay transport.
//!
//! DESIGN
//! ======
//! One socket per subscription. After the handshake the client sends
//! `{"type": "subscribe", "session_id": …}`; the relay answers with
//! `{"type": "subscribed"}` and then forwards change notifications as JSON
//! text frames. A background pump task owns the socket and feeds the
//! subscription channel until either side goes away.
//!
//! ERROR HANDLING
//! ==============
//! Socket errors and close frames end the subscription with a
//! [`TransportMessage::Closed`]; reconnecting is the supervisor's job.
//! Text that is not JSON is forwarded as a string payload so the engine can
//! log and drop it like any other malformed event.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{EventTransport, Subscription, TransportError, TransportMessage};

const SUBSCRIPTION_BUFFER: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Realtime relay reached over `ws://` or `wss://`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    /// Accepts `ws(s)://` URLs directly and maps `http(s)://` to the
    /// matching websocket scheme.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] for any other scheme.
    pub fn new(url: &str) -> Result<Self, TransportError> {
        Ok(Self { url: realtime_url(url)? })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl EventTransport for WsTransport {
    async fn subscribe(&self, session_id: Uuid) -> Result<Subscription, TransportError> {
        let (mut stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(Box::new(e)))?;

        let request = json!({"type": "subscribe", "session_id": session_id});
        stream
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| TransportError::Send(Box::new(e)))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(pump(stream, tx, session_id));
        debug!(%session_id, url = %self.url, "realtime subscription requested");
        Ok(Subscription::new(rx))
    }
}

async fn pump(mut stream: WsStream, tx: mpsc::Sender<TransportMessage>, session_id: Uuid) {
    loop {
        let next = tokio::select! {
            () = tx.closed() => {
                debug!(%session_id, "subscription dropped; closing realtime socket");
                if let Err(e) = stream.close(None).await {
                    debug!(%session_id, error = %e, "realtime socket close failed");
                }
                return;
            }
            next = stream.next() => next,
        };

        let message = match next {
            None => TransportMessage::Closed { reason: "stream ended".into() },
            Some(Err(e)) => TransportMessage::Closed { reason: e.to_string() },
            Some(Ok(Message::Close(frame))) => TransportMessage::Closed { reason: close_reason(frame.as_ref()) },
            Some(Ok(Message::Text(text))) => {
                let Some(message) = classify_text(text.as_str()) else {
                    continue;
                };
                message
            }
            Some(Ok(Message::Binary(bytes))) => {
                let Ok(text) = std::str::from_utf8(&bytes) else {
                    warn!(%session_id, len = bytes.len(), "non-utf8 binary frame from relay; dropping");
                    continue;
                };
                let Some(message) = classify_text(text) else {
                    continue;
                };
                message
            }
            Some(Ok(_)) => continue,
        };

        let terminal = matches!(message, TransportMessage::Closed { .. });
        if tx.send(message).await.is_err() || terminal {
            return;
        }
    }
}

/// Map one relay text frame to a transport message. Heartbeats map to
/// `None`.
pub(crate) fn classify_text(text: &str) -> Option<TransportMessage> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Some(TransportMessage::Event(Value::String(text.to_owned())));
    };

    match value.get("type").and_then(Value::as_str) {
        Some("subscribed") => Some(TransportMessage::Subscribed),
        Some("heartbeat") => None,
        Some("subscription_error") => {
            let reason = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("subscription error")
                .to_owned();
            Some(TransportMessage::Closed { reason })
        }
        _ => Some(TransportMessage::Event(value)),
    }
}

fn close_reason(frame: Option<&CloseFrame>) -> String {
    match frame {
        Some(frame) => format!("closed by relay ({}): {}", u16::from(frame.code), frame.reason.as_str()),
        None => "closed by relay".to_owned(),
    }
}

fn realtime_url(base_url: &str) -> Result<String, TransportError> {
    let trimmed = base_url.trim().trim_end_matches('/');

    if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        return Ok(trimmed.to_owned());
    }
    if let Some(rest) = trimmed.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    if let Some(rest) = trimmed.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }

    Err(TransportError::InvalidUrl(base_url.to_owned()))
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
