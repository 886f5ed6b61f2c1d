//! Push-notification transport contract.
//!
//! DESIGN
//! ======
//! A subscription is a channel of [`TransportMessage`]s for one session.
//! The transport reports the acknowledgement, raw event payloads, and the
//! end of the stream; it never interprets payloads. Dropping the
//! [`Subscription`] closes the channel, which the producing side observes
//! and uses to tear down its connection.

pub mod ws;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid realtime URL: {0}")]
    InvalidUrl(String),
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket send failed: {0}")]
    Send(Box<tokio_tungstenite::tungstenite::Error>),
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "E_TRANSPORT_URL",
            Self::Connect(_) => "E_TRANSPORT_CONNECT",
            Self::Send(_) => "E_TRANSPORT_SEND",
        }
    }

    fn retryable(&self) -> bool {
        !matches!(self, Self::InvalidUrl(_))
    }
}

/// What a live subscription can report.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    /// The transport confirmed the subscription.
    Subscribed,
    /// A raw change notification, parsed by the engine.
    Event(serde_json::Value),
    /// The subscription ended; no further messages follow.
    Closed { reason: String },
}

/// Receiving end of one session subscription.
#[derive(Debug)]
pub struct Subscription {
    messages: mpsc::Receiver<TransportMessage>,
}

impl Subscription {
    #[must_use]
    pub fn new(messages: mpsc::Receiver<TransportMessage>) -> Self {
        Self { messages }
    }

    /// Next message, or `None` once the producing side is gone.
    pub async fn recv(&mut self) -> Option<TransportMessage> {
        self.messages.recv().await
    }
}

/// Publish/subscribe channel keyed by session.
#[async_trait::async_trait]
pub trait EventTransport: Send + Sync {
    /// Open one subscription that multiplexes every event kind for the
    /// session.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the subscription cannot be
    /// established.
    async fn subscribe(&self, session_id: Uuid) -> Result<Subscription, TransportError>;
}
