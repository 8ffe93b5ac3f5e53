use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod mock;
pub mod websocket;

pub use mock::{MockAcceptor, MockConnector, MockDevice};
pub use websocket::WebSocketConnector;

/// One message on the link. Text carries JSON snapshots and text commands,
/// binary carries command frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WireMessage {
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Events a live link reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Message(WireMessage),
    Closed { reason: Option<String> },
    Error(String),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("link closed")]
    Closed,
}

/// Handle to one open connection. Outbound messages go through an unbounded
/// channel to whatever owns the socket; inbound events come back the same way.
pub struct Link {
    outbound: mpsc::UnboundedSender<WireMessage>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    pump: Option<JoinHandle<()>>,
}

impl Link {
    pub fn new(
        outbound: mpsc::UnboundedSender<WireMessage>,
        events: mpsc::UnboundedReceiver<LinkEvent>,
        pump: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            events,
            pump,
        }
    }

    pub fn send(&self, message: WireMessage) -> Result<(), LinkError> {
        self.outbound.send(message).map_err(|_| LinkError::Closed)
    }

    /// Next event, `None` once the other side has gone away without saying so.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(task) = self.pump.take() {
            task.abort();
        }
    }
}

/// Opens links to the device. One call is one connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Link, LinkError>;
}
