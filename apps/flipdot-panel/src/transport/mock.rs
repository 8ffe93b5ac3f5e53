use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connector, Link, LinkError, LinkEvent, WireMessage};

/// In-memory connector. Every successful attempt hands the far end of the new
/// link to the paired [`MockAcceptor`], where a test plays the device.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    accepted: mpsc::UnboundedSender<MockDevice>,
}

#[derive(Default)]
struct MockState {
    attempts: usize,
    refuse: usize,
    stall: usize,
}

impl MockConnector {
    pub fn pair() -> (Self, MockAcceptor) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(MockState::default())),
            accepted,
        };
        (connector, MockAcceptor { rx })
    }

    /// Makes the next `count` attempts fail.
    pub fn refuse_next(&self, count: usize) {
        self.state.lock().refuse = count;
    }

    /// Makes the next `count` attempts hang without ever answering.
    pub fn stall_next(&self, count: usize) {
        self.state.lock().stall = count;
    }

    /// Connection attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Link, LinkError> {
        let stalled = {
            let mut state = self.state.lock();
            state.attempts += 1;
            if state.refuse > 0 {
                state.refuse -= 1;
                return Err(LinkError::Connect("refused by mock device".into()));
            }
            let stalled = state.stall > 0;
            state.stall = state.stall.saturating_sub(1);
            stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let (tx_out, rx_out) = mpsc::unbounded_channel();
        let (tx_events, rx_events) = mpsc::unbounded_channel();
        let _ = self.accepted.send(MockDevice {
            sent: rx_out,
            events: tx_events,
        });
        Ok(Link::new(tx_out, rx_events, None))
    }
}

pub struct MockAcceptor {
    rx: mpsc::UnboundedReceiver<MockDevice>,
}

impl MockAcceptor {
    pub async fn accept(&mut self) -> Option<MockDevice> {
        self.rx.recv().await
    }
}

/// Device side of a mock link.
pub struct MockDevice {
    sent: mpsc::UnboundedReceiver<WireMessage>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl MockDevice {
    /// Next message the panel sent, `None` once the panel dropped the link.
    pub async fn next_sent(&mut self) -> Option<WireMessage> {
        self.sent.recv().await
    }

    pub fn try_next_sent(&mut self) -> Option<WireMessage> {
        self.sent.try_recv().ok()
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self
            .events
            .send(LinkEvent::Message(WireMessage::Text(text.into())));
    }

    pub fn send_binary(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self
            .events
            .send(LinkEvent::Message(WireMessage::Binary(bytes.into())));
    }

    pub fn close(&self, reason: Option<&str>) {
        let _ = self.events.send(LinkEvent::Closed {
            reason: reason.map(str::to_string),
        });
    }

    pub fn fail(&self, error: &str) {
        let _ = self.events.send(LinkEvent::Error(error.to_string()));
    }
}
