use std::time::Duration;

use flipdot_proto::{ControlCommand, Frame};
use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transport::{Link, LinkEvent, WireMessage};

/// Fixed pause between losing the link and the next connection attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Waiting for the single pending retry.
    Closed { retry_at: Instant },
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed { .. } => "closed",
        }
    }
}

/// Owner of the one logical connection to the device.
///
/// Sending is best effort: messages handed over while the link is not open
/// are dropped, never queued. Losing the link always schedules exactly one
/// retry `retry_delay` later, replacing any retry already pending.
pub struct ConnectionManager {
    state: ConnectionState,
    link: Option<Link>,
    retry_delay: Duration,
}

impl ConnectionManager {
    /// Starts closed with a retry due immediately, so the first attempt runs
    /// as soon as the runtime starts.
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Closed {
                retry_at: Instant::now(),
            },
            link: None,
            retry_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open && self.link.is_some()
    }

    pub fn retry_at(&self) -> Option<Instant> {
        match self.state {
            ConnectionState::Closed { retry_at } => Some(retry_at),
            _ => None,
        }
    }

    pub fn begin_open(&mut self) {
        self.link = None;
        self.state = ConnectionState::Connecting;
    }

    /// Adopts a freshly connected link. `getState` is always the first thing
    /// sent on it.
    pub fn on_opened(&mut self, link: Link) {
        self.link = Some(link);
        self.state = ConnectionState::Open;
        info!(target = "flipdot.link", "link open");
        self.send_command(&ControlCommand::GetState);
    }

    /// Drops the current link (if any) and arms the retry timer. Returns when
    /// the retry is due.
    pub fn on_lost(&mut self, reason: &str, now: Instant) -> Instant {
        self.link = None;
        let retry_at = now + self.retry_delay;
        self.state = ConnectionState::Closed { retry_at };
        counter!("flipdot_reconnects_scheduled_total", 1);
        warn!(
            target = "flipdot.link",
            reason,
            retry_in_ms = self.retry_delay.as_millis() as u64,
            "link lost; reconnect scheduled"
        );
        retry_at
    }

    /// Hands a message to the open link. Returns `false` when it was dropped.
    pub fn send(&self, message: WireMessage) -> bool {
        let kind = match &message {
            WireMessage::Text(_) => "text",
            WireMessage::Binary(_) => "binary",
        };
        let link = match (&self.state, &self.link) {
            (ConnectionState::Open, Some(link)) => link,
            _ => {
                counter!("flipdot_messages_dropped_total", 1, "kind" => kind);
                debug!(
                    target = "flipdot.link",
                    state = self.state.label(),
                    kind,
                    "link not open; message dropped"
                );
                return false;
            }
        };

        let len = message.len();
        match link.send(message) {
            Ok(()) => {
                counter!("flipdot_messages_sent_total", 1, "kind" => kind);
                debug!(target = "flipdot.link", kind, len, "sent");
                true
            }
            Err(err) => {
                counter!("flipdot_messages_dropped_total", 1, "kind" => kind);
                debug!(target = "flipdot.link", error = %err, kind, "send failed; message dropped");
                false
            }
        }
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send(WireMessage::Binary(frame.to_bytes()))
    }

    pub fn send_command(&self, command: &ControlCommand) -> bool {
        self.send(WireMessage::Text(command.to_text()))
    }

    /// Next event from the current link. Pends forever while there is none,
    /// so it can sit in a `select!` next to the retry timer.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        match self.link.as_mut() {
            Some(link) => link.recv().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Connector, MockConnector};
    use flipdot_proto::{Flag, PixelGrid};

    fn get_state() -> WireMessage {
        WireMessage::Text("getState".into())
    }

    #[tokio::test]
    async fn sends_are_dropped_until_open() {
        let (connector, mut acceptor) = MockConnector::pair();
        let mut manager = ConnectionManager::new(DEFAULT_RETRY_DELAY);

        assert!(!manager.send_frame(&Frame::switch(Flag::Backlight, true)));
        manager.begin_open();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(!manager.send_command(&ControlCommand::GetState));

        manager.on_opened(connector.connect().await.unwrap());
        let mut device = acceptor.accept().await.unwrap();
        assert!(manager.is_open());
        assert_eq!(device.next_sent().await, Some(get_state()));

        assert!(manager.send_frame(&Frame::picture(&PixelGrid::new())));
        match device.next_sent().await {
            Some(WireMessage::Binary(bytes)) => assert_eq!(&bytes[..3], &[0xFF, 0xA0, 168]),
            other => panic!("unexpected {other:?}"),
        }
        // nothing was queued from before the link opened
        assert_eq!(device.try_next_sent(), None);
    }

    #[tokio::test]
    async fn losing_the_link_arms_one_retry() {
        let (connector, _acceptor) = MockConnector::pair();
        let mut manager = ConnectionManager::new(DEFAULT_RETRY_DELAY);
        manager.begin_open();
        manager.on_opened(connector.connect().await.unwrap());

        let now = Instant::now();
        let retry_at = manager.on_lost("remote closed", now);
        assert_eq!(retry_at, now + Duration::from_secs(3));
        assert_eq!(manager.state(), ConnectionState::Closed { retry_at });
        assert!(!manager.is_open());
        assert!(!manager.send_command(&ControlCommand::GetState));

        let later = now + Duration::from_secs(1);
        let rearmed = manager.on_lost("error", later);
        assert_eq!(manager.retry_at(), Some(rearmed));
        assert_eq!(rearmed, later + DEFAULT_RETRY_DELAY);
    }

    #[tokio::test]
    async fn every_reopen_starts_with_get_state() {
        let (connector, mut acceptor) = MockConnector::pair();
        let mut manager = ConnectionManager::new(DEFAULT_RETRY_DELAY);

        for _ in 0..3 {
            manager.begin_open();
            manager.on_opened(connector.connect().await.unwrap());
            let mut device = acceptor.accept().await.unwrap();
            assert_eq!(device.next_sent().await, Some(get_state()));
            manager.on_lost("closed", Instant::now());
            assert_eq!(device.next_sent().await, None);
        }
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test]
    async fn next_event_forwards_link_events() {
        let (connector, mut acceptor) = MockConnector::pair();
        let mut manager = ConnectionManager::new(DEFAULT_RETRY_DELAY);
        manager.begin_open();
        manager.on_opened(connector.connect().await.unwrap());
        let device = acceptor.accept().await.unwrap();

        device.send_text("{}");
        device.close(Some("bye"));
        assert_eq!(
            manager.next_event().await,
            Some(LinkEvent::Message(WireMessage::Text("{}".into())))
        );
        assert_eq!(
            manager.next_event().await,
            Some(LinkEvent::Closed {
                reason: Some("bye".into())
            })
        );
    }
}
