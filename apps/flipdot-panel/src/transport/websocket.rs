use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, trace};
use url::Url;

use super::{Connector, Link, LinkError, LinkEvent, WireMessage};

/// Connects to the device's `/ws` endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Link, LinkError> {
        debug!(target = "flipdot.link", url = %self.url, "connecting websocket");
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| LinkError::Connect(err.to_string()))?;

        let (tx_out, rx_out) = mpsc::unbounded_channel::<WireMessage>();
        let (tx_events, rx_events) = mpsc::unbounded_channel::<LinkEvent>();
        let pump = tokio::spawn(pump_websocket(ws_stream, rx_out, tx_events));

        Ok(Link::new(tx_out, rx_events, Some(pump)))
    }
}

impl From<WireMessage> for Message {
    fn from(message: WireMessage) -> Self {
        match message {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

/// Owns the socket for the lifetime of one link. Ends after reporting exactly
/// one `Closed` or `Error`, or silently when the link handle is dropped.
async fn pump_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<WireMessage>,
    tx_events: mpsc::UnboundedSender<LinkEvent>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = rx_out.recv() => match outbound {
                Some(message) => {
                    if let Err(err) = ws_sender.send(message.into()).await {
                        let _ = tx_events.send(LinkEvent::Error(err.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = ws_sender.close().await;
                    break;
                }
            },
            inbound = ws_receiver.next() => {
                let event = match inbound {
                    Some(Ok(Message::Text(text))) => LinkEvent::Message(WireMessage::Text(text)),
                    Some(Ok(Message::Binary(bytes))) => {
                        LinkEvent::Message(WireMessage::Binary(bytes))
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let _ = tx_events.send(LinkEvent::Closed {
                            reason: frame.map(|frame| frame.reason.into_owned()),
                        });
                        break;
                    }
                    Some(Ok(other)) => {
                        trace!(target = "flipdot.link", kind = ?other, "ignoring control message");
                        continue;
                    }
                    Some(Err(err)) => {
                        let _ = tx_events.send(LinkEvent::Error(err.to_string()));
                        break;
                    }
                    None => {
                        let _ = tx_events.send(LinkEvent::Closed { reason: None });
                        break;
                    }
                };
                if tx_events.send(event).is_err() {
                    break;
                }
            }
        }
    }
}
