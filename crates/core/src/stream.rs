use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tidemark_client_api_messages::StreamEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

/// The long-lived push channel: one WebSocket connection carrying named
/// JSON events, reconnecting on its own until told to stop.
pub struct LiveStream {
    should_reconnect: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl LiveStream {
    /// Connect to `url` in the background and forward every decoded event
    /// into `events`. Decode failures are logged and dropped, never fatal.
    pub fn spawn(url: String, reconnect_delay: Duration, events: mpsc::UnboundedSender<StreamEvent>) -> LiveStream {
        let should_reconnect = Arc::new(AtomicBool::new(true));
        let flag = should_reconnect.clone();
        let handle = tokio::spawn(run_stream(url, reconnect_delay, events, flag));
        LiveStream {
            should_reconnect,
            handle,
        }
    }

    /// Stop for good: no reconnect, connection torn down.
    pub fn disconnect(&self) {
        self.should_reconnect.store(false, Ordering::SeqCst);
        self.handle.abort();
    }

    pub fn is_connected_or_retrying(&self) -> bool {
        self.should_reconnect.load(Ordering::SeqCst) && !self.handle.is_finished()
    }
}

async fn run_stream(
    url: String,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<StreamEvent>,
    should_reconnect: Arc<AtomicBool>,
) {
    while should_reconnect.load(Ordering::SeqCst) {
        match connect_async(url.as_str()).await {
            Err(e) => log::warn!("live stream connect to {url} failed: {e}"),
            Ok((socket, _)) => {
                log::debug!("live stream connected to {url}");
                let (mut write, mut read) = socket.split();
                while let Some(message) = read.next().await {
                    match message {
                        Ok(WsMessage::Text(text)) => match serde_json::from_str::<StreamEvent>(&text) {
                            Ok(event) => {
                                if events.send(event).is_err() {
                                    // Receiver gone: the controller shut down.
                                    return;
                                }
                            }
                            Err(e) => log::error!("undecodable stream event ({e}): {text}"),
                        },
                        Ok(WsMessage::Ping(payload)) => {
                            if let Err(e) = write.send(WsMessage::Pong(payload)).await {
                                log::warn!("failed to answer ping: {e}");
                            }
                        }
                        Ok(WsMessage::Close(_)) => break,
                        Ok(other) => log::warn!("unexpected stream frame: {other:?}"),
                        Err(e) => {
                            log::warn!("live stream read error: {e}");
                            break;
                        }
                    }
                }
            }
        }
        if !should_reconnect.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}
