use std::convert::Infallible;

use axum::response::sse::Event;
use common::Coordinates;
use futures_util::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::explorer::SessionSnapshot;
use crate::markers::RenderPass;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum AudioCommand {
    Play { url: String, token: u64 },
    Stop,
}

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum ExplorerEvent {
    Render(RenderPass),
    Status(SessionSnapshot),
    Audio(AudioCommand),
    View {
        center: Coordinates,
        zoom: f64,
        animate: bool,
    },
}

impl ExplorerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ExplorerEvent::Render(_) => "render",
            ExplorerEvent::Status(_) => "status",
            ExplorerEvent::Audio(_) => "audio",
            ExplorerEvent::View { .. } => "view",
        }
    }
}

/// Fan-out of explorer events to every connected browser.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ExplorerEvent>,
    closed: CancellationToken,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            closed: CancellationToken::new(),
        }
    }

    /// Sends `event`, ignoring the case where nobody is listening.
    pub fn broadcast_lossy(&self, event: ExplorerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExplorerEvent> {
        self.tx.subscribe()
    }

    /// Ends every open event stream so the server can shut down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn subscribe_stream(&self) -> impl Stream<Item = Result<Event, Infallible>> {
        let closed = self.closed.clone().cancelled_owned();
        BroadcastStream::new(self.tx.subscribe())
            .take_until(closed)
            .filter_map(|result| async move {
                match result {
                    Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                        Ok(sse) => Some(Ok(sse)),
                        Err(err) => {
                            warn!("Failed to encode {} event: {}", event.name(), err);
                            None
                        }
                    },
                    Err(err) => {
                        debug!("SSE client lagged: {:?}", err);
                        None
                    }
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_broadcasts() {
        let events = EventBroadcaster::new(8);
        events.broadcast_lossy(ExplorerEvent::Audio(AudioCommand::Stop));

        let mut rx = events.subscribe();
        assert_eq!(events.client_count(), 1);
        events.broadcast_lossy(ExplorerEvent::Audio(AudioCommand::Play {
            url: "https://t4.bcbits.com/stream/a".to_string(),
            token: 3,
        }));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "audio");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["command"], "play");
        assert_eq!(json["token"], 3);
    }

    #[test]
    fn view_event_serializes_flat() {
        let event = ExplorerEvent::View {
            center: Coordinates::new(1.0, 2.0),
            zoom: 10.0,
            animate: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(event.name(), "view");
        assert_eq!(json["center"]["lat"], 1.0);
        assert_eq!(json["zoom"], 10.0);
    }
}
