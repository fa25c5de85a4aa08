use common::Coordinates;
use tracing::debug;

use crate::events::{AudioCommand, EventBroadcaster, ExplorerEvent};
use crate::markers::MapSurface;
use crate::playback::AudioOutput;

/// The `<audio>` element of the connected browser, driven over SSE.
pub struct BrowserAudio {
    events: EventBroadcaster,
    active: Option<u64>,
}

impl BrowserAudio {
    pub fn acquire(events: EventBroadcaster) -> Self {
        Self {
            events,
            active: None,
        }
    }
}

impl AudioOutput for BrowserAudio {
    fn play(&mut self, url: &str, token: u64) {
        self.active = Some(token);
        self.events.broadcast_lossy(ExplorerEvent::Audio(AudioCommand::Play {
            url: url.to_string(),
            token,
        }));
    }

    fn stop(&mut self) {
        if self.active.take().is_some() {
            self.events
                .broadcast_lossy(ExplorerEvent::Audio(AudioCommand::Stop));
        }
    }

    fn dispose(&mut self) {
        debug!("Releasing browser audio");
        self.active = None;
        self.events
            .broadcast_lossy(ExplorerEvent::Audio(AudioCommand::Stop));
    }
}

pub struct BrowserMap {
    events: EventBroadcaster,
}

impl BrowserMap {
    pub fn acquire(events: EventBroadcaster) -> Self {
        Self { events }
    }
}

impl MapSurface for BrowserMap {
    fn set_view(&mut self, center: Coordinates, zoom: f64, animate: bool) {
        self.events.broadcast_lossy(ExplorerEvent::View {
            center,
            zoom,
            animate,
        });
    }
}
