use std::sync::Arc;
use std::time::Duration;

use atlas::{filter_by_genres, genre_tags, GenreTags, Resolver};
use common::ReleaseRecord;
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ingest::{Admission, AdmissionPolicy, IngestionBuffer, DEFAULT_QUIET_PERIOD};
use crate::markers::{MapSurface, MarkerLayer, MarkerOptions, RenderPass, Viewport};
use crate::playback::{AudioOutput, PlaybackSequencer, PlaybackStatus, Transition};

#[derive(Clone, Copy, Debug)]
pub struct ExplorerOptions {
    pub admission: AdmissionPolicy,
    pub quiet_period: Duration,
    pub markers: MarkerOptions,
    pub initial_zoom: f64,
}

impl Default for ExplorerOptions {
    fn default() -> Self {
        Self {
            admission: AdmissionPolicy::default(),
            quiet_period: DEFAULT_QUIET_PERIOD,
            markers: MarkerOptions::default(),
            initial_zoom: 2.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub source_url: String,
    pub title: String,
    pub loading: bool,
    pub done: bool,
    pub total_releases: usize,
    pub visible_releases: usize,
    pub sources: usize,
    pub selected_genres: Vec<String>,
    pub playback: PlaybackStatus,
    pub current_release: Option<ReleaseRecord>,
    pub history: usize,
}

struct SessionInfo {
    id: Uuid,
    source_url: String,
    title: String,
}

/// Everything one browser session sees: the ingested releases, the genre
/// selection, the player and the map.
///
/// All methods are synchronous; timers are exposed as deadlines through
/// [`Explorer::next_deadline`] and driven by [`Explorer::fire_timers`].
pub struct Explorer<A, M> {
    resolver: Arc<Resolver>,
    options: ExplorerOptions,
    session: Option<SessionInfo>,
    loading: bool,
    buffer: IngestionBuffer,
    selected_genres: Vec<String>,
    visible: Vec<ReleaseRecord>,
    playback: PlaybackSequencer<A>,
    markers: MarkerLayer<M>,
    viewport: Viewport,
    latest: Option<RenderPass>,
}

impl<A: AudioOutput, M: MapSurface> Explorer<A, M> {
    pub fn new(audio: A, map: M, resolver: Arc<Resolver>, options: ExplorerOptions) -> Self {
        Self {
            playback: PlaybackSequencer::new(audio, Arc::clone(&resolver)),
            markers: MarkerLayer::new(map, Arc::clone(&resolver), options.markers),
            resolver,
            options,
            session: None,
            loading: false,
            buffer: IngestionBuffer::new(options.quiet_period),
            selected_genres: Vec::new(),
            visible: Vec::new(),
            viewport: Viewport::world(options.initial_zoom),
            latest: None,
        }
    }

    /// Clears every trace of the previous session before `id` becomes current.
    pub fn start_session(&mut self, id: Uuid, source_url: String) {
        self.playback.reset();
        self.markers.reset();
        self.buffer.reset();
        self.selected_genres.clear();
        self.visible.clear();
        self.latest = None;
        self.loading = true;
        info!("Starting session {} from {}", id, source_url);
        self.session = Some(SessionInfo {
            id,
            source_url,
            title: String::new(),
        });
    }

    pub fn is_current(&self, id: Uuid) -> bool {
        self.session.as_ref().map(|session| session.id) == Some(id)
    }

    pub fn set_title(&mut self, id: Uuid, title: String) -> bool {
        match self.session.as_mut() {
            Some(session) if session.id == id => {
                session.title = title;
                true
            }
            _ => false,
        }
    }

    /// Runs a streamed record through admission. `None` means the record
    /// belongs to a session that is no longer current.
    pub fn accept_record<R: Rng + ?Sized>(
        &mut self,
        id: Uuid,
        record: ReleaseRecord,
        now: Instant,
        rng: &mut R,
    ) -> Option<Admission> {
        if !self.is_current(id) {
            debug!("Dropping record from stale session {}", id);
            return None;
        }
        let admission = self
            .options
            .admission
            .check(&record, &self.buffer, &self.resolver, rng);
        if admission == Admission::Admit {
            let visible = self.matches_selection(&record);
            if self.buffer.ingest(record.clone(), now) && visible {
                self.visible.push(record);
            }
        }
        Some(admission)
    }

    /// The stream ended. With records in hand the quiet period decides when
    /// the session is done, otherwise it is done immediately.
    pub fn stream_closed(&mut self, id: Uuid, error: Option<String>) -> bool {
        if !self.is_current(id) {
            return false;
        }
        if error.is_some() || self.buffer.releases().is_empty() {
            self.buffer.mark_done();
            self.loading = false;
        }
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.buffer.quiet_deadline(), self.markers.centering_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fires every deadline that has passed; returns true if state changed.
    pub fn fire_timers(&mut self, now: Instant) -> bool {
        let mut changed = false;
        if self.buffer.poll_quiet(now) {
            self.loading = false;
            info!(
                "No new releases for {}s, {} releases collected",
                self.options.quiet_period.as_secs(),
                self.buffer.releases().len()
            );
            changed = true;
        }
        let due = self
            .markers
            .focus()
            .centering
            .as_ref()
            .filter(|request| now >= request.deadline)
            .map(|request| request.token);
        if let Some(token) = due {
            self.markers.complete_centering(token);
            changed = true;
        }
        changed
    }

    pub fn toggle(&mut self, key: &str, now: Instant) -> PlaybackStatus {
        let transition = self.playback.toggle(key, &self.visible);
        self.after(transition, now)
    }

    pub fn marker_click(&mut self, key: &str, now: Instant) -> PlaybackStatus {
        self.toggle(key, now)
    }

    pub fn play_next(&mut self, now: Instant) -> PlaybackStatus {
        let transition = self.playback.play_next_closest(&self.visible);
        self.after(transition, now)
    }

    pub fn play_random<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> PlaybackStatus {
        let transition = self.playback.play_random(&self.visible, rng);
        self.after(transition, now)
    }

    pub fn stop(&mut self) -> PlaybackStatus {
        self.playback.stop();
        self.playback.status()
    }

    pub fn track_ended(&mut self, token: u64, now: Instant) -> PlaybackStatus {
        let transition = self.playback.track_ended(token, &self.visible);
        self.after(transition, now)
    }

    pub fn audio_failed(&mut self, token: u64) -> PlaybackStatus {
        self.playback.audio_failed(token);
        self.playback.status()
    }

    pub fn open_popup(&mut self, key: &str) -> bool {
        self.markers.open_popup(key)
    }

    pub fn close_popup(&mut self, key: &str) -> bool {
        self.markers.close_popup(key)
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn set_genres(&mut self, genres: Vec<String>) {
        let mut selected: Vec<String> = Vec::new();
        for genre in genres {
            if !genre.is_empty() && !selected.contains(&genre) {
                selected.push(genre);
            }
        }
        self.visible = filter_by_genres(self.buffer.releases(), &selected);
        self.selected_genres = selected;
    }

    pub fn render(&mut self) -> RenderPass {
        let pass = self.markers.render(
            &self.visible,
            self.playback.current_key(),
            self.playback.history(),
            &self.viewport,
        );
        self.latest = Some(pass.clone());
        pass
    }

    pub fn latest_render(&self) -> Option<&RenderPass> {
        self.latest.as_ref()
    }

    pub fn releases(&self) -> &[ReleaseRecord] {
        self.buffer.releases()
    }

    pub fn visible_releases(&self) -> &[ReleaseRecord] {
        &self.visible
    }

    pub fn tags(&self) -> GenreTags {
        genre_tags(self.buffer.releases(), &self.resolver)
    }

    /// Page URL of the playing release, the seed for a follow-up crawl.
    pub fn current_release_url(&self) -> Option<String> {
        self.playback
            .current_release()
            .map(|record| record.release.url.clone())
            .filter(|url| !url.trim().is_empty())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (session_id, source_url, title) = match &self.session {
            Some(session) => (
                Some(session.id),
                session.source_url.clone(),
                session.title.clone(),
            ),
            None => (None, String::new(), String::new()),
        };
        SessionSnapshot {
            session_id,
            source_url,
            title,
            loading: self.loading,
            done: self.buffer.is_done(),
            total_releases: self.buffer.releases().len(),
            visible_releases: self.visible.len(),
            sources: self.buffer.source_total(),
            selected_genres: self.selected_genres.clone(),
            playback: self.playback.status(),
            current_release: self.playback.current_release().cloned(),
            history: self.playback.history().len(),
        }
    }

    pub fn dispose(&mut self) {
        self.playback.dispose();
        self.markers.dispose();
        self.loading = false;
    }

    #[cfg(test)]
    pub(crate) fn playback(&self) -> &PlaybackSequencer<A> {
        &self.playback
    }

    #[cfg(test)]
    pub(crate) fn markers(&self) -> &MarkerLayer<M> {
        &self.markers
    }

    fn after(&mut self, transition: Transition, now: Instant) -> PlaybackStatus {
        if let Transition::Started(record) = transition {
            if self.markers.center_on_release(&record, now).is_none() {
                debug!("Not centering on {}, location unresolved", record.key());
            }
        }
        self.playback.status()
    }

    fn matches_selection(&self, record: &ReleaseRecord) -> bool {
        self.selected_genres.is_empty()
            || self
                .selected_genres
                .iter()
                .any(|genre| record.has_genre(genre))
    }
}
