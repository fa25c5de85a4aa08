use std::collections::HashSet;
use std::sync::Arc;

use atlas::Resolver;
use common::ReleaseRecord;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

/// The single audio element driven by the sequencer.
///
/// `play` is always preceded by `stop`, so an implementation only ever has
/// one live stream. `token` identifies the stream in end/failure reports.
pub trait AudioOutput: Send {
    fn play(&mut self, url: &str, token: u64);
    fn stop(&mut self);

    fn dispose(&mut self) {
        self.stop();
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PlaybackStatus {
    Idle,
    Playing { key: String, token: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    Started(ReleaseRecord),
    Stopped,
    Unchanged,
}

struct NowPlaying {
    record: ReleaseRecord,
    token: u64,
}

pub struct PlaybackSequencer<A> {
    audio: A,
    resolver: Arc<Resolver>,
    current: Option<NowPlaying>,
    history: HashSet<String>,
    next_token: u64,
}

impl<A: AudioOutput> PlaybackSequencer<A> {
    pub fn new(audio: A, resolver: Arc<Resolver>) -> Self {
        Self {
            audio,
            resolver,
            current: None,
            history: HashSet::new(),
            next_token: 0,
        }
    }

    pub fn current_key(&self) -> Option<&str> {
        self.current.as_ref().map(|now| now.record.key())
    }

    pub fn current_release(&self) -> Option<&ReleaseRecord> {
        self.current.as_ref().map(|now| &now.record)
    }

    pub fn history(&self) -> &HashSet<String> {
        &self.history
    }

    pub fn status(&self) -> PlaybackStatus {
        match &self.current {
            Some(now) => PlaybackStatus::Playing {
                key: now.record.key().to_string(),
                token: now.token,
            },
            None => PlaybackStatus::Idle,
        }
    }

    #[cfg(test)]
    pub fn audio(&self) -> &A {
        &self.audio
    }

    pub fn toggle(&mut self, key: &str, releases: &[ReleaseRecord]) -> Transition {
        if self.current_key() == Some(key) {
            self.audio.stop();
            self.current = None;
            debug!("Playback stopped by toggle");
            return Transition::Stopped;
        }

        let Some(record) = releases.iter().find(|record| record.key() == key) else {
            debug!("Toggle ignored, no release for {}", key);
            return Transition::Unchanged;
        };
        let record = record.clone();

        if let Some(previous) = self.current.take() {
            self.history.insert(previous.record.key().to_string());
        }
        // A replayed track is current again, not history.
        self.history.remove(key);

        self.audio.stop();
        self.next_token += 1;
        let token = self.next_token;
        self.audio.play(&record.release.streaming_url, token);
        info!(
            "Playing {} by {} ({})",
            record.release.title, record.release.artist, record.release.location
        );
        self.current = Some(NowPlaying {
            record: record.clone(),
            token,
        });
        Transition::Started(record)
    }

    /// Moves to the geographically nearest release not yet heard.
    ///
    /// Distance is planar in lat/lng degrees. When every other release is in
    /// the history the history is ignored for this pick.
    pub fn play_next_closest(&mut self, releases: &[ReleaseRecord]) -> Transition {
        let Some(current) = self.current_release() else {
            return Transition::Unchanged;
        };
        let Some(origin) = self.resolver.resolve(&current.release.location) else {
            return Transition::Unchanged;
        };

        let mut closest: Option<(&ReleaseRecord, f64)> = None;
        for candidate in self.candidates(releases) {
            let Some(coords) = self.resolver.resolve(&candidate.release.location) else {
                continue;
            };
            let distance = origin.degree_distance(&coords);
            if closest.map_or(true, |(_, best)| distance < best) {
                closest = Some((candidate, distance));
            }
        }

        match closest {
            Some((winner, _)) => {
                let key = winner.key().to_string();
                self.toggle(&key, releases)
            }
            None => Transition::Unchanged,
        }
    }

    pub fn play_random<R: Rng + ?Sized>(
        &mut self,
        releases: &[ReleaseRecord],
        rng: &mut R,
    ) -> Transition {
        let candidates = self.candidates(releases);
        if candidates.is_empty() {
            return Transition::Unchanged;
        }
        let key = candidates[rng.random_range(0..candidates.len())]
            .key()
            .to_string();
        self.toggle(&key, releases)
    }

    pub fn stop(&mut self) -> Transition {
        self.audio.stop();
        if self.current.take().is_some() {
            Transition::Stopped
        } else {
            Transition::Unchanged
        }
    }

    /// End-of-track report from the audio element.
    pub fn track_ended(&mut self, token: u64, releases: &[ReleaseRecord]) -> Transition {
        if !self.is_current_token(token) {
            debug!("Ignoring end of stale stream {}", token);
            return Transition::Unchanged;
        }
        self.play_next_closest(releases)
    }

    /// The audio element could not play the stream; drop back to idle.
    pub fn audio_failed(&mut self, token: u64) -> Transition {
        if !self.is_current_token(token) {
            return Transition::Unchanged;
        }
        self.audio.stop();
        if let Some(failed) = self.current.take() {
            info!("Stream failed for {}", failed.record.key());
            self.history.insert(failed.record.key().to_string());
        }
        Transition::Stopped
    }

    pub fn reset(&mut self) {
        self.audio.stop();
        self.current = None;
        self.history.clear();
    }

    pub fn dispose(&mut self) {
        self.current = None;
        self.audio.dispose();
    }

    fn is_current_token(&self, token: u64) -> bool {
        self.current.as_ref().map(|now| now.token) == Some(token)
    }

    fn candidates<'a>(&self, releases: &'a [ReleaseRecord]) -> Vec<&'a ReleaseRecord> {
        let current = self.current_key();
        let fresh: Vec<&ReleaseRecord> = releases
            .iter()
            .filter(|record| Some(record.key()) != current)
            .filter(|record| !self.history.contains(record.key()))
            .collect();
        if !fresh.is_empty() {
            return fresh;
        }
        releases
            .iter()
            .filter(|record| Some(record.key()) != current)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use common::sample_record;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[derive(Default)]
    pub(crate) struct FakeAudio {
        pub active: Option<String>,
        pub played: Vec<(String, u64)>,
        pub overlaps: usize,
        pub stops: usize,
    }

    impl AudioOutput for FakeAudio {
        fn play(&mut self, url: &str, token: u64) {
            if self.active.is_some() {
                self.overlaps += 1;
            }
            self.active = Some(url.to_string());
            self.played.push((url.to_string(), token));
        }

        fn stop(&mut self) {
            self.stops += 1;
            self.active = None;
        }
    }

    fn sequencer() -> PlaybackSequencer<FakeAudio> {
        PlaybackSequencer::new(FakeAudio::default(), Arc::new(Resolver::default()))
    }

    fn at(key: &str, lat: f64, lng: f64) -> ReleaseRecord {
        sample_record(key, &format!("{}, {}", lat, lng), "fan")
    }

    #[test]
    fn toggle_starts_and_stops() {
        let releases = vec![at("a", 0.0, 0.0)];
        let mut seq = sequencer();
        assert_eq!(
            seq.toggle("a", &releases),
            Transition::Started(releases[0].clone())
        );
        assert_eq!(seq.current_key(), Some("a"));
        assert_eq!(seq.toggle("a", &releases), Transition::Stopped);
        assert_eq!(seq.status(), PlaybackStatus::Idle);
        assert!(seq.audio().active.is_none());
        assert!(seq.history().is_empty());
    }

    #[test]
    fn unknown_key_changes_nothing() {
        let releases = vec![at("a", 0.0, 0.0)];
        let mut seq = sequencer();
        seq.toggle("a", &releases);
        assert_eq!(seq.toggle("missing", &releases), Transition::Unchanged);
        assert_eq!(seq.current_key(), Some("a"));
        assert!(seq.history().is_empty());
        assert_eq!(seq.audio().active.as_deref(), Some("a"));
    }

    #[test]
    fn history_excludes_current_and_grows_by_one_per_switch() {
        let releases: Vec<ReleaseRecord> =
            (0..6).map(|i| at(&format!("k{}", i), i as f64, 0.0)).collect();
        let mut seq = sequencer();
        for (n, record) in releases.iter().enumerate() {
            seq.toggle(record.key(), &releases);
            assert!(!seq.history().contains(record.key()));
            assert_eq!(seq.history().len(), n);
        }
        // Going back to a visited track keeps the invariant.
        seq.toggle("k0", &releases);
        assert_eq!(seq.current_key(), Some("k0"));
        assert!(!seq.history().contains("k0"));
        assert!(seq.history().contains("k5"));
    }

    #[test]
    fn next_picks_nearest() {
        let releases = vec![at("origin", 0.0, 0.0), at("far", 2.0, 2.0), at("near", 1.0, 1.0)];
        let mut seq = sequencer();
        seq.toggle("origin", &releases);
        seq.play_next_closest(&releases);
        assert_eq!(seq.current_key(), Some("near"));
        seq.play_next_closest(&releases);
        assert_eq!(seq.current_key(), Some("far"));
    }

    #[test]
    fn next_ties_go_to_first_candidate() {
        let releases = vec![at("origin", 0.0, 0.0), at("east", 0.0, 1.0), at("north", 1.0, 0.0)];
        let mut seq = sequencer();
        seq.toggle("origin", &releases);
        seq.play_next_closest(&releases);
        assert_eq!(seq.current_key(), Some("east"));
    }

    #[test]
    fn next_falls_back_to_history_when_exhausted() {
        let releases = vec![at("a", 0.0, 0.0), at("b", 5.0, 5.0)];
        let mut seq = sequencer();
        seq.toggle("b", &releases);
        seq.toggle("a", &releases);
        assert!(seq.history().contains("b"));
        assert!(matches!(
            seq.play_next_closest(&releases),
            Transition::Started(_)
        ));
        assert_eq!(seq.current_key(), Some("b"));
    }

    #[test]
    fn next_requires_resolvable_current() {
        let releases = vec![
            sample_record("lost", "nowhere at all", "fan"),
            at("b", 1.0, 1.0),
        ];
        let mut seq = sequencer();
        seq.toggle("lost", &releases);
        assert_eq!(seq.play_next_closest(&releases), Transition::Unchanged);
        assert_eq!(seq.current_key(), Some("lost"));
    }

    #[test]
    fn next_skips_unresolvable_candidates() {
        let releases = vec![
            at("a", 0.0, 0.0),
            sample_record("lost", "nowhere at all", "fan"),
        ];
        let mut seq = sequencer();
        seq.toggle("a", &releases);
        assert_eq!(seq.play_next_closest(&releases), Transition::Unchanged);
        assert_eq!(seq.play_next_closest(&[]), Transition::Unchanged);
    }

    #[test]
    fn next_when_idle_is_noop() {
        let releases = vec![at("a", 0.0, 0.0)];
        let mut seq = sequencer();
        assert_eq!(seq.play_next_closest(&releases), Transition::Unchanged);
        assert!(seq.audio().played.is_empty());
    }

    #[test]
    fn random_prefers_unplayed() {
        let releases = vec![at("a", 0.0, 0.0), at("b", 1.0, 1.0), at("c", 2.0, 2.0)];
        let mut seq = sequencer();
        let mut rng = StdRng::seed_from_u64(99);
        seq.toggle("a", &releases);
        seq.toggle("b", &releases);
        seq.play_random(&releases, &mut rng);
        assert_eq!(seq.current_key(), Some("c"));
    }

    #[test]
    fn random_on_single_release_is_noop() {
        let releases = vec![at("a", 0.0, 0.0)];
        let mut seq = sequencer();
        let mut rng = StdRng::seed_from_u64(5);
        assert!(matches!(
            seq.play_random(&releases, &mut rng),
            Transition::Started(_)
        ));
        assert_eq!(seq.play_random(&releases, &mut rng), Transition::Unchanged);
        assert_eq!(seq.play_random(&[], &mut rng), Transition::Unchanged);
    }

    #[test]
    fn only_one_stream_is_ever_active() {
        let releases: Vec<ReleaseRecord> =
            (0..5).map(|i| at(&format!("k{}", i), i as f64, i as f64)).collect();
        let mut seq = sequencer();
        let mut rng = StdRng::seed_from_u64(11);
        seq.toggle("k0", &releases);
        seq.play_next_closest(&releases);
        seq.play_next_closest(&releases);
        seq.play_random(&releases, &mut rng);
        seq.play_next_closest(&releases);
        assert_eq!(seq.audio().overlaps, 0);
        assert_eq!(seq.audio().played.len(), 5);
    }

    #[test]
    fn stale_track_end_is_ignored() {
        let releases = vec![at("a", 0.0, 0.0), at("b", 1.0, 1.0), at("c", 3.0, 3.0)];
        let mut seq = sequencer();
        seq.toggle("a", &releases);
        let PlaybackStatus::Playing { token: first, .. } = seq.status() else {
            panic!("expected playing");
        };
        seq.toggle("c", &releases);
        assert_eq!(seq.track_ended(first, &releases), Transition::Unchanged);
        assert_eq!(seq.current_key(), Some("c"));

        let PlaybackStatus::Playing { token, .. } = seq.status() else {
            panic!("expected playing");
        };
        assert!(matches!(
            seq.track_ended(token, &releases),
            Transition::Started(_)
        ));
        assert_eq!(seq.current_key(), Some("b"));
    }

    #[test]
    fn audio_failure_falls_back_to_idle() {
        let releases = vec![at("a", 0.0, 0.0), at("b", 1.0, 1.0)];
        let mut seq = sequencer();
        seq.toggle("a", &releases);
        let PlaybackStatus::Playing { token, .. } = seq.status() else {
            panic!("expected playing");
        };
        assert_eq!(seq.audio_failed(token + 1), Transition::Unchanged);
        assert_eq!(seq.audio_failed(token), Transition::Stopped);
        assert_eq!(seq.status(), PlaybackStatus::Idle);
        assert!(seq.history().contains("a"));
        assert!(seq.audio().active.is_none());
    }

    #[test]
    fn stop_and_reset() {
        let releases = vec![at("a", 0.0, 0.0), at("b", 1.0, 1.0)];
        let mut seq = sequencer();
        assert_eq!(seq.stop(), Transition::Unchanged);
        seq.toggle("a", &releases);
        seq.toggle("b", &releases);
        assert_eq!(seq.stop(), Transition::Stopped);
        assert_eq!(seq.history().len(), 1);
        seq.reset();
        assert!(seq.history().is_empty());
        assert!(seq.audio().active.is_none());
    }
}
