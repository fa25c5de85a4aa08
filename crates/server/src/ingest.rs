use std::collections::{HashMap, HashSet};
use std::time::Duration;

use atlas::Resolver;
use common::ReleaseRecord;
use rand::Rng;
use tokio::time::Instant;

pub const DEFAULT_PER_SOURCE_CAP: usize = 20;
pub const DEFAULT_ADMIT_PROBABILITY: f64 = 0.9;
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Unresolvable,
    SourceCapReached,
    Skipped,
    Duplicate,
}

/// Filter applied to streamed records before they reach the buffer.
#[derive(Clone, Copy, Debug)]
pub struct AdmissionPolicy {
    pub per_source_cap: usize,
    pub admit_probability: f64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            per_source_cap: DEFAULT_PER_SOURCE_CAP,
            admit_probability: DEFAULT_ADMIT_PROBABILITY,
        }
    }
}

impl AdmissionPolicy {
    pub fn check<R: Rng + ?Sized>(
        &self,
        record: &ReleaseRecord,
        buffer: &IngestionBuffer,
        resolver: &Resolver,
        rng: &mut R,
    ) -> Admission {
        if buffer.contains(record.key()) {
            return Admission::Duplicate;
        }
        if resolver.resolve(&record.release.location).is_none() {
            return Admission::Unresolvable;
        }
        if buffer.source_count(record.source_key()) >= self.per_source_cap {
            return Admission::SourceCapReached;
        }
        let probability = if self.admit_probability.is_finite() {
            self.admit_probability.clamp(0.0, 1.0)
        } else {
            1.0
        };
        if !rng.random_bool(probability) {
            return Admission::Skipped;
        }
        Admission::Admit
    }
}

/// Completion timer re-armed by every arrival.
///
/// Only the latest deadline is kept, so a superseded arming can never fire,
/// and once fired it stays fired until reset.
#[derive(Clone, Debug)]
pub struct QuietPeriod {
    period: Duration,
    deadline: Option<Instant>,
    fired: bool,
}

impl QuietPeriod {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
            fired: false,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        if !self.fired {
            self.deadline = Some(now + self.period);
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true exactly once, when the armed deadline has passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if !self.fired && now >= deadline => {
                self.fired = true;
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.deadline = None;
        self.fired = false;
    }
}

pub struct IngestionBuffer {
    releases: Vec<ReleaseRecord>,
    keys: HashSet<String>,
    per_source_counts: HashMap<String, usize>,
    last_arrival: Option<Instant>,
    done: bool,
    quiet: QuietPeriod,
}

impl IngestionBuffer {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            releases: Vec::new(),
            keys: HashSet::new(),
            per_source_counts: HashMap::new(),
            last_arrival: None,
            done: false,
            quiet: QuietPeriod::new(quiet_period),
        }
    }

    /// Appends `record`; returns false (and changes nothing) for a key that
    /// was already ingested this session.
    pub fn ingest(&mut self, record: ReleaseRecord, now: Instant) -> bool {
        if !self.keys.insert(record.key().to_string()) {
            return false;
        }
        *self
            .per_source_counts
            .entry(record.source_key().to_string())
            .or_insert(0) += 1;
        self.releases.push(record);
        self.last_arrival = Some(now);
        self.quiet.arm(now);
        true
    }

    pub fn releases(&self) -> &[ReleaseRecord] {
        &self.releases
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn source_count(&self, source: &str) -> usize {
        self.per_source_counts.get(source).copied().unwrap_or(0)
    }

    pub fn source_total(&self) -> usize {
        self.per_source_counts.len()
    }

    pub fn last_arrival(&self) -> Option<Instant> {
        self.last_arrival
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn quiet_deadline(&self) -> Option<Instant> {
        self.quiet.deadline()
    }

    /// Marks the session done once the quiet period has elapsed.
    pub fn poll_quiet(&mut self, now: Instant) -> bool {
        if self.quiet.poll(now) {
            self.done = true;
            true
        } else {
            false
        }
    }

    pub fn mark_done(&mut self) {
        self.quiet.cancel();
        self.done = true;
    }

    pub fn reset(&mut self) {
        self.releases.clear();
        self.keys.clear();
        self.per_source_counts.clear();
        self.last_arrival = None;
        self.done = false;
        self.quiet.reset();
    }
}
