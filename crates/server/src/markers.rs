use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use atlas::{cluster, Bounds, ClusterNode, ClusterOptions, Resolver};
use common::{marker_id, Coordinates, ReleaseRecord, ResolvedPoint};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// The map widget the markers are drawn on.
pub trait MapSurface: Send {
    fn set_view(&mut self, center: Coordinates, zoom: f64, animate: bool);

    fn dispose(&mut self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerState {
    Plain,
    Visited,
    Playing,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Marker {
    pub id: String,
    pub key: String,
    pub coordinates: Coordinates,
    pub state: MarkerState,
    pub title: String,
    pub artist: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Popup {
    pub marker_id: String,
    pub key: String,
    pub title: String,
    pub artist: String,
    pub url: String,
    pub image_url: String,
    pub collector_name: String,
    pub collector_url: String,
    pub playing: bool,
}

impl Popup {
    fn for_release(record: &ReleaseRecord, playing: bool) -> Self {
        Self {
            marker_id: marker_id(record.key()),
            key: record.key().to_string(),
            title: record.release.title.clone(),
            artist: record.release.artist.clone(),
            url: record.release.url.clone(),
            image_url: record.release.image_url.clone(),
            collector_name: record.collected_by.name.clone(),
            collector_url: record.collected_by.bandcamp_url.clone(),
            playing,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub zoom: f64,
    #[serde(default = "world_bounds")]
    pub bounds: Bounds,
}

fn world_bounds() -> Bounds {
    Bounds::WORLD
}

impl Viewport {
    pub fn world(zoom: f64) -> Self {
        Self {
            zoom,
            bounds: Bounds::WORLD,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RenderPass {
    pub pass: u64,
    pub zoom: f64,
    pub bounds: Bounds,
    pub markers: Vec<Marker>,
    pub nodes: Vec<ClusterNode>,
    pub popup: Option<Popup>,
    pub unresolved: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CenteringRequest {
    pub token: u64,
    pub key: String,
    pub center: Coordinates,
    pub deadline: Instant,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UiFocus {
    pub open_key: Option<String>,
    pub centering: Option<CenteringRequest>,
}

#[derive(Clone, Copy, Debug)]
pub struct MarkerOptions {
    pub cluster: ClusterOptions,
    pub focus_zoom: f64,
    pub settle_delay: Duration,
}

impl Default for MarkerOptions {
    fn default() -> Self {
        Self {
            cluster: ClusterOptions::default(),
            focus_zoom: 10.0,
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Rebuilds the marker set from scratch on every pass while keeping the
/// user's popup focus across passes.
pub struct MarkerLayer<M> {
    map: M,
    resolver: Arc<Resolver>,
    options: MarkerOptions,
    focus: UiFocus,
    markers: Vec<Marker>,
    passes: u64,
    next_token: u64,
}

impl<M: MapSurface> MarkerLayer<M> {
    pub fn new(map: M, resolver: Arc<Resolver>, options: MarkerOptions) -> Self {
        Self {
            map,
            resolver,
            options,
            focus: UiFocus::default(),
            markers: Vec::new(),
            passes: 0,
            next_token: 0,
        }
    }

    pub fn focus(&self) -> &UiFocus {
        &self.focus
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn centering_deadline(&self) -> Option<Instant> {
        self.focus.centering.as_ref().map(|request| request.deadline)
    }

    #[cfg(test)]
    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn render(
        &mut self,
        releases: &[ReleaseRecord],
        playing: Option<&str>,
        history: &HashSet<String>,
        viewport: &Viewport,
    ) -> RenderPass {
        let previously_open = self.focus.open_key.clone();
        self.markers.clear();

        let mut points = Vec::new();
        for record in releases {
            let Some(point) = self.resolver.resolve_record(record) else {
                continue;
            };
            let state = if Some(record.key()) == playing {
                MarkerState::Playing
            } else if history.contains(record.key()) {
                MarkerState::Visited
            } else {
                MarkerState::Plain
            };
            self.markers.push(Marker {
                id: marker_id(record.key()),
                key: point.key.clone(),
                coordinates: point.coordinates,
                state,
                title: record.release.title.clone(),
                artist: record.release.artist.clone(),
            });
            points.push(point);
        }

        let nodes = cluster(
            &points,
            &viewport.bounds,
            viewport.zoom,
            &self.options.cluster,
        );

        let popup = match previously_open.as_deref() {
            Some(open) => match self.find_marked(releases, &points, open) {
                Some(record) => Some(Popup::for_release(record, Some(open) == playing)),
                None => {
                    self.focus.open_key = None;
                    None
                }
            },
            None => playing
                .and_then(|key| self.find_marked(releases, &points, key))
                .map(|record| {
                    self.focus.open_key = Some(record.key().to_string());
                    Popup::for_release(record, true)
                }),
        };

        self.passes += 1;
        RenderPass {
            pass: self.passes,
            zoom: viewport.zoom,
            bounds: viewport.bounds,
            markers: self.markers.clone(),
            nodes,
            popup,
            unresolved: releases.len() - points.len(),
        }
    }

    /// Moves the map onto `release` and schedules its popup for after the
    /// settle delay. Returns `None` for an unresolvable location.
    pub fn center_on_release(
        &mut self,
        release: &ReleaseRecord,
        now: Instant,
    ) -> Option<CenteringRequest> {
        let center = self.resolver.resolve(&release.release.location)?;
        self.map.set_view(center, self.options.focus_zoom, true);
        self.next_token += 1;
        let request = CenteringRequest {
            token: self.next_token,
            key: release.key().to_string(),
            center,
            deadline: now + self.options.settle_delay,
        };
        self.focus.centering = Some(request.clone());
        Some(request)
    }

    /// Opens the popup of a pending centering. Stale tokens do nothing.
    pub fn complete_centering(&mut self, token: u64) -> bool {
        match &self.focus.centering {
            Some(request) if request.token == token => {}
            _ => return false,
        }
        let Some(request) = self.focus.centering.take() else {
            return false;
        };
        if self.markers.iter().any(|marker| marker.key == request.key) {
            self.focus.open_key = Some(request.key);
            true
        } else {
            debug!("Centering target {} has no marker", request.key);
            false
        }
    }

    pub fn open_popup(&mut self, key: &str) -> bool {
        if self.markers.iter().any(|marker| marker.key == key) {
            self.focus.open_key = Some(key.to_string());
            true
        } else {
            false
        }
    }

    /// The user removed the popup for `key`.
    pub fn close_popup(&mut self, key: &str) -> bool {
        if self.focus.open_key.as_deref() == Some(key) {
            self.focus.open_key = None;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.focus = UiFocus::default();
        self.markers.clear();
    }

    pub fn dispose(&mut self) {
        self.reset();
        self.map.dispose();
    }

    fn find_marked<'a>(
        &self,
        releases: &'a [ReleaseRecord],
        points: &[ResolvedPoint],
        key: &str,
    ) -> Option<&'a ReleaseRecord> {
        if !points.iter().any(|point| point.key == key) {
            return None;
        }
        releases.iter().find(|record| record.key() == key)
    }
}
