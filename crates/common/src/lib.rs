use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub image_url: String,
    pub streaming_url: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub release_type: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectedBy {
    #[serde(default)]
    pub name: String,
    /// Collector profile URL; the per-source quota is keyed on it.
    #[serde(default)]
    pub bandcamp_url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub release: Release,
    pub collected_by: CollectedBy,
}

impl ReleaseRecord {
    pub fn key(&self) -> &str {
        &self.release.streaming_url
    }

    pub fn source_key(&self) -> &str {
        &self.collected_by.bandcamp_url
    }

    pub fn has_genre(&self, genre: &str) -> bool {
        self.release.genres.iter().any(|g| g == genre)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Planar distance in degrees. Not geodesic.
    pub fn degree_distance(&self, other: &Coordinates) -> f64 {
        let dlat = self.lat - other.lat;
        let dlng = self.lng - other.lng;
        (dlat * dlat + dlng * dlng).sqrt()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedPoint {
    pub key: String,
    pub coordinates: Coordinates,
}

/// DOM-safe identifier for a release key.
pub fn marker_id(key: &str) -> String {
    let hash = blake3::hash(key.as_bytes()).to_hex();
    hash[..16].to_string()
}

#[cfg(any(test, feature = "test-support"))]
pub fn sample_record(key: &str, location: &str, source: &str) -> ReleaseRecord {
    ReleaseRecord {
        release: Release {
            title: format!("title {}", key),
            artist: "artist".to_string(),
            url: format!("https://example.com/album/{}", key),
            image_url: String::new(),
            streaming_url: key.to_string(),
            location: location.to_string(),
            release_type: "album".to_string(),
            release_date: String::new(),
            genres: Vec::new(),
        },
        collected_by: CollectedBy {
            name: "collector".to_string(),
            bandcamp_url: source.to_string(),
        },
    }
}
