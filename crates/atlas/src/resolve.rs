use std::sync::LazyLock;

use common::{Coordinates, ReleaseRecord, ResolvedPoint};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

const BUILTIN_CITIES: &[(&str, f64, f64)] = &[
    ("Berlin, Germany", 52.5200, 13.4050),
    ("Copenhagen, Denmark", 55.6761, 12.5683),
    ("London, UK", 51.5074, -0.1278),
    ("New York, NY", 40.7128, -74.0060),
    ("Los Angeles, CA", 34.0522, -118.2437),
    ("Chicago, IL", 41.8781, -87.6298),
    ("Tokyo, Japan", 35.6762, 139.6503),
    ("Paris, France", 48.8566, 2.3522),
    ("Amsterdam, Netherlands", 52.3676, 4.9041),
    ("Barcelona, Spain", 41.3851, 2.1734),
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CityEntry {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl CityEntry {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }

    /// Lowercased text before the first comma ("berlin" for "Berlin, Germany").
    fn short_name(&self) -> String {
        self.name
            .split(',')
            .next()
            .unwrap_or("")
            .to_lowercase()
    }
}

/// Maps free-text release locations to coordinates.
///
/// Lookup order is exact city name, then a literal `lat, lng` pair, then a
/// case-insensitive match on the short city name. The short-name pass walks
/// the table in order and takes the first hit, so cities sharing a prefix
/// (e.g. "York" inside "New York") resolve to whichever entry comes first.
#[derive(Clone, Debug)]
pub struct Resolver {
    cities: Vec<CityEntry>,
    short_names: Vec<String>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::with_extra(Vec::new())
    }
}

impl Resolver {
    /// Built-in cities first, then `extra` in the given order.
    pub fn with_extra(extra: Vec<CityEntry>) -> Self {
        let mut cities: Vec<CityEntry> = BUILTIN_CITIES
            .iter()
            .map(|(name, lat, lng)| CityEntry {
                name: name.to_string(),
                lat: *lat,
                lng: *lng,
            })
            .collect();
        for entry in extra {
            if entry.name.trim().is_empty() {
                continue;
            }
            if cities.iter().any(|city| city.name == entry.name) {
                debug!("Ignoring duplicate city entry {:?}", entry.name);
                continue;
            }
            cities.push(entry);
        }
        let short_names = cities.iter().map(CityEntry::short_name).collect();
        Self {
            cities,
            short_names,
        }
    }

    pub fn cities(&self) -> &[CityEntry] {
        &self.cities
    }

    pub fn resolve(&self, location: &str) -> Option<Coordinates> {
        let location = location.trim();
        if location.is_empty() {
            return None;
        }

        if let Some(city) = self.cities.iter().find(|city| city.name == location) {
            return Some(city.coordinates());
        }

        if let Some(coords) = parse_lat_lng(location) {
            return Some(coords);
        }

        let lowered = location.to_lowercase();
        self.cities
            .iter()
            .zip(&self.short_names)
            .find(|(_, short)| !short.is_empty() && lowered.contains(short.as_str()))
            .map(|(city, _)| city.coordinates())
    }

    pub fn resolve_record(&self, record: &ReleaseRecord) -> Option<ResolvedPoint> {
        self.resolve(&record.release.location)
            .map(|coordinates| ResolvedPoint {
                key: record.key().to_string(),
                coordinates,
            })
    }

    /// True when `tag` names a known city (case-sensitive short-name match).
    pub fn is_city_tag(&self, tag: &str) -> bool {
        self.cities.iter().any(|city| {
            let short = city.name.split(',').next().unwrap_or("");
            !short.is_empty() && tag.contains(short)
        })
    }
}

static LAT_LNG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-?\d+\.?\d*)[,\s]+(-?\d+\.?\d*)$").expect("lat/lng pattern")
});

fn parse_lat_lng(value: &str) -> Option<Coordinates> {
    let captures = LAT_LNG.captures(value)?;
    let lat: f64 = captures[1].parse().ok()?;
    let lng: f64 = captures[2].parse().ok()?;
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) {
        Some(Coordinates::new(lat, lng))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_exact_city() {
        let resolver = Resolver::default();
        assert_eq!(
            resolver.resolve("Berlin, Germany"),
            Some(Coordinates::new(52.5200, 13.4050))
        );
        assert_eq!(
            resolver.resolve("  Tokyo, Japan "),
            Some(Coordinates::new(35.6762, 139.6503))
        );
    }

    #[test]
    fn resolves_coordinate_pair() {
        let resolver = Resolver::default();
        assert_eq!(
            resolver.resolve("41.8781, -87.6298"),
            Some(Coordinates::new(41.8781, -87.6298))
        );
        assert_eq!(
            resolver.resolve("10 20"),
            Some(Coordinates::new(10.0, 20.0))
        );
        assert_eq!(
            resolver.resolve("-33.5,,  151."),
            Some(Coordinates::new(-33.5, 151.0))
        );
    }

    #[test]
    fn rejects_out_of_range_pairs() {
        let resolver = Resolver::default();
        assert_eq!(resolver.resolve("91, 0"), None);
        assert_eq!(resolver.resolve("0, 180.5"), None);
        assert_eq!(resolver.resolve("1.2.3, 4"), None);
        assert_eq!(resolver.resolve("12, 34 extra"), None);
        assert_eq!(resolver.resolve(".5, 1"), None);
    }

    #[test]
    fn empty_input_is_unresolved() {
        let resolver = Resolver::default();
        assert_eq!(resolver.resolve(""), None);
        assert_eq!(resolver.resolve("   \t"), None);
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let resolver = Resolver::default();
        assert_eq!(
            resolver.resolve("east BERLIN"),
            Some(Coordinates::new(52.5200, 13.4050))
        );
        assert_eq!(
            resolver.resolve("Brooklyn, New York"),
            Some(Coordinates::new(40.7128, -74.0060))
        );
        assert_eq!(resolver.resolve("Reykjavik, Iceland"), None);
    }

    #[test]
    fn shared_prefix_takes_first_table_entry() {
        let resolver = Resolver::with_extra(vec![CityEntry {
            name: "York, UK".to_string(),
            lat: 53.9600,
            lng: -1.0873,
        }]);
        // "new york" is checked before "york" because built-ins come first.
        assert_eq!(
            resolver.resolve("New York City"),
            Some(Coordinates::new(40.7128, -74.0060))
        );
        assert_eq!(
            resolver.resolve("York, UK"),
            Some(Coordinates::new(53.9600, -1.0873))
        );
        assert_eq!(
            resolver.resolve("Yorkshire"),
            Some(Coordinates::new(53.9600, -1.0873))
        );
    }

    #[test]
    fn extra_cities_do_not_replace_builtins() {
        let resolver = Resolver::with_extra(vec![
            CityEntry {
                name: "Berlin, Germany".to_string(),
                lat: 0.0,
                lng: 0.0,
            },
            CityEntry {
                name: " ".to_string(),
                lat: 1.0,
                lng: 1.0,
            },
        ]);
        assert_eq!(resolver.cities().len(), BUILTIN_CITIES.len());
        assert_eq!(
            resolver.resolve("Berlin, Germany"),
            Some(Coordinates::new(52.5200, 13.4050))
        );
    }

    #[test]
    fn city_tags_are_case_sensitive() {
        let resolver = Resolver::default();
        assert!(resolver.is_city_tag("Berlin"));
        assert!(resolver.is_city_tag("London"));
        assert!(!resolver.is_city_tag("berlin"));
        assert!(!resolver.is_city_tag("techno"));
    }
}
