use std::collections::HashMap;

use common::ReleaseRecord;
use serde::Serialize;

use crate::resolve::Resolver;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenreTag {
    pub name: String,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GenreTags {
    pub locations: Vec<GenreTag>,
    pub styles: Vec<GenreTag>,
}

/// Tag counts across `releases`, split into place names and styles.
/// Each list is ordered by count, ties in first-seen order.
pub fn genre_tags(releases: &[ReleaseRecord], resolver: &Resolver) -> GenreTags {
    let mut locations: Vec<GenreTag> = Vec::new();
    let mut styles: Vec<GenreTag> = Vec::new();
    let mut index: HashMap<&str, (bool, usize)> = HashMap::new();

    for record in releases {
        for genre in &record.release.genres {
            match index.get(genre.as_str()) {
                Some(&(true, idx)) => locations[idx].count += 1,
                Some(&(false, idx)) => styles[idx].count += 1,
                None => {
                    let is_location = resolver.is_city_tag(genre);
                    let list = if is_location {
                        &mut locations
                    } else {
                        &mut styles
                    };
                    index.insert(genre.as_str(), (is_location, list.len()));
                    list.push(GenreTag {
                        name: genre.clone(),
                        count: 1,
                    });
                }
            }
        }
    }

    locations.sort_by(|a, b| b.count.cmp(&a.count));
    styles.sort_by(|a, b| b.count.cmp(&a.count));
    GenreTags { locations, styles }
}

pub fn filter_by_genres(releases: &[ReleaseRecord], selected: &[String]) -> Vec<ReleaseRecord> {
    if selected.is_empty() {
        return releases.to_vec();
    }
    releases
        .iter()
        .filter(|record| selected.iter().any(|genre| record.has_genre(genre)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::sample_record;

    fn tagged(key: &str, genres: &[&str]) -> ReleaseRecord {
        let mut record = sample_record(key, "Berlin, Germany", "fan");
        record.release.genres = genres.iter().map(|g| g.to_string()).collect();
        record
    }

    #[test]
    fn splits_locations_from_styles() {
        let releases = vec![
            tagged("a", &["techno", "Berlin"]),
            tagged("b", &["ambient", "techno", "London"]),
            tagged("c", &["techno", "Berlin"]),
        ];
        let tags = genre_tags(&releases, &Resolver::default());
        assert_eq!(
            tags.locations,
            vec![
                GenreTag { name: "Berlin".to_string(), count: 2 },
                GenreTag { name: "London".to_string(), count: 1 },
            ]
        );
        assert_eq!(
            tags.styles,
            vec![
                GenreTag { name: "techno".to_string(), count: 3 },
                GenreTag { name: "ambient".to_string(), count: 1 },
            ]
        );
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let releases = vec![tagged("a", &["dub", "house", "jazz"])];
        let tags = genre_tags(&releases, &Resolver::default());
        let names: Vec<&str> = tags.styles.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["dub", "house", "jazz"]);
    }

    #[test]
    fn empty_selection_keeps_everything() {
        let releases = vec![tagged("a", &["dub"]), tagged("b", &[])];
        assert_eq!(filter_by_genres(&releases, &[]).len(), 2);
    }

    #[test]
    fn selection_matches_any_genre() {
        let releases = vec![
            tagged("a", &["dub"]),
            tagged("b", &["house"]),
            tagged("c", &["jazz", "dub"]),
        ];
        let selected = vec!["dub".to_string(), "missing".to_string()];
        let keys: Vec<String> = filter_by_genres(&releases, &selected)
            .iter()
            .map(|r| r.key().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "c"]);
    }
}
