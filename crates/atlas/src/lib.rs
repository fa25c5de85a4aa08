pub mod cluster;
pub mod resolve;
pub mod tags;

pub use cluster::{cluster, expansion_zoom, Bounds, ClusterNode, ClusterOptions};
pub use resolve::{CityEntry, Resolver};
pub use tags::{filter_by_genres, genre_tags, GenreTag, GenreTags};
