use std::collections::HashMap;

use common::{marker_id, Coordinates, ResolvedPoint};
use serde::{Deserialize, Serialize};

const TILE_SIZE: f64 = 256.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;
const MAX_LEVEL: u8 = 24;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub const WORLD: Bounds = Bounds {
        west: -180.0,
        south: -85.0,
        east: 180.0,
        north: 85.0,
    };

    /// `west > east` is read as a box crossing the antimeridian.
    pub fn contains(&self, coords: &Coordinates) -> bool {
        if coords.lat < self.south || coords.lat > self.north {
            return false;
        }
        if self.west <= self.east {
            coords.lng >= self.west && coords.lng <= self.east
        } else {
            coords.lng >= self.west || coords.lng <= self.east
        }
    }

    fn around(points: &[&ResolvedPoint]) -> Bounds {
        let mut bounds = Bounds {
            west: f64::INFINITY,
            south: f64::INFINITY,
            east: f64::NEG_INFINITY,
            north: f64::NEG_INFINITY,
        };
        for point in points {
            let c = point.coordinates;
            bounds.west = bounds.west.min(c.lng);
            bounds.east = bounds.east.max(c.lng);
            bounds.south = bounds.south.min(c.lat);
            bounds.north = bounds.north.max(c.lat);
        }
        bounds
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClusterOptions {
    pub radius_px: f64,
    /// At or above this level every point is rendered on its own.
    pub max_zoom: u8,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            radius_px: 30.0,
            max_zoom: 16,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClusterNode {
    Leaf {
        key: String,
        coordinates: Coordinates,
    },
    Cluster {
        id: String,
        coordinates: Coordinates,
        point_count: usize,
        member_keys: Vec<String>,
        bounds: Bounds,
        expansion_zoom: u8,
    },
}

impl ClusterNode {
    pub fn coordinates(&self) -> Coordinates {
        match self {
            ClusterNode::Leaf { coordinates, .. } => *coordinates,
            ClusterNode::Cluster { coordinates, .. } => *coordinates,
        }
    }

    pub fn point_count(&self) -> usize {
        match self {
            ClusterNode::Leaf { .. } => 1,
            ClusterNode::Cluster { point_count, .. } => *point_count,
        }
    }

    pub fn member_keys(&self) -> Vec<&str> {
        match self {
            ClusterNode::Leaf { key, .. } => vec![key.as_str()],
            ClusterNode::Cluster { member_keys, .. } => {
                member_keys.iter().map(String::as_str).collect()
            }
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, ClusterNode::Cluster { .. })
    }
}

/// Groups the points inside `bounds` by on-screen proximity at `zoom`.
///
/// Two points closer than `radius_px` end up in the same node, and so do
/// their neighbours transitively. Nodes come out in the order of their first
/// member in `points`.
pub fn cluster(
    points: &[ResolvedPoint],
    bounds: &Bounds,
    zoom: f64,
    options: &ClusterOptions,
) -> Vec<ClusterNode> {
    let level = zoom_level(zoom);
    let visible: Vec<&ResolvedPoint> = points
        .iter()
        .filter(|point| bounds.contains(&point.coordinates))
        .collect();

    if level >= options.max_zoom || !usable_radius(options.radius_px) {
        return visible.into_iter().map(leaf).collect();
    }

    group_points(&visible, level, options.radius_px)
        .into_iter()
        .map(|members| {
            let members: Vec<&ResolvedPoint> = members.into_iter().map(|i| visible[i]).collect();
            if members.len() == 1 {
                leaf(members[0])
            } else {
                let expansion_zoom = expansion_zoom(&members, level, options);
                group_node(&members, expansion_zoom)
            }
        })
        .collect()
}

/// Lowest level above `level` at which `members` stop forming a single node.
pub fn expansion_zoom(members: &[&ResolvedPoint], level: u8, options: &ClusterOptions) -> u8 {
    let mut next = level.saturating_add(1);
    while next < options.max_zoom {
        if group_points(members, next, options.radius_px).len() > 1 {
            return next;
        }
        next += 1;
    }
    options.max_zoom
}

fn zoom_level(zoom: f64) -> u8 {
    if !zoom.is_finite() || zoom <= 0.0 {
        return 0;
    }
    zoom.floor().min(MAX_LEVEL as f64) as u8
}

fn leaf(point: &ResolvedPoint) -> ClusterNode {
    ClusterNode::Leaf {
        key: point.key.clone(),
        coordinates: point.coordinates,
    }
}

fn group_node(members: &[&ResolvedPoint], expansion_zoom: u8) -> ClusterNode {
    let count = members.len() as f64;
    let lat = members.iter().map(|p| p.coordinates.lat).sum::<f64>() / count;
    let lng = members.iter().map(|p| p.coordinates.lng).sum::<f64>() / count;
    ClusterNode::Cluster {
        id: format!("cluster-{}", marker_id(&members[0].key)),
        coordinates: Coordinates::new(lat, lng),
        point_count: members.len(),
        member_keys: members.iter().map(|p| p.key.clone()).collect(),
        bounds: Bounds::around(members),
        expansion_zoom,
    }
}

/// Web-Mercator pixel position at `level`.
fn project(coords: &Coordinates, level: u8) -> (f64, f64) {
    let world = TILE_SIZE * f64::powi(2.0, level as i32);
    let x = (coords.lng + 180.0) / 360.0 * world;
    let lat = coords.lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let sin = lat.sin();
    let y = (0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * std::f64::consts::PI)) * world;
    (x, y)
}

/// Single-linkage grouping; returns member indices per group.
fn group_points(points: &[&ResolvedPoint], level: u8, radius_px: f64) -> Vec<Vec<usize>> {
    if !usable_radius(radius_px) {
        return (0..points.len()).map(|idx| vec![idx]).collect();
    }
    let radius = radius_px;
    let projected: Vec<(f64, f64)> = points
        .iter()
        .map(|point| project(&point.coordinates, level))
        .collect();

    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (idx, (x, y)) in projected.iter().enumerate() {
        grid.entry(cell_of(*x, *y, radius)).or_default().push(idx);
    }

    let mut sets = DisjointSet::new(points.len());
    for (idx, (x, y)) in projected.iter().enumerate() {
        let (cx, cy) = cell_of(*x, *y, radius);
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(bucket) = grid.get(&(cx.saturating_add(dx), cy.saturating_add(dy))) else {
                    continue;
                };
                for &other in bucket {
                    if other <= idx {
                        continue;
                    }
                    let (ox, oy) = projected[other];
                    let dist = ((ox - x).powi(2) + (oy - y).powi(2)).sqrt();
                    if dist < radius {
                        sets.union(idx, other);
                    }
                }
            }
        }
    }

    let mut order: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for idx in 0..points.len() {
        let root = sets.find(idx);
        match order.get(&root) {
            Some(&group) => groups[group].push(idx),
            None => {
                order.insert(root, groups.len());
                groups.push(vec![idx]);
            }
        }
    }
    groups
}

fn usable_radius(radius_px: f64) -> bool {
    radius_px.is_finite() && radius_px > 0.0
}

fn cell_of(x: f64, y: f64, size: f64) -> (i64, i64) {
    ((x / size).floor() as i64, (y / size).floor() as i64)
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, idx: usize) -> usize {
        let mut root = idx;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = idx;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(key: &str, lat: f64, lng: f64) -> ResolvedPoint {
        ResolvedPoint {
            key: key.to_string(),
            coordinates: Coordinates::new(lat, lng),
        }
    }

    fn scattered() -> Vec<ResolvedPoint> {
        let mut points = Vec::new();
        for i in 0..60 {
            let f = i as f64;
            let lat = ((f * 37.0) % 140.0) - 70.0 + (f * 0.013);
            let lng = ((f * 71.0) % 340.0) - 170.0 + (f * 0.007);
            points.push(point(&format!("p{}", i), lat, lng));
        }
        // a tight city group
        for i in 0..5 {
            points.push(point(&format!("berlin{}", i), 52.52 + i as f64 * 0.001, 13.405));
        }
        points
    }

    #[test]
    fn point_count_sums_to_visible_points() {
        let points = scattered();
        let options = ClusterOptions::default();
        for zoom in 0..=18 {
            let nodes = cluster(&points, &Bounds::WORLD, zoom as f64, &options);
            let total: usize = nodes.iter().map(ClusterNode::point_count).sum();
            assert_eq!(total, points.len(), "zoom {}", zoom);
        }
    }

    #[test]
    fn every_point_lands_in_exactly_one_node() {
        let points = scattered();
        let nodes = cluster(&points, &Bounds::WORLD, 3.0, &ClusterOptions::default());
        let mut seen: Vec<&str> = nodes.iter().flat_map(|n| n.member_keys()).collect();
        seen.sort();
        let mut expected: Vec<&str> = points.iter().map(|p| p.key.as_str()).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn node_count_never_drops_as_zoom_grows() {
        let points = scattered();
        let options = ClusterOptions::default();
        let mut previous = 0;
        for zoom in 0..=18 {
            let count = cluster(&points, &Bounds::WORLD, zoom as f64, &options).len();
            assert!(count >= previous, "zoom {}: {} < {}", zoom, count, previous);
            assert!(count <= points.len());
            previous = count;
        }
    }

    #[test]
    fn max_zoom_renders_only_leaves() {
        let points = scattered();
        let nodes = cluster(&points, &Bounds::WORLD, 16.0, &ClusterOptions::default());
        assert_eq!(nodes.len(), points.len());
        assert!(nodes.iter().all(|n| !n.is_cluster()));
    }

    #[test]
    fn merging_is_transitive() {
        // Each neighbour is ~20px apart at level 2, the ends ~40px apart.
        let degrees_per_px = 360.0 / (256.0 * 4.0);
        let step = 20.0 * degrees_per_px;
        let points = vec![
            point("a", 0.0, 0.0),
            point("b", 0.0, step),
            point("c", 0.0, 2.0 * step),
        ];
        let nodes = cluster(&points, &Bounds::WORLD, 2.0, &ClusterOptions::default());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].point_count(), 3);
        let centroid = nodes[0].coordinates();
        assert!((centroid.lng - step).abs() < 1e-9);
    }

    #[test]
    fn centroid_is_mean_of_members() {
        let points = vec![point("a", 10.0, 10.0), point("b", 10.2, 10.4)];
        let nodes = cluster(&points, &Bounds::WORLD, 2.0, &ClusterOptions::default());
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            ClusterNode::Cluster {
                coordinates,
                point_count,
                bounds,
                expansion_zoom,
                ..
            } => {
                assert!((coordinates.lat - 10.1).abs() < 1e-9);
                assert!((coordinates.lng - 10.2).abs() < 1e-9);
                assert_eq!(*point_count, 2);
                assert_eq!(bounds.west, 10.0);
                assert_eq!(bounds.north, 10.2);
                assert!(*expansion_zoom > 2 && *expansion_zoom <= 16);
            }
            other => panic!("expected cluster, got {:?}", other),
        }
    }

    #[test]
    fn expansion_zoom_splits_the_group() {
        let points = vec![point("a", 10.0, 10.0), point("b", 10.2, 10.4)];
        let options = ClusterOptions::default();
        let nodes = cluster(&points, &Bounds::WORLD, 2.0, &options);
        let ClusterNode::Cluster { expansion_zoom, .. } = &nodes[0] else {
            panic!("expected cluster");
        };
        let below = cluster(&points, &Bounds::WORLD, (*expansion_zoom - 1) as f64, &options);
        let at = cluster(&points, &Bounds::WORLD, *expansion_zoom as f64, &options);
        assert_eq!(below.len(), 1);
        assert_eq!(at.len(), 2);
    }

    #[test]
    fn unusable_radius_renders_leaves() {
        let points = vec![point("a", 52.52, 13.405), point("b", 52.52, 13.406)];
        for radius_px in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let options = ClusterOptions {
                radius_px,
                max_zoom: 16,
            };
            let nodes = cluster(&points, &Bounds::WORLD, 3.0, &options);
            assert_eq!(nodes.len(), 2, "radius {}", radius_px);
            assert!(nodes.iter().all(|n| !n.is_cluster()));
        }
    }

    #[test]
    fn coincident_points_stay_grouped_until_max_zoom() {
        let points = vec![point("a", 52.52, 13.405), point("b", 52.52, 13.405)];
        let options = ClusterOptions::default();
        let nodes = cluster(&points, &Bounds::WORLD, 15.0, &options);
        assert_eq!(nodes.len(), 1);
        let ClusterNode::Cluster { expansion_zoom, .. } = &nodes[0] else {
            panic!("expected cluster");
        };
        assert_eq!(*expansion_zoom, options.max_zoom);
    }

    #[test]
    fn viewport_filters_points() {
        let points = vec![
            point("berlin", 52.52, 13.405),
            point("tokyo", 35.6762, 139.6503),
            point("pole", 89.0, 0.0),
        ];
        let europe = Bounds {
            west: -10.0,
            south: 35.0,
            east: 30.0,
            north: 60.0,
        };
        let nodes = cluster(&points, &europe, 4.0, &ClusterOptions::default());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].member_keys(), vec!["berlin"]);

        let world = cluster(&points, &Bounds::WORLD, 4.0, &ClusterOptions::default());
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn antimeridian_bounds_wrap() {
        let pacific = Bounds {
            west: 170.0,
            south: -50.0,
            east: -170.0,
            north: 50.0,
        };
        assert!(pacific.contains(&Coordinates::new(0.0, 175.0)));
        assert!(pacific.contains(&Coordinates::new(0.0, -175.0)));
        assert!(!pacific.contains(&Coordinates::new(0.0, 0.0)));
    }

    #[test]
    fn recomputation_is_deterministic() {
        let points = scattered();
        let options = ClusterOptions::default();
        let first = cluster(&points, &Bounds::WORLD, 5.0, &options);
        let second = cluster(&points, &Bounds::WORLD, 5.0, &options);
        assert_eq!(first, second);
    }

    #[test]
    fn fractional_zoom_uses_floor_level() {
        let points = scattered();
        let options = ClusterOptions::default();
        assert_eq!(
            cluster(&points, &Bounds::WORLD, 4.9, &options),
            cluster(&points, &Bounds::WORLD, 4.0, &options)
        );
    }
}
