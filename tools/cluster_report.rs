use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};

use atlas::{cluster, genre_tags, Bounds, ClusterNode, ClusterOptions, Resolver};
use common::ReleaseRecord;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let dump_path = args
        .next()
        .or_else(|| env::var("RELEASE_DUMP").ok())
        .ok_or("RELEASE_DUMP not set and no path argument")?;
    let zoom: f64 = match args.next() {
        Some(value) => value.parse()?,
        None => 2.0,
    };

    let reader = BufReader::new(File::open(&dump_path)?);
    let mut releases: Vec<ReleaseRecord> = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ReleaseRecord>(&line) {
            Ok(record) => releases.push(record),
            Err(err) => warn!("Skipping line {}: {}", number + 1, err),
        }
    }

    let resolver = Resolver::default();
    let points: Vec<_> = releases
        .iter()
        .filter_map(|record| resolver.resolve_record(record))
        .collect();
    let nodes = cluster(&points, &Bounds::WORLD, zoom, &ClusterOptions::default());

    println!(
        "{} releases, {} placed, {} nodes at zoom {}",
        releases.len(),
        points.len(),
        nodes.len(),
        zoom
    );
    for node in &nodes {
        let at = node.coordinates();
        match node {
            ClusterNode::Leaf { key, .. } => {
                println!("  leaf    ({:>8.3}, {:>8.3})  {}", at.lat, at.lng, key);
            }
            ClusterNode::Cluster {
                point_count,
                expansion_zoom,
                ..
            } => {
                println!(
                    "  cluster ({:>8.3}, {:>8.3})  {} releases, splits at zoom {}",
                    at.lat, at.lng, point_count, expansion_zoom
                );
            }
        }
    }

    let tags = genre_tags(&releases, &resolver);
    let top: Vec<String> = tags
        .styles
        .iter()
        .take(10)
        .map(|tag| format!("{} ({})", tag.name, tag.count))
        .collect();
    if !top.is_empty() {
        println!("Top styles: {}", top.join(", "));
    }

    Ok(())
}
