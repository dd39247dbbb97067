//! Benchmarks for the extent union.
//!
//! These benchmarks measure reading, unioning and writing project extent
//! polygons for merges of various sizes. Extents are unit squares laid out
//! on a grid with a small overlap between neighbours.

use std::path::PathBuf;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use project_merge::phases::extent::union_extents;
use tempfile::TempDir;

/// Write `count` overlapping square extents into `dir`.
fn write_extents(dir: &TempDir, count: usize) -> Vec<PathBuf> {
    let columns = (count as f64).sqrt().ceil() as usize;
    (0..count)
        .map(|i| {
            let x = (i % columns) as f64 * 0.9;
            let y = (i / columns) as f64 * 0.9;
            let geojson = format!(
                r#"{{"type":"FeatureCollection","features":[{{"type":"Feature","properties":{{}},"geometry":{{"type":"Polygon","coordinates":[[[{x},{y}],[{x1},{y}],[{x1},{y1}],[{x},{y1}],[{x},{y}]]]}}}}]}}"#,
                x = x,
                y = y,
                x1 = x + 1.0,
                y1 = y + 1.0
            );
            let path = dir.path().join(format!("extent_{}.geojson", i));
            std::fs::write(&path, geojson).expect("Failed to write extent");
            path
        })
        .collect()
}

fn bench_union(c: &mut Criterion) {
    let mut group = c.benchmark_group("extent_union");

    for count in [2usize, 10, 50] {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let extents = write_extents(&dir, count);
        let output = dir.path().join("project_bounds.geojson");

        group.bench_with_input(BenchmarkId::from_parameter(count), &extents, |b, extents| {
            b.iter(|| union_extents(black_box(extents), &output).expect("union failed"))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_union);
criterion_main!(benches);
