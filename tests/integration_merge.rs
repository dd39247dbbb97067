//! Integration tests for the complete merge pipeline
//!
//! These tests build real projects on disk and run `execute_merge` with the
//! native engine.

mod common;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use common::prelude::*;
use geo::{Area, Geometry, LineString, Polygon};
use project_merge::config::Stage;
use project_merge::engine::geopackage::GeoPackage;
use project_merge::engine::geotiff::{GeoGrid, GeoKeys, Raster};
use project_merge::engine::{AppendRequest, NativeEngine, SampleType, VectorEngine};
use project_merge::logsink::LogSink;
use project_merge::metadata::{tags, MetadataTree};
use project_merge::{execute_merge, Error, MergeRequest};
use tiff::decoder::Decoder;
use tiff::tags::Tag;

fn request(roots: Vec<PathBuf>, output_dir: PathBuf) -> MergeRequest {
    MergeRequest {
        project_roots: roots,
        output_dir,
        name: "Test Merged BRAT".to_string(),
        project_type: "BRAT".to_string(),
        collection_id: None,
        stage: Stage::Production,
        include: Vec::new(),
        delete_source: false,
    }
}

/// Two adjacent unit-square projects sharing raster `SLOPE` and container
/// `NETWORK`.
fn two_projects(fixture: &TestFixture) -> (ProjectFixture, ProjectFixture) {
    let a = fixture
        .project("a")
        .with_standard_metadata("wh-a")
        .with_extent(0.0, 0.0)
        .with_raster("outputs/slope.tif", 0.0, &[1.0])
        .with_lines("outputs/network.gpkg", "reaches", 3, 0.0);
    let b = fixture
        .project("b")
        .with_standard_metadata("wh-b")
        .with_extent(1.0, 0.0)
        .with_raster("outputs/slope.tif", 1.0, &[2.0])
        .with_lines("outputs/network.gpkg", "reaches", 4, 1.0);
    (a, b)
}

#[test]
fn test_end_to_end_merge_of_two_projects() {
    let fixture = TestFixture::new();
    let (a, b) = two_projects(&fixture);
    let output = fixture.output();

    let report = execute_merge(
        &request(vec![a.root.clone(), b.root.clone()], output.clone()),
        &NativeEngine,
        &LogSink::console(),
    )
    .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.projects_read, vec!["wh-a".to_string(), "wh-b".to_string()]);
    assert_eq!(report.rasters.merged, vec!["SLOPE".to_string()]);
    assert_eq!(report.containers.merged, vec!["NETWORK".to_string()]);

    // Raster mosaic spans both projects
    let slope = Raster::read(&output.join("outputs/slope.tif")).unwrap();
    assert_eq!(slope.grid.bounds(), (0.0, 2.0, 0.0, 1.0));
    assert_eq!(slope.data, vec![1.0, 2.0]);

    // Features are concatenated
    let network = GeoPackage::open_read_only(&output.join("outputs/network.gpkg")).unwrap();
    assert_eq!(network.feature_count("reaches").unwrap(), 7);

    // Extent union
    let (cx, cy) = (report.extent.centroid.x(), report.extent.centroid.y());
    assert!((cx - 1.0).abs() < 1e-9 && (cy - 0.5).abs() < 1e-9);
    assert_eq!(report.extent.bounding_rect.as_tuple(), (0.0, 2.0, 0.0, 1.0));
    assert!(output.join("project_bounds.geojson").is_file());

    // Metadata lists exactly the surviving artifacts
    let tree = MetadataTree::load(&report.metadata_path).unwrap();
    let root = tree.root().unwrap();
    assert_eq!(tree.child_text(root, tags::NAME).as_deref(), Some("Test Merged BRAT"));
    assert!(tree.child_named(root, tags::WAREHOUSE).is_none());
    let paths: Vec<String> = tree
        .descendants_named(root, tags::PATH)
        .into_iter()
        .filter_map(|p| tree.text(p))
        .collect();
    assert!(paths.contains(&"outputs/slope.tif".to_string()));
    assert!(paths.contains(&"outputs/network.gpkg".to_string()));
    assert!(paths.contains(&"project_bounds.geojson".to_string()));
    assert!(!paths.iter().any(|p| p.ends_with(".html")));
    // No merge log was written, so log declarations are dropped
    assert!(tree.descendants_named(root, tags::LOG_FILE).is_empty());
}

#[test]
fn test_metadata_records_provenance() {
    let fixture = TestFixture::new();
    let (a, b) = two_projects(&fixture);
    let output = fixture.output();
    let mut req = request(vec![a.root, b.root], output.clone());
    req.collection_id = Some("c-1".to_string());
    req.stage = Stage::Staging;

    let report = execute_merge(&req, &NativeEngine, &LogSink::console()).unwrap();

    let tree = MetadataTree::load(&report.metadata_path).unwrap();
    let root = tree.root().unwrap();
    let metas = tree.descendants_named(root, tags::META);
    let meta = |name: &str| {
        metas
            .iter()
            .find(|m| tree.attribute(**m, tags::ATTR_NAME).as_deref() == Some(name))
            .and_then(|m| tree.text(*m))
    };

    let projects: Vec<String> = serde_json::from_str(&meta("projects").unwrap()).unwrap();
    assert_eq!(
        projects,
        vec![
            "https://staging.data.riverscapes.net/p/wh-a".to_string(),
            "https://staging.data.riverscapes.net/p/wh-b".to_string(),
        ]
    );
    assert_eq!(meta("Merge Type").as_deref(), Some("BRAT"));
    assert_eq!(meta("Collection ID").as_deref(), Some("c-1"));
    assert!(meta("Date Created").unwrap().ends_with('Z'));
}

#[test]
fn test_log_file_declarations_point_at_merge_log() {
    let fixture = TestFixture::new();
    let (a, b) = two_projects(&fixture);
    let output = fixture.output();
    let log = LogSink::with_file(output.join("merge-projects.log")).unwrap();

    let report = execute_merge(&request(vec![a.root, b.root], output.clone()), &NativeEngine, &log).unwrap();

    let tree = MetadataTree::load(&report.metadata_path).unwrap();
    let root = tree.root().unwrap();
    let logs = tree.descendants_named(root, tags::LOG_FILE);
    assert_eq!(logs.len(), 1);
    assert_eq!(tree.child_text(logs[0], tags::PATH).as_deref(), Some("merge-projects.log"));

    let content = std::fs::read_to_string(output.join("merge-projects.log")).unwrap();
    assert!(content.contains("Merge complete"));
}

#[test]
fn test_occurrence_counts_follow_inclusion_filter() {
    let fixture = TestFixture::new();
    let (a, b) = two_projects(&fixture);
    let c = fixture.project("c").with_standard_metadata("wh-c").with_extent(2.0, 0.0);
    let output = fixture.output();
    let mut req = request(vec![a.root, b.root, c.root], output.clone());
    req.include = vec![r".*\.gpkg".to_string()];

    let report = execute_merge(&req, &NativeEngine, &LogSink::console()).unwrap();

    // Rasters are filtered out entirely
    assert!(report.rasters.merged.is_empty());
    assert!(!output.join("outputs/slope.tif").exists());
    // Project c declares the container but has no file: its append is skipped
    assert_eq!(report.containers.merged, vec!["NETWORK".to_string()]);
    let network = GeoPackage::open_read_only(&output.join("outputs/network.gpkg")).unwrap();
    assert_eq!(network.feature_count("reaches").unwrap(), 7);
}

#[test]
fn test_last_listed_raster_wins_on_overlap() {
    let fixture = TestFixture::new();
    let a = fixture
        .project("a")
        .with_standard_metadata("wh-a")
        .with_extent(0.0, 0.0)
        .with_raster("outputs/slope.tif", 0.0, &[1.0, 2.0]);
    let b = fixture
        .project("b")
        .with_standard_metadata("wh-b")
        .with_extent(0.0, 0.0)
        .with_raster("outputs/slope.tif", 0.0, &[-9999.0, 5.0]);
    let output = fixture.output();

    execute_merge(&request(vec![a.root, b.root], output.clone()), &NativeEngine, &LogSink::console()).unwrap();

    let slope = Raster::read(&output.join("outputs/slope.tif")).unwrap();
    assert_eq!(slope.data, vec![1.0, 5.0]);
}

#[test]
fn test_delete_source_removes_rasters_only_after_merge() {
    let fixture = TestFixture::new();
    let (a, b) = two_projects(&fixture);
    let output = fixture.output();
    let mut req = request(vec![a.root.clone(), b.root.clone()], output.clone());
    req.delete_source = true;

    execute_merge(&req, &NativeEngine, &LogSink::console()).unwrap();

    assert!(output.join("outputs/slope.tif").is_file());
    assert!(!a.path("outputs/slope.tif").exists());
    assert!(!b.path("outputs/slope.tif").exists());
    assert!(a.path("outputs/network.gpkg").exists());
}

#[test]
fn test_failing_identity_does_not_stop_others() {
    let fixture = TestFixture::new();
    let a = fixture
        .project("a")
        .with_standard_metadata("wh-a")
        .with_extent(0.0, 0.0)
        .with_raster("outputs/slope.tif", 0.0, &[1.0])
        .with_lines("outputs/network.gpkg", "reaches", 3, 0.0);
    // b declares the raster but never produced it
    let b = fixture
        .project("b")
        .with_standard_metadata("wh-b")
        .with_extent(1.0, 0.0)
        .with_lines("outputs/network.gpkg", "reaches", 4, 1.0);
    let output = fixture.output();

    let report =
        execute_merge(&request(vec![a.root, b.root], output.clone()), &NativeEngine, &LogSink::console()).unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.rasters.failed.len(), 1);
    assert_eq!(report.rasters.failed[0].identity, "SLOPE");
    assert_eq!(report.containers.merged, vec!["NETWORK".to_string()]);

    // The unmerged raster is pruned from the metadata
    let tree = MetadataTree::load(&report.metadata_path).unwrap();
    let root = tree.root().unwrap();
    assert!(tree.descendants_named(root, tags::RASTER).is_empty());
}

#[test]
fn test_rerun_replaces_previous_outputs() {
    let fixture = TestFixture::new();
    let (a, b) = two_projects(&fixture);
    let output = fixture.output();
    let req = request(vec![a.root, b.root], output.clone());

    execute_merge(&req, &NativeEngine, &LogSink::console()).unwrap();
    execute_merge(&req, &NativeEngine, &LogSink::console()).unwrap();

    let network = GeoPackage::open_read_only(&output.join("outputs/network.gpkg")).unwrap();
    assert_eq!(network.feature_count("reaches").unwrap(), 7);
}

#[test]
fn test_rerun_drops_mosaic_of_failed_identity() {
    let fixture = TestFixture::new();
    let (a, b) = two_projects(&fixture);
    let output = fixture.output();
    let req = request(vec![a.root, b.root.clone()], output.clone());

    execute_merge(&req, &NativeEngine, &LogSink::console()).unwrap();
    assert!(output.join("outputs/slope.tif").is_file());

    std::fs::remove_file(b.root.join("outputs/slope.tif")).unwrap();
    let report = execute_merge(&req, &NativeEngine, &LogSink::console()).unwrap();

    assert_eq!(report.rasters.failed.len(), 1);
    assert!(!output.join("outputs/slope.tif").exists());
    let metadata = std::fs::read_to_string(output.join("project.rs.xml")).unwrap();
    assert!(!metadata.contains("outputs/slope.tif"));
}

#[test]
fn test_invalid_projects_are_skipped() {
    let fixture = TestFixture::new();
    let (a, b) = two_projects(&fixture);
    let broken = fixture.project("broken").with_metadata("<Project><Name>");
    let output = fixture.output();

    let report = execute_merge(
        &request(vec![broken.root.clone(), a.root, b.root], output),
        &NativeEngine,
        &LogSink::console(),
    )
    .unwrap();

    assert_eq!(report.projects_read.len(), 2);
    assert_eq!(report.projects_skipped.len(), 1);
    assert_eq!(report.projects_skipped[0].root, broken.root);
}

#[test]
fn test_no_valid_project_is_fatal() {
    let fixture = TestFixture::new();
    let empty = fixture.project("empty");

    let result = execute_merge(&request(vec![empty.root], fixture.output()), &NativeEngine, &LogSink::console());
    assert!(matches!(result, Err(Error::InsufficientInput { .. })));
}

#[test]
fn test_missing_extents_are_fatal() {
    let fixture = TestFixture::new();
    let a = fixture.project("a").with_standard_metadata("wh-a");

    let result = execute_merge(&request(vec![a.root], fixture.output()), &NativeEngine, &LogSink::console());
    assert!(matches!(result, Err(Error::InsufficientInput { .. })));
}

#[test]
fn test_malformed_extent_is_fatal() {
    let fixture = TestFixture::new();
    let a = fixture
        .project("a")
        .with_standard_metadata("wh-a")
        .with_file("project_bounds.geojson", "{ not json");

    let result = execute_merge(&request(vec![a.root], fixture.output()), &NativeEngine, &LogSink::console());
    assert!(matches!(result, Err(Error::Extent { .. })));
}

#[test]
fn test_flowline_layers_add_up() {
    let fixture = TestFixture::new();
    let a = fixture.project("a").with_lines("hydro.gpkg", "Flowlines", 5, 0.0);
    let b = fixture.project("b").with_lines("hydro.gpkg", "Flowlines", 7, 1.0);
    let output = fixture.path().join("hydro.gpkg");

    for source in [a.path("hydro.gpkg"), b.path("hydro.gpkg")] {
        NativeEngine
            .append_layer(&AppendRequest {
                source: &source,
                output: &output,
                layer: "Flowlines",
                make_valid: true,
            })
            .unwrap();
    }

    let merged = GeoPackage::open_read_only(&output).unwrap();
    assert_eq!(merged.feature_count("Flowlines").unwrap(), 12);
    assert_eq!(merged.bounds("Flowlines").unwrap(), Some((0.0, 1.5, 0.0, 6.0 / 7.0)));
}

#[test]
fn test_invalid_polygons_are_repaired_on_append() {
    let fixture = TestFixture::new();
    let bowtie = Polygon::new(
        LineString::from(vec![(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]),
        Vec::new(),
    );
    let a = fixture
        .project("a")
        .with_features("areas.gpkg", "Areas", "POLYGON", &[Geometry::Polygon(bowtie)]);
    let output = fixture.path().join("areas.gpkg");

    NativeEngine
        .append_layer(&AppendRequest {
            source: &a.path("areas.gpkg"),
            output: &output,
            layer: "Areas",
            make_valid: true,
        })
        .unwrap();

    let merged = GeoPackage::open_read_only(&output).unwrap();
    let geometries = merged.geometries("Areas").unwrap();
    let mut area = 0.0;
    for geometry in geometries.iter().flatten() {
        assert!(matches!(geometry, Geometry::Polygon(_)), "POLYGON layer got {:?}", geometry);
        area += geometry.unsigned_area();
    }
    assert!((area - 2.0).abs() < 1e-9, "repaired area was {}", area);
}

#[test]
fn test_integer_rasters_use_deflate() {
    let fixture = TestFixture::new();
    let dem = |x: f64, value: f64| Raster {
        grid: GeoGrid {
            width: 1,
            height: 1,
            origin_x: x,
            origin_y: 1.0,
            pixel_width: 1.0,
            pixel_height: 1.0,
        },
        sample_type: SampleType::I16,
        nodata: None,
        geokeys: GeoKeys::default(),
        data: vec![value],
    };
    let a = fixture
        .project("a")
        .with_standard_metadata("wh-a")
        .with_extent(0.0, 0.0)
        .with_raster_data("outputs/slope.tif", &dem(0.0, 100.0));
    let b = fixture
        .project("b")
        .with_standard_metadata("wh-b")
        .with_extent(1.0, 0.0)
        .with_raster_data("outputs/slope.tif", &dem(1.0, 200.0));
    let output = fixture.output();

    execute_merge(&request(vec![a.root, b.root], output.clone()), &NativeEngine, &LogSink::console()).unwrap();

    let path = output.join("outputs/slope.tif");
    let mut decoder = Decoder::new(BufReader::new(File::open(&path).unwrap())).unwrap();
    let compression = decoder.find_tag(Tag::Compression).unwrap().unwrap().into_u16().unwrap();
    assert!(compression == 8 || compression == 32946, "compression {}", compression);

    let merged = Raster::read(&path).unwrap();
    assert_eq!(merged.sample_type, SampleType::I16);
    assert_eq!(merged.data, vec![100.0, 200.0]);
}
