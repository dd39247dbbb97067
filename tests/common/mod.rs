//! Shared test utilities for integration and E2E tests.
//!
//! Fixtures build small but real Riverscapes projects on disk: a metadata
//! tree, a square extent polygon, single-band GeoTIFFs and GeoPackages.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! let fixture = TestFixture::new();
//! let a = fixture.project("a").with_standard_metadata("wh-a").with_extent(0.0, 0.0);
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};

use geo::{Geometry, LineString};
use project_merge::engine::geopackage::GeoPackage;
use project_merge::engine::geotiff::{GeoGrid, GeoKeys, Raster};
use project_merge::engine::{Codec, SampleType};

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    #[allow(unused_imports)]
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::metadata;
    pub use super::{ProjectFixture, TestFixture};
}

/// Metadata tree snippets.
#[allow(dead_code)]
pub mod metadata {
    /// A project declaring raster `SLOPE`, container `NETWORK` with layer
    /// `reaches`, a log file and an HTML report. `{WAREHOUSE}` is replaced by
    /// the warehouse id.
    pub const STANDARD: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Project>
  <Name>Test project</Name>
  <ProjectType>BRAT</ProjectType>
  <Description>One watershed</Description>
  <Warehouse id="{WAREHOUSE}" apiUrl="https://api.data.riverscapes.net"/>
  <ProjectBounds>
    <Centroid><Lat>0.5</Lat><Lng>0.5</Lng></Centroid>
    <Path>project_bounds.geojson</Path>
  </ProjectBounds>
  <Realizations>
    <Realization id="BRAT">
      <Name>BRAT</Name>
      <Outputs>
        <Raster id="SLOPE"><Name>Slope</Name><Path>outputs/slope.tif</Path></Raster>
        <Geopackage id="NETWORK">
          <Name>Network</Name>
          <Path>outputs/network.gpkg</Path>
          <Layers>
            <Vector lyrName="reaches"><Name>Reaches</Name></Vector>
          </Layers>
        </Geopackage>
        <HTMLFile id="REPORT"><Name>Report</Name><Path>outputs/report.html</Path></HTMLFile>
      </Outputs>
      <Logs>
        <LogFile id="LOG"><Name>Log</Name><Path>brat.log</Path></LogFile>
      </Logs>
    </Realization>
  </Realizations>
</Project>"#;

    pub fn standard(warehouse_id: &str) -> String {
        STANDARD.replace("{WAREHOUSE}", warehouse_id)
    }
}

/// A temporary directory holding any number of projects.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    /// Create a new test fixture with an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Start a project in the sub-directory `name`.
    pub fn project(&self, name: &str) -> ProjectFixture {
        let root = self.temp_dir.child(name);
        root.create_dir_all().expect("Failed to create project directory");
        ProjectFixture {
            root: root.path().to_path_buf(),
        }
    }

    /// Output directory for a merge, not created.
    pub fn output(&self) -> PathBuf {
        self.temp_dir.path().join("merged")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// One project directory under construction.
#[derive(Debug, Clone)]
pub struct ProjectFixture {
    pub root: PathBuf,
}

#[allow(dead_code)]
impl ProjectFixture {
    pub fn path(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    /// Write `project.rs.xml`.
    pub fn with_metadata(self, xml: &str) -> Self {
        std::fs::write(self.root.join("project.rs.xml"), xml).expect("Failed to write metadata");
        self
    }

    pub fn with_standard_metadata(self, warehouse_id: &str) -> Self {
        self.with_metadata(&metadata::standard(warehouse_id))
    }

    /// Write `project_bounds.geojson` holding the unit square at `(x, y)`.
    pub fn with_extent(self, x: f64, y: f64) -> Self {
        self.with_extent_rect(x, y, x + 1.0, y + 1.0)
    }

    pub fn with_extent_rect(self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        let geojson = format!(
            r#"{{"type":"FeatureCollection","features":[{{"type":"Feature","properties":{{}},"geometry":{{"type":"Polygon","coordinates":[[[{min_x},{min_y}],[{max_x},{min_y}],[{max_x},{max_y}],[{min_x},{max_y}],[{min_x},{min_y}]]]}}}}]}}"#
        );
        self.with_file("project_bounds.geojson", &geojson)
    }

    pub fn with_file(self, rel_path: &str, content: &str) -> Self {
        let path = self.root.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create directory");
        }
        std::fs::write(path, content).expect("Failed to write file");
        self
    }

    /// Write a one-row float raster with unit pixels whose upper-left corner
    /// is at `(x, 1.0)`.
    pub fn with_raster(self, rel_path: &str, x: f64, values: &[f64]) -> Self {
        let raster = Raster {
            grid: GeoGrid {
                width: values.len(),
                height: 1,
                origin_x: x,
                origin_y: 1.0,
                pixel_width: 1.0,
                pixel_height: 1.0,
            },
            sample_type: SampleType::F32,
            nodata: Some(-9999.0),
            geokeys: GeoKeys::default(),
            data: values.to_vec(),
        };
        self.with_raster_data(rel_path, &raster)
    }

    pub fn with_raster_data(self, rel_path: &str, raster: &Raster) -> Self {
        let path = self.root.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create directory");
        }
        raster.write(&path, Codec::Lzw).expect("Failed to write raster");
        self
    }

    /// Write a GeoPackage with `count` line features in `layer`, offset along
    /// x by `x` so features from different projects are distinguishable.
    pub fn with_lines(self, rel_path: &str, layer: &str, count: usize, x: f64) -> Self {
        let geometries: Vec<Geometry<f64>> = (0..count)
            .map(|i| {
                let y = i as f64 / count.max(1) as f64;
                Geometry::LineString(LineString::from(vec![(x, y), (x + 0.5, y)]))
            })
            .collect();
        self.with_features(rel_path, layer, "LINESTRING", &geometries)
    }

    pub fn with_features(self, rel_path: &str, layer: &str, geometry_type: &str, geometries: &[Geometry<f64>]) -> Self {
        let path = self.root.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create directory");
        }
        let gpkg = GeoPackage::open_or_create(&path).expect("Failed to create geopackage");
        gpkg.create_layer(layer, 4326, geometry_type, &["name"])
            .expect("Failed to create layer");
        for (i, geometry) in geometries.iter().enumerate() {
            let name = format!("feature {}", i);
            gpkg.insert_feature(layer, geometry, &[("name", name.as_str())])
                .expect("Failed to insert feature");
        }
        self
    }
}
