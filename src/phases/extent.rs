//! Phase 2: Spatial Union
//!
//! Reads the extent polygon of every valid project, unions them into one
//! coverage polygon, and writes it to `project_bounds.geojson` in the output
//! directory.
//!
//! ## Process
//!
//! 1.  **Read**: Each extent file is a GeoJSON `FeatureCollection`, `Feature`
//!     or bare geometry. The first feature's geometry is used and must be a
//!     `Polygon` or `MultiPolygon`.
//!
//! 2.  **Union**: The first polygon seeds the accumulator; every later one is
//!     unioned in with `geo`'s boolean operations.
//!
//! 3.  **Clean**: Interior rings (holes between adjacent project extents) are
//!     discarded; only outer boundaries are kept.
//!
//! 4.  **Summarize**: Centroid and bounding rectangle feed the merged
//!     metadata tree's `<ProjectBounds>`.
//!
//! Any failure here is fatal for the whole merge.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use geo::{BooleanOps, BoundingRect as _, Centroid, Geometry, MultiPolygon, Point, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};

use crate::error::{Error, Result};
use crate::logsink::LogSink;

/// File name of the merged extent polygon.
pub const BOUNDS_FILE: &str = "project_bounds.geojson";

/// Axis-aligned bounding rectangle of the merged extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingRect {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingRect {
    /// Components in `(min_x, max_x, min_y, max_y)` order.
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.min_x, self.max_x, self.min_y, self.max_y)
    }
}

/// Result of the spatial union.
#[derive(Debug, Clone)]
pub struct ExtentSummary {
    /// The cleaned union: a `Polygon` when it has one part, else a `MultiPolygon`.
    pub polygon: Geometry<f64>,
    pub centroid: Point<f64>,
    pub bounding_rect: BoundingRect,
    /// Where the union was written.
    pub path: PathBuf,
}

/// Union `extent_files` and write the result to `output_file`.
pub fn union_extents(extent_files: &[PathBuf], output_file: &Path) -> Result<ExtentSummary> {
    if extent_files.is_empty() {
        return Err(Error::InsufficientInput {
            message: "no extent polygons to union".to_string(),
        });
    }

    let polygons = extent_files
        .iter()
        .map(|path| read_extent(path))
        .collect::<Result<Vec<_>>>()?;

    let union = strip_interiors(union_all(polygons));

    let invalid = |message: &str| Error::Extent {
        path: output_file.to_path_buf(),
        message: message.to_string(),
    };
    let centroid = union.centroid().ok_or_else(|| invalid("union is empty"))?;
    let rect = union.bounding_rect().ok_or_else(|| invalid("union is empty"))?;

    let polygon = if union.0.len() == 1 {
        let mut parts = union.0;
        Geometry::Polygon(parts.remove(0))
    } else {
        Geometry::MultiPolygon(union)
    };

    write_extent(&polygon, output_file)?;

    Ok(ExtentSummary {
        polygon,
        centroid,
        bounding_rect: BoundingRect {
            min_x: rect.min().x,
            max_x: rect.max().x,
            min_y: rect.min().y,
            max_y: rect.max().y,
        },
        path: output_file.to_path_buf(),
    })
}

/// Execute Phase 2: union the extents into `<output_dir>/project_bounds.geojson`.
pub fn execute(extent_files: &[PathBuf], output_dir: &Path, log: &LogSink) -> Result<ExtentSummary> {
    let log = log.scoped("extent");
    log.info(format!("Unioning {} extent polygon(s)", extent_files.len()));

    let summary = union_extents(extent_files, &output_dir.join(BOUNDS_FILE))?;
    let (min_x, max_x, min_y, max_y) = summary.bounding_rect.as_tuple();
    log.info(format!(
        "Merged extent centroid ({}, {}), bounds x {}..{} y {}..{}",
        summary.centroid.x(),
        summary.centroid.y(),
        min_x,
        max_x,
        min_y,
        max_y
    ));
    Ok(summary)
}

/// Fold polygons into their union, in order.
pub(crate) fn union_all(polygons: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    let mut polygons = polygons.into_iter();
    let Some(first) = polygons.next() else {
        return MultiPolygon::new(Vec::new());
    };
    polygons.fold(first, |acc, next| acc.union(&next))
}

/// Drop every interior ring.
pub(crate) fn strip_interiors(polygons: MultiPolygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(
        polygons
            .0
            .into_iter()
            .map(|p| Polygon::new(p.exterior().clone(), Vec::new()))
            .collect(),
    )
}

fn read_extent(path: &Path) -> Result<MultiPolygon<f64>> {
    let malformed = |message: String| Error::Extent {
        path: path.to_path_buf(),
        message,
    };

    let text = fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
    let geojson = GeoJson::from_str(&text).map_err(|e| malformed(e.to_string()))?;

    let geometry = match geojson {
        GeoJson::Geometry(geometry) => Some(geometry),
        GeoJson::Feature(feature) => feature.geometry,
        GeoJson::FeatureCollection(collection) => {
            collection.features.into_iter().next().and_then(|f| f.geometry)
        }
    }
    .ok_or_else(|| malformed("no geometry".to_string()))?;

    match Geometry::<f64>::try_from(geometry).map_err(|e| malformed(e.to_string()))? {
        Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(polygons) => Ok(polygons),
        _ => Err(malformed("extent is not a polygon".to_string())),
    }
}

fn write_extent(polygon: &Geometry<f64>, output_file: &Path) -> Result<()> {
    let feature = Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(polygon))),
        id: None,
        properties: Some(JsonObject::new()),
        foreign_members: None,
    };
    let collection = FeatureCollection {
        bbox: None,
        features: vec![feature],
        foreign_members: None,
    };

    if let Some(parent) = output_file.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::filesystem("create directory", parent, e))?;
    }
    fs::write(output_file, collection.to_string()).map_err(|e| Error::Extent {
        path: output_file.to_path_buf(),
        message: e.to_string(),
    })
}
