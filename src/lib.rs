//! # Project Merge Library
//!
//! This library merges several independently produced Riverscapes projects of
//! the same type into one consolidated project. It is designed to be used by
//! the `merge-projects` command-line tool but can also be driven directly by
//! other applications.
//!
//! ## Quick Example
//!
//! ```
//! use project_merge::filter::InclusionFilter;
//! use project_merge::config::{project_type_label, Stage};
//!
//! // Only merge GeoPackages and rasters
//! let filter = InclusionFilter::new(&[r".*\.gpkg", r".*\.tif"]).unwrap();
//! assert!(filter.matches("outputs/brat.gpkg"));
//! assert!(filter.matches("project_bounds.geojson"));
//! assert!(!filter.matches("outputs/report.html"));
//!
//! assert_eq!(project_type_label("RSContext"), "RS Context");
//! assert_eq!(Stage::parse("staging").unwrap(), Stage::Staging);
//! ```
//!
//! ## Core Concepts
//!
//! - **Projects (`project`, `metadata`)**: A project is a directory holding
//!   geospatial artifacts and a `project.rs.xml` metadata tree that declares
//!   them.
//! - **Catalogs (`catalog`, `filter`)**: Declarations across projects are
//!   grouped by identity (the declaration's `id`), keeping only paths that
//!   pass the inclusion filter.
//! - **Engines (`engine`)**: Raster mosaicking and GeoPackage appends sit
//!   behind traits. The native engine is pure Rust; the `gdal-cli` engine
//!   shells out to the GDAL utilities.
//! - **Phases (`phases`)**: The merge pipeline, from reading projects to
//!   writing the merged metadata tree.
//!
//! ## Execution Flow
//!
//! The main entry point is `phases::orchestrator::execute_merge`:
//!
//! 1.  **Reading and Cataloguing**: Read every project and build the catalogs.
//! 2.  **Spatial Union**: Union the extent polygons into `project_bounds.geojson`.
//! 3.  **Raster Merging**: Mosaic each raster identity.
//! 4.  **Vector Merging**: Merge each GeoPackage identity layer by layer.
//! 5.  **Metadata Synthesis**: Write the merged `project.rs.xml`.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod logsink;
pub mod metadata;
pub mod phases;
pub mod project;

pub use error::{Error, Result};
pub use phases::orchestrator::{execute_merge, MergeReport, MergeRequest};

#[cfg(test)]
mod union_proptest;
