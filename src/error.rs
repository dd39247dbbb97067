//! # Error Handling
//!
//! This module defines the centralized error type for `project-merge`. It uses
//! the `thiserror` library to build one `Error` enum covering every failure
//! mode of a merge, each variant carrying enough context (project, identity,
//! path) to diagnose the failure without re-running the merge.
//!
//! ## Severity
//!
//! The variants fall into the three severities the merge pipeline
//! distinguishes:
//!
//! - **Input-skip**: `MetadataParse` for one project, or an `Engine` failure
//!   for one occurrence. Logged at the origin; the unit is skipped.
//! - **Identity-fatal**: `Raster` / `Vector` errors for one catalog entry.
//!   Logged and reported; other identities proceed.
//! - **Merge-fatal**: `InsufficientInput`, `Extent` and `Metadata`. These
//!   propagate to the caller, which reports failure.
//!
//! `Result<T>` is a type alias for `std::result::Result<T, Error>`.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for project merge operations
#[derive(Error, Debug)]
pub enum Error {
    /// A project's metadata tree is missing or cannot be parsed.
    #[error("Metadata parse error in {}: {message}", path.display())]
    MetadataParse { path: PathBuf, message: String },

    /// The merge was given too little input to produce a result.
    #[error("Insufficient input: {message}")]
    InsufficientInput { message: String },

    /// An extent polygon could not be read, unioned or written.
    #[error("Extent error for {}: {message}", path.display())]
    Extent { path: PathBuf, message: String },

    /// A raster identity could not be merged.
    #[error("Raster merge error for '{identity}': {message}")]
    Raster { identity: String, message: String },

    /// A vector container identity could not be merged.
    #[error("Vector merge error for '{identity}': {message}")]
    Vector { identity: String, message: String },

    /// The geometry/raster engine reported a failure.
    ///
    /// `operation` names the engine call (e.g. `mosaic`, `append_layer`).
    #[error("Engine error during {operation}: {message}")]
    Engine { operation: String, message: String },

    /// The merged metadata tree could not be synthesized or written.
    #[error("Metadata synthesis error: {message}")]
    Metadata { message: String },

    /// Configuration file or option error.
    #[error("Configuration error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    Config {
        message: String,
        /// Optional hint for how to fix the configuration
        hint: Option<String>,
    },

    /// A filesystem operation on an output or source file failed.
    #[error("Filesystem operation error: {message}")]
    Filesystem { message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A GeoJSON error, wrapped from `geojson::Error`.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// A TIFF decoding or encoding error, wrapped from `tiff::TiffError`.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// A SQLite error, wrapped from `rusqlite::Error`.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A TOML parsing error, wrapped from `toml::de::Error`.
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Build a filesystem error that names the offending path.
    pub fn filesystem(action: &str, path: &Path, err: impl std::fmt::Display) -> Self {
        Error::Filesystem {
            message: format!("Failed to {} '{}': {}", action, path.display(), err),
        }
    }

    /// Build an engine error for the named operation.
    pub fn engine(operation: &str, message: impl Into<String>) -> Self {
        Error::Engine {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_metadata_parse() {
        let error = Error::MetadataParse {
            path: PathBuf::from("downloads/a/project.rs.xml"),
            message: "unexpected end of input".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Metadata parse error"));
        assert!(display.contains("downloads/a/project.rs.xml"));
        assert!(display.contains("unexpected end of input"));
    }

    #[test]
    fn test_error_display_insufficient_input() {
        let error = Error::InsufficientInput {
            message: "no extent polygons".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Insufficient input"));
        assert!(display.contains("no extent polygons"));
    }

    #[test]
    fn test_error_display_raster() {
        let error = Error::Raster {
            identity: "SLOPE".to_string(),
            message: "pixel size mismatch".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Raster merge error"));
        assert!(display.contains("'SLOPE'"));
        assert!(display.contains("pixel size mismatch"));
    }

    #[test]
    fn test_error_display_config_with_hint() {
        let error = Error::Config {
            message: "unknown engine 'qgis'".to_string(),
            hint: Some("use 'native' or 'gdal-cli'".to_string()),
        };
        let display = format!("{}", error);
        assert!(display.contains("Configuration error"));
        assert!(display.contains("hint:"));
        assert!(display.contains("gdal-cli"));
    }

    #[test]
    fn test_error_engine_helper() {
        let error = Error::engine("mosaic", "gdal_merge.py exited with status 1");
        let display = format!("{}", error);
        assert!(display.contains("Engine error during mosaic"));
        assert!(display.contains("status 1"));
    }

    #[test]
    fn test_error_filesystem_helper() {
        let error = Error::filesystem("remove", Path::new("merged/dem.tif"), "permission denied");
        let display = format!("{}", error);
        assert!(display.contains("Failed to remove 'merged/dem.tif'"));
        assert!(display.contains("permission denied"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error: Error = io_error.into();
        let display = format!("{}", error);
        assert!(display.contains("I/O error"));
        assert!(display.contains("File not found"));
    }

    #[test]
    fn test_error_from_regex_error() {
        let regex_error = regex::Error::Syntax("Invalid regex".to_string());
        let error: Error = regex_error.into();
        assert!(format!("{}", error).contains("Regex error"));
    }
}
