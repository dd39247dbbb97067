//! # Geometry and Raster Engine
//!
//! The merge executors never touch raster pixels or GeoPackage tables
//! themselves; they call a capability set expressed as two traits:
//!
//! - [`RasterEngine`]: inspect a raster's sample type and nodata value, and
//!   mosaic several rasters into one.
//! - [`VectorEngine`]: append one layer of a source container into an output
//!   container, repairing geometries on the way.
//!
//! Two implementations ship with the crate:
//!
//! - [`NativeEngine`]: pure Rust, GeoTIFF through `tiff`, GeoPackage through
//!   `rusqlite`, geometry repair through `geo`.
//! - [`GdalCliEngine`]: delegates to `gdalinfo`, `gdal_merge.py` and
//!   `ogr2ogr`. A tool that launches but exits non-zero is a failure.
//!
//! Every engine call returns an explicit `Result`; callers never rely on a
//! panic or a missing output file to detect failure.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod gdal_cli;
pub mod geopackage;
pub mod geotiff;
pub mod repair;
pub mod wkb;

pub use gdal_cli::GdalCliEngine;

/// Sample data type of a single-band raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleType {
    /// Whether samples hold integer values.
    pub fn is_integer(self) -> bool {
        !matches!(self, SampleType::F32 | SampleType::F64)
    }

    /// Parse a GDAL data type name (`Byte`, `Int16`, `Float32`, ...).
    pub fn from_gdal_name(name: &str) -> Option<Self> {
        match name {
            "Byte" => Some(SampleType::U8),
            "Int8" => Some(SampleType::I8),
            "UInt16" => Some(SampleType::U16),
            "Int16" => Some(SampleType::I16),
            "UInt32" => Some(SampleType::U32),
            "Int32" => Some(SampleType::I32),
            "Float32" => Some(SampleType::F32),
            "Float64" => Some(SampleType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleType::U8 => "Byte",
            SampleType::U16 => "UInt16",
            SampleType::U32 => "UInt32",
            SampleType::I8 => "Int8",
            SampleType::I16 => "Int16",
            SampleType::I32 => "Int32",
            SampleType::F32 => "Float32",
            SampleType::F64 => "Float64",
        };
        f.write_str(name)
    }
}

/// Lossless compression codec for merged rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Deflate,
    Lzw,
}

impl Codec {
    /// Integer rasters use DEFLATE, floating-point rasters LZW.
    pub fn for_sample_type(sample_type: SampleType) -> Self {
        if sample_type.is_integer() {
            Codec::Deflate
        } else {
            Codec::Lzw
        }
    }

    /// GDAL creation option value.
    pub fn gdal_name(self) -> &'static str {
        match self {
            Codec::Deflate => "DEFLATE",
            Codec::Lzw => "LZW",
        }
    }
}

/// What a raster engine reports about one raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterDescription {
    pub sample_type: SampleType,
    pub nodata: Option<f64>,
}

/// A request to mosaic `inputs` into `output`.
///
/// Inputs are listed in paint order: where they overlap, later inputs win.
#[derive(Debug, Clone)]
pub struct MosaicRequest<'a> {
    pub inputs: &'a [PathBuf],
    pub output: &'a Path,
    pub codec: Codec,
    /// Nodata value to assign to the output, when the first input declares one.
    pub nodata: Option<f64>,
}

/// A request to append `layer` of `source` into `output`.
#[derive(Debug, Clone)]
pub struct AppendRequest<'a> {
    pub source: &'a Path,
    pub output: &'a Path,
    pub layer: &'a str,
    /// Repair invalid geometries before insertion.
    pub make_valid: bool,
}

/// Raster capabilities the merge needs.
pub trait RasterEngine {
    /// Inspect the first band of a raster.
    fn describe(&self, path: &Path) -> Result<RasterDescription>;

    /// Mosaic the request's inputs into its output.
    fn mosaic(&self, request: &MosaicRequest<'_>) -> Result<()>;
}

/// Vector capabilities the merge needs.
pub trait VectorEngine {
    /// Append one layer; returns the number of features appended when the
    /// engine can tell.
    fn append_layer(&self, request: &AppendRequest<'_>) -> Result<Option<u64>>;
}

/// Pure Rust engine built on `tiff`, `rusqlite` and `geo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEngine;

impl RasterEngine for NativeEngine {
    fn describe(&self, path: &Path) -> Result<RasterDescription> {
        geotiff::describe(path)
    }

    fn mosaic(&self, request: &MosaicRequest<'_>) -> Result<()> {
        geotiff::mosaic(request)
    }
}

impl VectorEngine for NativeEngine {
    fn append_layer(&self, request: &AppendRequest<'_>) -> Result<Option<u64>> {
        geopackage::append_layer(request).map(Some)
    }
}

/// Engine selection, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    #[default]
    Native,
    GdalCli,
}

impl EngineKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(EngineKind::Native),
            "gdal-cli" | "gdal" => Ok(EngineKind::GdalCli),
            other => Err(Error::Config {
                message: format!("unknown engine '{}'", other),
                hint: Some("use 'native' or 'gdal-cli'".to_string()),
            }),
        }
    }
}

/// A boxed engine offering both capability sets.
pub trait GeoEngine: RasterEngine + VectorEngine {}

impl<T: RasterEngine + VectorEngine> GeoEngine for T {}

/// Build the engine selected by `kind`.
pub fn build_engine(kind: EngineKind) -> Box<dyn GeoEngine> {
    match kind {
        EngineKind::Native => Box::new(NativeEngine),
        EngineKind::GdalCli => Box::new(GdalCliEngine::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_selection_by_sample_type() {
        for integer in [
            SampleType::U8,
            SampleType::U16,
            SampleType::U32,
            SampleType::I8,
            SampleType::I16,
            SampleType::I32,
        ] {
            assert_eq!(Codec::for_sample_type(integer), Codec::Deflate);
        }
        assert_eq!(Codec::for_sample_type(SampleType::F32), Codec::Lzw);
        assert_eq!(Codec::for_sample_type(SampleType::F64), Codec::Lzw);
    }

    #[test]
    fn test_gdal_type_names() {
        assert_eq!(SampleType::from_gdal_name("Float32"), Some(SampleType::F32));
        assert_eq!(SampleType::from_gdal_name("Byte"), Some(SampleType::U8));
        assert_eq!(SampleType::from_gdal_name("CFloat64"), None);
        assert_eq!(SampleType::I16.to_string(), "Int16");
    }

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!(EngineKind::parse("native").unwrap(), EngineKind::Native);
        assert_eq!(EngineKind::parse("GDAL-CLI").unwrap(), EngineKind::GdalCli);
        assert!(matches!(EngineKind::parse("qgis"), Err(Error::Config { .. })));
    }
}
