//! Engine backed by the GDAL command-line tools
//!
//! Uses `gdalinfo -json` to describe rasters, `gdal_merge.py` to mosaic them
//! and `ogr2ogr` to append vector layers. Every tool invocation checks the
//! exit status: a tool that runs but fails is an error, never a silent
//! success.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

use super::{AppendRequest, MosaicRequest, RasterDescription, RasterEngine, SampleType, VectorEngine};
use crate::error::{Error, Result};

/// Program names (or paths) of the GDAL tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdalCliEngine {
    pub gdalinfo: String,
    pub gdal_merge: String,
    pub ogr2ogr: String,
}

impl Default for GdalCliEngine {
    fn default() -> Self {
        Self {
            gdalinfo: "gdalinfo".to_string(),
            gdal_merge: "gdal_merge.py".to_string(),
            ogr2ogr: "ogr2ogr".to_string(),
        }
    }
}

impl GdalCliEngine {
    fn run(&self, program: &str, args: &[String]) -> Result<Output> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::engine(program, format!("failed to launch: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let status = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(Error::engine(
                program,
                format!("exited with status {}: {}", status, stderr.trim()),
            ));
        }
        Ok(output)
    }
}

impl RasterEngine for GdalCliEngine {
    fn describe(&self, path: &Path) -> Result<RasterDescription> {
        let args = vec!["-json".to_string(), path.display().to_string()];
        let output = self.run(&self.gdalinfo, &args)?;
        parse_gdalinfo(&String::from_utf8_lossy(&output.stdout))
    }

    fn mosaic(&self, request: &MosaicRequest<'_>) -> Result<()> {
        self.run(&self.gdal_merge, &mosaic_args(request))?;
        Ok(())
    }
}

impl VectorEngine for GdalCliEngine {
    fn append_layer(&self, request: &AppendRequest<'_>) -> Result<Option<u64>> {
        self.run(&self.ogr2ogr, &append_args(request))?;
        Ok(None)
    }
}

/// Read the first band's type and nodata value from `gdalinfo -json` output.
pub fn parse_gdalinfo(json: &str) -> Result<RasterDescription> {
    let info: Value = serde_json::from_str(json)?;
    let band = info
        .get("bands")
        .and_then(|b| b.get(0))
        .ok_or_else(|| Error::engine("gdalinfo", "raster has no bands"))?;

    let type_name = band.get("type").and_then(Value::as_str).unwrap_or_default();
    let sample_type = SampleType::from_gdal_name(type_name)
        .ok_or_else(|| Error::engine("gdalinfo", format!("unsupported band type '{}'", type_name)))?;

    // GDAL reports NaN nodata as the string "nan".
    let nodata = match band.get("noDataValue") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("nan") => Some(f64::NAN),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };

    Ok(RasterDescription { sample_type, nodata })
}

/// `gdal_merge.py` arguments for a mosaic request.
pub fn mosaic_args(request: &MosaicRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        request.output.display().to_string(),
        "-co".to_string(),
        format!("COMPRESS={}", request.codec.gdal_name()),
    ];
    if let Some(nodata) = request.nodata {
        args.push("-a_nodata".to_string());
        args.push(nodata.to_string());
        args.push("-n".to_string());
        args.push(nodata.to_string());
    }
    args.extend(request.inputs.iter().map(|p| p.display().to_string()));
    args
}

/// `ogr2ogr` arguments for an append request.
pub fn append_args(request: &AppendRequest<'_>) -> Vec<String> {
    let mut args = vec!["-f".to_string(), "GPKG".to_string()];
    if request.make_valid {
        args.push("-makevalid".to_string());
    }
    args.extend([
        "-append".to_string(),
        "-nln".to_string(),
        request.layer.to_string(),
        request.output.display().to_string(),
        request.source.display().to_string(),
        request.layer.to_string(),
    ]);
    args
}
