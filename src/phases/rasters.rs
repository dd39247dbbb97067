//! Phase 3: Raster Merging
//!
//! Mosaics every raster identity of the catalog into one output raster at the
//! identity's relative path inside the output directory.
//!
//! ## Process
//!
//! For each catalog entry:
//!
//! 1.  **Check**: every occurrence must exist. A missing occurrence fails the
//!     identity.
//! 2.  **Describe**: the first occurrence's sample type picks the codec
//!     (DEFLATE for integers, LZW for floats) and its nodata value, when
//!     declared, is assigned to the output.
//! 3.  **Mosaic**: a stale output is deleted first; occurrences are painted in
//!     project order so the last-listed one wins where they overlap.
//! 4.  **Clean up**: with `delete_source`, source rasters are removed only
//!     after the mosaic succeeded.
//!
//! A failure only abandons its own identity; the phase always visits every
//! entry.

use std::fs;
use std::path::{Path, PathBuf};

use super::{output_path, PhaseOutcome};
use crate::catalog::{RasterCatalog, RasterEntry};
use crate::engine::{Codec, MosaicRequest, RasterEngine};
use crate::error::{Error, Result};
use crate::logsink::LogSink;

/// Mosaics raster identities through a [`RasterEngine`].
pub struct RasterMerger<'a, E: RasterEngine + ?Sized> {
    engine: &'a E,
    output_dir: &'a Path,
    delete_source: bool,
    log: LogSink,
}

impl<'a, E: RasterEngine + ?Sized> RasterMerger<'a, E> {
    pub fn new(engine: &'a E, output_dir: &'a Path, delete_source: bool, log: &LogSink) -> Self {
        Self {
            engine,
            output_dir,
            delete_source,
            log: log.scoped("rasters"),
        }
    }

    /// Mosaic every occurrence of `entry`; returns the output path.
    pub fn merge(&self, entry: &RasterEntry) -> Result<PathBuf> {
        let failed = |message: String| Error::Raster {
            identity: entry.id.clone(),
            message,
        };

        self.log.info(format!(
            "Merging {} {} raster(s) into {}",
            entry.occurrences.len(),
            entry.name,
            entry.rel_path
        ));

        // A previous run's mosaic must not survive a failed re-run.
        let output = output_path(self.output_dir, &entry.rel_path);
        prepare_output(&output).map_err(|e| failed(e.to_string()))?;

        let inputs: Vec<PathBuf> = entry.occurrences.iter().map(|o| o.path.clone()).collect();
        let Some(first) = inputs.first() else {
            return Err(failed("no occurrences".to_string()));
        };
        if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
            return Err(failed(format!("occurrence {} does not exist", missing.display())));
        }

        let description = self
            .engine
            .describe(first)
            .map_err(|e| failed(format!("cannot describe {}: {}", first.display(), e)))?;
        let codec = Codec::for_sample_type(description.sample_type);
        self.log.debug(format!(
            "{}: {} samples, codec {}, nodata {}",
            entry.id,
            description.sample_type,
            codec.gdal_name(),
            description
                .nodata
                .map(|n| n.to_string())
                .unwrap_or_else(|| "<none>".to_string())
        ));

        let request = MosaicRequest {
            inputs: &inputs,
            output: &output,
            codec,
            nodata: description.nodata,
        };
        if let Err(e) = self.engine.mosaic(&request) {
            if output.exists() {
                let _ = fs::remove_file(&output);
            }
            return Err(failed(e.to_string()));
        }

        if self.delete_source {
            for input in &inputs {
                match fs::remove_file(input) {
                    Ok(()) => self.log.debug(format!("Deleted source raster {}", input.display())),
                    Err(e) => self.log.warn(format!(
                        "Could not delete source raster {}: {}",
                        input.display(),
                        e
                    )),
                }
            }
        }

        Ok(output)
    }
}

/// Delete a stale output and create its parent directory.
pub(crate) fn prepare_output(output: &Path) -> Result<()> {
    if output.exists() {
        fs::remove_file(output).map_err(|e| Error::filesystem("remove", output, e))?;
    }
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::filesystem("create directory", parent, e))?;
    }
    Ok(())
}

/// Execute Phase 3: mosaic every raster identity.
pub fn execute<E: RasterEngine + ?Sized>(
    catalog: &RasterCatalog,
    engine: &E,
    output_dir: &Path,
    delete_source: bool,
    log: &LogSink,
) -> PhaseOutcome {
    let merger = RasterMerger::new(engine, output_dir, delete_source, log);
    let mut outcome = PhaseOutcome::default();

    for entry in catalog.values() {
        match merger.merge(entry) {
            Ok(path) => {
                merger.log.info(format!("Merged raster {} to {}", entry.id, path.display()));
                outcome.merged.push(entry.id.clone());
            }
            Err(e) => {
                merger.log.error(&e);
                outcome.record_failure(&entry.id, e);
            }
        }
    }
    outcome
}
