//! Phase 4: Vector Merging
//!
//! Builds one output GeoPackage per container identity by appending every
//! occurrence of every declared layer into the output layer of the same name.
//! Geometries are repaired before they are appended and features are never
//! deduplicated, so feature counts add up across occurrences.
//!
//! An occurrence whose container is missing or whose layer cannot be appended
//! is skipped with a warning. A container for which no append succeeded is
//! removed and reported as failed.

use std::fs;
use std::path::{Path, PathBuf};

use super::{output_path, rasters::prepare_output, PhaseOutcome};
use crate::catalog::{ContainerCatalog, ContainerEntry};
use crate::engine::{AppendRequest, VectorEngine};
use crate::error::{Error, Result};
use crate::logsink::LogSink;

/// What one container merge produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerMerge {
    pub path: PathBuf,
    /// Successful layer appends.
    pub appends: usize,
    /// Appends that were skipped.
    pub skipped: usize,
    /// Features appended, when the engine reports counts.
    pub features: Option<u64>,
}

/// Merges container identities through a [`VectorEngine`].
pub struct VectorMerger<'a, E: VectorEngine + ?Sized> {
    engine: &'a E,
    output_dir: &'a Path,
    log: LogSink,
}

impl<'a, E: VectorEngine + ?Sized> VectorMerger<'a, E> {
    pub fn new(engine: &'a E, output_dir: &'a Path, log: &LogSink) -> Self {
        Self {
            engine,
            output_dir,
            log: log.scoped("vectors"),
        }
    }

    pub fn merge(&self, entry: &ContainerEntry) -> Result<ContainerMerge> {
        self.log.info(format!(
            "Processing {} GeoPackage at {} with {} layer(s)",
            entry.name,
            entry.rel_path,
            entry.layers.len()
        ));

        let output = output_path(self.output_dir, &entry.rel_path);
        prepare_output(&output).map_err(|e| Error::Vector {
            identity: entry.id.clone(),
            message: e.to_string(),
        })?;

        let mut result = ContainerMerge {
            path: output.clone(),
            appends: 0,
            skipped: 0,
            features: Some(0),
        };

        for layer in entry.layers.values() {
            for occurrence in &layer.occurrences {
                if !occurrence.path.is_file() {
                    self.log.warn(format!(
                        "Skipping layer {} of project {}: {} does not exist",
                        layer.key,
                        occurrence.project,
                        occurrence.path.display()
                    ));
                    result.skipped += 1;
                    continue;
                }

                let request = AppendRequest {
                    source: &occurrence.path,
                    output: &output,
                    layer: &layer.key,
                    make_valid: true,
                };
                match self.engine.append_layer(&request) {
                    Ok(count) => {
                        self.log.debug(format!(
                            "Appended layer {} from project {} ({} features)",
                            layer.key,
                            occurrence.project,
                            count.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string())
                        ));
                        result.appends += 1;
                        result.features = match (result.features, count) {
                            (Some(total), Some(count)) => Some(total + count),
                            _ => None,
                        };
                    }
                    Err(e) => {
                        self.log.warn(format!(
                            "Skipping layer {} of project {}: {}",
                            layer.key, occurrence.project, e
                        ));
                        result.skipped += 1;
                    }
                }
            }
        }

        if result.appends == 0 {
            if output.exists() {
                let _ = fs::remove_file(&output);
            }
            return Err(Error::Vector {
                identity: entry.id.clone(),
                message: "no layer could be appended".to_string(),
            });
        }

        Ok(result)
    }
}

/// Execute Phase 4: merge every container identity.
pub fn execute<E: VectorEngine + ?Sized>(
    catalog: &ContainerCatalog,
    engine: &E,
    output_dir: &Path,
    log: &LogSink,
) -> PhaseOutcome {
    let merger = VectorMerger::new(engine, output_dir, log);
    let mut outcome = PhaseOutcome::default();

    for entry in catalog.values() {
        match merger.merge(entry) {
            Ok(merge) => {
                merger.log.info(format!(
                    "Merged geopackage {} to {} ({} append(s), {} skipped)",
                    entry.id,
                    merge.path.display(),
                    merge.appends,
                    merge.skipped
                ));
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
