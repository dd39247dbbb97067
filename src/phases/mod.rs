//! Implementation of the phases of a project merge.
//!
//! ## Overview
//!
//! A merge runs five phases, strictly in order:
//! 1. Reading and Cataloguing - Read every project's metadata tree and build the identity catalogs
//! 2. Spatial Union - Union the extent polygons into `project_bounds.geojson`
//! 3. Raster Merging - Mosaic each raster identity
//! 4. Vector Merging - Merge each GeoPackage identity layer by layer
//! 5. Metadata Synthesis - Rewrite the first valid project's metadata for the merged output
//!
//! The spatial union runs before the executors: a bad extent fails the merge
//! before any heavy raster or vector work starts. Synthesis runs last so it
//! can prune every declaration whose file was not produced.

use std::path::{Path, PathBuf};

use crate::error::Error;

pub mod discovery;
pub mod extent;
pub mod orchestrator;
pub mod rasters;
pub mod synthesize;
pub mod vectors;

pub use discovery as phase1;
pub use extent as phase2;
pub use rasters as phase3;
pub use synthesize as phase5;
pub use vectors as phase4;

/// An identity that could not be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedIdentity {
    pub identity: String,
    pub message: String,
}

/// Per-identity results of an executor phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOutcome {
    /// Identities merged, in catalog order.
    pub merged: Vec<String>,
    pub failed: Vec<FailedIdentity>,
}

impl PhaseOutcome {
    pub fn record_failure(&mut self, identity: &str, error: Error) {
        self.failed.push(FailedIdentity {
            identity: identity.to_string(),
            message: error.to_string(),
        });
    }
}

/// Output location of an artifact declared at `rel_path`.
pub fn output_path(output_dir: &Path, rel_path: &str) -> PathBuf {
    output_dir.join(rel_path.replace('\\', "/"))
}
