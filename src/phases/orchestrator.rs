//! Orchestrator for the complete merge operation
//!
//! This module coordinates all phases to provide a clean API for merging a
//! list of projects into one output directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::discovery::SkippedProject;
use super::extent::ExtentSummary;
use super::synthesize::SynthesisContext;
use super::{phase1, phase2, phase3, phase4, phase5, PhaseOutcome};
use crate::config::{MergeConfig, Stage};
use crate::engine::GeoEngine;
use crate::error::{Error, Result};
use crate::filter::InclusionFilter;
use crate::logsink::LogSink;
use crate::project::Project;

/// Everything one merge needs.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    /// Source project directories, in merge order.
    pub project_roots: Vec<PathBuf>,
    pub output_dir: PathBuf,
    /// Display name of the merged project.
    pub name: String,
    pub project_type: String,
    pub collection_id: Option<String>,
    pub stage: Stage,
    /// Inclusion patterns; empty includes everything.
    pub include: Vec<String>,
    pub delete_source: bool,
}

impl MergeRequest {
    /// Build a request from validated configuration.
    pub fn from_config(config: &MergeConfig, project_roots: Vec<PathBuf>, output_dir: PathBuf) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            project_roots,
            output_dir,
            name: config.display_name(),
            project_type: config.project_type().to_string(),
            collection_id: config.collection_id.clone(),
            stage: config.stage,
            include: config.include.clone(),
            delete_source: config.delete_source,
        })
    }
}

/// Summary of a finished merge.
#[derive(Debug, Clone)]
pub struct MergeReport {
    /// Identifiers of the projects that were read, in merge order.
    pub projects_read: Vec<String>,
    pub projects_skipped: Vec<SkippedProject>,
    pub rasters: PhaseOutcome,
    pub containers: PhaseOutcome,
    pub extent: ExtentSummary,
    /// The written metadata tree.
    pub metadata_path: PathBuf,
}

impl MergeReport {
    /// Whether every catalogued identity merged.
    pub fn is_complete(&self) -> bool {
        self.rasters.failed.is_empty() && self.containers.failed.is_empty()
    }
}

/// Execute the complete merge operation
///
/// This orchestrates the merge pipeline:
/// 1. Read every project and build the identity catalogs
/// 2. Union the extent polygons
/// 3. Mosaic every raster identity
/// 4. Merge every GeoPackage identity
/// 5. Write the merged metadata tree
///
/// Per-identity failures are recorded in the report; only merge-fatal
/// errors (no readable project, no or malformed extents, metadata failures)
/// are returned as `Err`.
pub fn execute_merge<E: GeoEngine + ?Sized>(request: &MergeRequest, engine: &E, log: &LogSink) -> Result<MergeReport> {
    if request.project_roots.is_empty() {
        return Err(Error::InsufficientInput {
            message: "no projects to merge".to_string(),
        });
    }

    let filter = InclusionFilter::new(&request.include)?;
    ensure_dir(&request.output_dir)?;
    log.info(format!(
        "Merging {} project(s) into {}",
        request.project_roots.len(),
        request.output_dir.display()
    ));

    let projects: Vec<Project> = request.project_roots.iter().map(Project::new).collect();

    // Phase 1: Reading and Cataloguing
    let discovery = phase1::execute(&projects, &filter, log)?;

    // Phase 2: Spatial Union
    let extent = phase2::execute(&discovery.extent_files, &request.output_dir, log)?;

    // Phase 3: Raster Merging
    let rasters = phase3::execute(
        &discovery.catalogs.rasters,
        engine,
        &request.output_dir,
        request.delete_source,
        log,
    );

    // Phase 4: Vector Merging
    let containers = phase4::execute(&discovery.catalogs.containers, engine, &request.output_dir, log);

    // Phase 5: Metadata Synthesis
    let project_ids: Vec<String> = discovery.projects.iter().map(|p| p.id.clone()).collect();
    let context = SynthesisContext {
        name: &request.name,
        project_type: &request.project_type,
        collection_id: request.collection_id.as_deref(),
        stage: request.stage,
        project_ids: &project_ids,
        extent: &extent,
        output_dir: &request.output_dir,
        log_file: log.log_path(),
        created: Utc::now(),
    };
    let metadata_path = phase5::execute(&discovery.template, &context, log)?;

    log.info(format!(
        "Merge complete: {} raster(s) merged, {} failed; {} geopackage(s) merged, {} failed",
        rasters.merged.len(),
        rasters.failed.len(),
        containers.merged.len(),
        containers.failed.len()
    ));
    log.flush();

    Ok(MergeReport {
        projects_read: project_ids,
        projects_skipped: discovery.skipped,
        rasters,
        containers,
        extent,
        metadata_path,
    })
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::filesystem("create directory", dir, e))
}
