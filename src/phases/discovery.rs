//! Phase 1: Reading and Cataloguing
//!
//! Reads every source project's metadata tree in caller order and folds the
//! declarations into the raster and container catalogs.
//!
//! - A project whose metadata is missing or malformed is skipped with a
//!   warning; the merge continues with the rest.
//! - The project's identifier becomes its warehouse id when the metadata
//!   declares one.
//! - The first valid project's tree is kept as the template for the merged
//!   metadata.
//! - Extent files are collected only when they exist on disk.

use std::path::PathBuf;

use crate::catalog::{CatalogBuilder, Catalogs};
use crate::error::{Error, Result};
use crate::filter::InclusionFilter;
use crate::logsink::LogSink;
use crate::metadata::MetadataTree;
use crate::project::{MetadataReader, Project};

/// A project that was skipped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProject {
    pub root: PathBuf,
    pub reason: String,
}

/// Output of Phase 1.
#[derive(Debug)]
pub struct Discovery {
    /// Projects that were read, identifiers resolved, in caller order.
    pub projects: Vec<Project>,
    pub skipped: Vec<SkippedProject>,
    pub catalogs: Catalogs,
    /// Existing extent polygon files, in project order.
    pub extent_files: Vec<PathBuf>,
    /// Metadata tree of the first valid project.
    pub template: MetadataTree,
}

/// Execute Phase 1 over `projects`.
///
/// # Errors
///
/// Returns `Error::InsufficientInput` when no project could be read.
pub fn execute(projects: &[Project], filter: &InclusionFilter, log: &LogSink) -> Result<Discovery> {
    let log = log.scoped("discovery");
    let reader = MetadataReader::new(&log);
    let mut builder = CatalogBuilder::new(filter, &log);

    let mut read = Vec::new();
    let mut skipped = Vec::new();
    let mut extent_files = Vec::new();
    let mut template = None;

    log.info(format!("Reading {} project(s)", projects.len()));
    for project in projects {
        let reading = match reader.read(project) {
            Ok(reading) => reading,
            Err(e) => {
                log.warn(format!("Skipping project {}: {}", project.root.display(), e));
                skipped.push(SkippedProject {
                    root: project.root.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let mut project = project.clone();
        if let Some(id) = &reading.warehouse_id {
            project.id = id.clone();
        }

        builder.fold(&project, &reading);

        match &reading.bounds_path {
            Some(rel_path) => {
                let path = project.resolve(rel_path);
                if path.is_file() {
                    extent_files.push(path);
                } else {
                    log.warn(format!(
                        "Project {} declares extent {} but the file does not exist",
                        project.id,
                        path.display()
                    ));
                }
            }
            None => log.warn(format!("Project {} declares no extent polygon", project.id)),
        }

        if template.is_none() {
            template = Some(reading.tree);
        }
        read.push(project);
    }

    let Some(template) = template else {
        return Err(Error::InsufficientInput {
            message: format!("none of the {} project(s) could be read", projects.len()),
        });
    };

    Ok(Discovery {
        projects: read,
        skipped,
        catalogs: builder.finish(),
        extent_files,
        template,
    })
}
