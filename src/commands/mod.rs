//! # CLI Command Implementations
//!
//! Each subcommand of `merge-projects` lives in its own file with an `Args`
//! struct derived with `clap` and an `execute` function calling into the
//! `project_merge` library.

use std::path::PathBuf;

use anyhow::Result;
use project_merge::project::discover_projects;

pub mod merge;
pub mod plan;

/// Source project directories: the explicit ones first, then every project
/// found below `downloads`, skipping directories already listed.
pub fn collect_project_roots(explicit: &[PathBuf], downloads: Option<&PathBuf>) -> Result<Vec<PathBuf>> {
    let mut roots: Vec<PathBuf> = explicit.to_vec();

    if let Some(dir) = downloads {
        if !dir.is_dir() {
            anyhow::bail!("Download directory not found: {}", dir.display());
        }
        for project in discover_projects(dir) {
            if !roots.contains(&project.root) {
                roots.push(project.root);
            }
        }
    }

    Ok(roots)
}
