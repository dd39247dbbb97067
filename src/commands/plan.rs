//! Plan command implementation
//!
//! Reads every project and prints the catalogs a merge would work through.
//! Nothing is written.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use project_merge::filter::InclusionFilter;
use project_merge::logsink::LogSink;
use project_merge::phases::phase1;
use project_merge::project::Project;

/// Arguments for the plan command
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Project directories to inspect, in priority order
    #[arg(value_name = "PROJECT_DIR")]
    pub projects: Vec<PathBuf>,

    /// Also inspect every project found below this directory
    #[arg(long, value_name = "DIR")]
    pub downloads: Option<PathBuf>,

    /// Regular expression selecting the artifacts to merge (repeatable)
    #[arg(short, long = "include", value_name = "PATTERN")]
    pub include: Vec<String>,
}

/// Execute the plan command
pub fn execute(args: PlanArgs) -> Result<()> {
    let roots = super::collect_project_roots(&args.projects, args.downloads.as_ref())?;
    if roots.is_empty() {
        anyhow::bail!("No projects given");
    }

    let filter = InclusionFilter::new(&args.include)?;
    let projects: Vec<Project> = roots.into_iter().map(Project::new).collect();
    let discovery = phase1::execute(&projects, &filter, &LogSink::console())?;

    println!("Projects ({}):", discovery.projects.len());
    for project in &discovery.projects {
        println!("  {} ({})", project.id, project.root.display());
    }
    for skipped in &discovery.skipped {
        println!("  skipped {}: {}", skipped.root.display(), skipped.reason);
    }

    println!("Extent files: {}", discovery.extent_files.len());

    println!("Rasters ({}):", discovery.catalogs.rasters.len());
    for entry in discovery.catalogs.rasters.values() {
        println!(
            "  {} -> {} ({} occurrence(s))",
            entry.id,
            entry.rel_path,
            entry.occurrences.len()
        );
    }

    println!("GeoPackages ({}):", discovery.catalogs.containers.len());
    for entry in discovery.catalogs.containers.values() {
        println!(
            "  {} -> {} ({} occurrence(s))",
            entry.id,
            entry.rel_path,
            entry.occurrences.len()
        );
        for layer in entry.layers.values() {
            println!("    {} ({} occurrence(s))", layer.key, layer.occurrences.len());
        }
    }

    Ok(())
}
