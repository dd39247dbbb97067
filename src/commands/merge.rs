//! Merge command implementation
//!
//! Resolves the merge settings (config file first, command-line flags on top),
//! opens the merge log inside the output directory, and runs the five merge
//! phases through the selected engine.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Instant;

use project_merge::config::{MergeConfig, Stage};
use project_merge::engine::{build_engine, EngineKind};
use project_merge::logsink::LogSink;
use project_merge::{execute_merge, MergeRequest};

/// Arguments for the merge command
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Project directories to merge, in priority order
    #[arg(value_name = "PROJECT_DIR")]
    pub projects: Vec<PathBuf>,

    /// Also merge every project found below this directory
    #[arg(long, value_name = "DIR")]
    pub downloads: Option<PathBuf>,

    /// Output directory of the merged project
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Path to a TOML merge config file
    #[arg(short, long, value_name = "PATH", env = "MERGE_PROJECTS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base name of the merged project
    #[arg(long)]
    pub name: Option<String>,

    /// Project type of the sources (e.g. BRAT, VBET, RSContext)
    #[arg(long)]
    pub project_type: Option<String>,

    /// Collection the merged project belongs to
    #[arg(long)]
    pub collection_id: Option<String>,

    /// Data exchange stage the sources come from (production, staging)
    #[arg(long)]
    pub stage: Option<String>,

    /// Regular expression selecting the artifacts to merge (repeatable)
    #[arg(short, long = "include", value_name = "PATTERN")]
    pub include: Vec<String>,

    /// Delete source rasters once they have been merged
    #[arg(long)]
    pub delete_source: bool,

    /// Geoprocessing engine (native, gdal-cli)
    #[arg(long)]
    pub engine: Option<String>,
}

impl MergeArgs {
    /// Load the config file, if any, and apply the command-line overrides.
    fn resolve_config(&self) -> Result<MergeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                MergeConfig::from_file(path)?
            }
            None => MergeConfig::default(),
        };

        if let Some(name) = &self.name {
            config.name = Some(name.clone());
        }
        if let Some(project_type) = &self.project_type {
            config.project_type = Some(project_type.clone());
        }
        if let Some(collection_id) = &self.collection_id {
            config.collection_id = Some(collection_id.clone());
        }
        if let Some(stage) = &self.stage {
            config.stage = Stage::parse(stage)?;
        }
        if !self.include.is_empty() {
            config.include = self.include.clone();
        }
        if self.delete_source {
            config.delete_source = true;
        }
        if let Some(engine) = &self.engine {
            config.engine = EngineKind::parse(engine)?;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Execute the merge command
pub fn execute(args: MergeArgs) -> Result<()> {
    let start_time = Instant::now();

    let config = args.resolve_config()?;
    let roots = super::collect_project_roots(&args.projects, args.downloads.as_ref())?;
    if roots.len() < 2 {
        anyhow::bail!(
            "At least two projects are needed for a merge, found {}",
            roots.len()
        );
    }

    let log = LogSink::with_file(args.output.join(config.log_file_name()))
        .context("Failed to open the merge log")?;
    let engine = build_engine(config.engine);
    let request = MergeRequest::from_config(&config, roots, args.output.clone())?;

    let report = execute_merge(&request, engine.as_ref(), &log).context("Merge failed")?;

    println!(
        "Merged {} project(s) into {}",
        report.projects_read.len(),
        args.output.display()
    );
    for skipped in &report.projects_skipped {
        println!("  skipped project {}: {}", skipped.root.display(), skipped.reason);
    }
    println!(
        "  rasters: {} merged, {} failed",
        report.rasters.merged.len(),
        report.rasters.failed.len()
    );
    println!(
        "  geopackages: {} merged, {} failed",
        report.containers.merged.len(),
        report.containers.failed.len()
    );
    for failed in report.rasters.failed.iter().chain(&report.containers.failed) {
        eprintln!("  failed {}: {}", failed.identity, failed.message);
    }
    println!("  metadata: {}", report.metadata_path.display());
    println!("Completed in {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}
