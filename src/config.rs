//! # Merge Configuration
//!
//! A merge is described by a [`MergeConfig`], read from an optional TOML file
//! and overridden field by field from the command line:
//!
//! ```toml
//! name = "Upper Salmon"
//! project_type = "BRAT"
//! collection_id = "e93450e5-68bf-4c43-bca0-6a6995bd06ad"
//! stage = "production"
//! include = ['.*brat\.gpkg', '.*\.tif']
//! delete_source = false
//! engine = "native"
//! log_file = "merge-projects.log"
//! ```
//!
//! Unknown keys are rejected so a typo never silently changes a merge.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::engine::EngineKind;
use crate::error::{Error, Result};
use crate::logsink::DEFAULT_LOG_FILE;

/// Display labels for known project types.
const PROJECT_TYPE_LABELS: [(&str, &str); 8] = [
    ("RSContext", "RS Context"),
    ("ChannelArea", "Channel Area"),
    ("TauDEM", "TauDEM"),
    ("VBET", "VBET"),
    ("BRAT", "BRAT"),
    ("anthro", "ANTHRO"),
    ("rcat", "RCAT"),
    ("rs_metric_engine", "Metric Engine"),
];

/// Human label of a project type; unknown types are their own label.
pub fn project_type_label(project_type: &str) -> &str {
    PROJECT_TYPE_LABELS
        .iter()
        .find(|(key, _)| *key == project_type)
        .map(|(_, label)| *label)
        .unwrap_or(project_type)
}

/// Data exchange stage the source projects were published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    #[serde(alias = "PRODUCTION")]
    Production,
    #[serde(alias = "STAGING")]
    Staging,
}

impl Stage {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Stage::Production),
            "staging" => Ok(Stage::Staging),
            other => Err(Error::Config {
                message: format!("unknown stage '{}'", other),
                hint: Some("use 'production' or 'staging'".to_string()),
            }),
        }
    }

    /// Base URL of the data exchange for this stage.
    pub fn base_url(self) -> &'static str {
        match self {
            Stage::Production => "https://data.riverscapes.net/",
            Stage::Staging => "https://staging.data.riverscapes.net/",
        }
    }

    /// Public page of one project on the data exchange.
    pub fn project_url(self, project_id: &str) -> Result<Url> {
        let base = Url::parse(self.base_url())?;
        Ok(base.join(&format!("p/{}", project_id))?)
    }
}

/// Settings of one merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    /// Base name of the merged project.
    pub name: Option<String>,
    /// Full display name; defaults to `"<name> Merged <label>"`.
    pub display_name: Option<String>,
    pub project_type: Option<String>,
    pub collection_id: Option<String>,
    pub stage: Stage,
    /// Inclusion patterns; empty includes everything.
    pub include: Vec<String>,
    /// Delete source rasters once they have been mosaicked.
    pub delete_source: bool,
    pub engine: EngineKind,
    /// Merge log file name inside the output directory.
    pub log_file: Option<String>,
}

impl MergeConfig {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            hint: None,
        })?;
        Self::parse(&content)
    }

    /// Check that every field a merge needs is present.
    pub fn validate(&self) -> Result<()> {
        if self.name.as_deref().map_or(true, |n| n.trim().is_empty()) && self.display_name.is_none() {
            return Err(Error::Config {
                message: "no project name given".to_string(),
                hint: Some("set `name` in the config file or pass --name".to_string()),
            });
        }
        if self.project_type.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(Error::Config {
                message: "no project type given".to_string(),
                hint: Some("set `project_type` in the config file or pass --project-type".to_string()),
            });
        }
        let log_file = Path::new(self.log_file_name());
        let escapes = log_file
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_) | std::path::Component::CurDir));
        if escapes || log_file.file_name().is_none() {
            return Err(Error::Config {
                message: format!("log file '{}' is not inside the output directory", log_file.display()),
                hint: Some("use a relative path such as `logs/merge.log`".to_string()),
            });
        }
        Ok(())
    }

    pub fn project_type(&self) -> &str {
        self.project_type.as_deref().unwrap_or_default()
    }

    /// Name written to the merged metadata tree.
    pub fn display_name(&self) -> String {
        if let Some(display_name) = &self.display_name {
            return display_name.clone();
        }
        format!(
            "{} Merged {}",
            self.name.as_deref().unwrap_or_default(),
            project_type_label(self.project_type())
        )
    }

    pub fn log_file_name(&self) -> &str {
        self.log_file.as_deref().unwrap_or(DEFAULT_LOG_FILE)
    }
}
