//! Injected merge log
//!
//! Every merge component receives a [`LogSink`] when it is constructed rather
//! than reaching for a process-wide logger object. A sink does two things with
//! each record:
//!
//! 1. Forwards it to the `log` facade under the target
//!    `project_merge::<scope>`, so whatever logger the host installed
//!    (`env_logger` in the CLI) sees it.
//! 2. Appends a timestamped line to the merge log file, when the sink has one.
//!    The merge log lives in the output directory and is referenced by the
//!    merged metadata tree.
//!
//! Cloning a sink is cheap; clones share the same file handle.

use std::fmt::Display;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::Level;

use crate::error::{Error, Result};

/// Default file name of the merge log inside the output directory.
pub const DEFAULT_LOG_FILE: &str = "merge-projects.log";

#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

/// A cloneable log sink scoped to one merge component.
#[derive(Debug, Clone)]
pub struct LogSink {
    target: String,
    file: Option<Arc<LogFile>>,
}

impl LogSink {
    /// Create a sink that only forwards to the `log` facade.
    pub fn console() -> Self {
        Self {
            target: "project_merge".to_string(),
            file: None,
        }
    }

    /// Create a sink that also writes to `path`, truncating any previous log.
    pub fn with_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::filesystem("create", parent, e))?;
        }
        let file = File::create(path).map_err(|e| Error::filesystem("create", path, e))?;

        Ok(Self {
            target: "project_merge".to_string(),
            file: Some(Arc::new(LogFile {
                path: path.to_path_buf(),
                writer: Mutex::new(BufWriter::new(file)),
            })),
        })
    }

    /// Derive a sink for a named component, sharing this sink's file.
    pub fn scoped(&self, scope: &str) -> Self {
        Self {
            target: format!("project_merge::{}", scope),
            file: self.file.clone(),
        }
    }

    /// Path of the merge log file, if this sink writes one.
    pub fn log_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    pub fn debug(&self, message: impl Display) {
        self.record(Level::Debug, message);
    }

    pub fn info(&self, message: impl Display) {
        self.record(Level::Info, message);
    }

    pub fn warn(&self, message: impl Display) {
        self.record(Level::Warn, message);
    }

    pub fn error(&self, message: impl Display) {
        self.record(Level::Error, message);
    }

    /// Flush buffered lines to the merge log.
    pub fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut writer) = file.writer.lock() {
                let _ = writer.flush();
            }
        }
    }

    fn record(&self, level: Level, message: impl Display) {
        let message = message.to_string();
        log::log!(target: self.target.as_str(), level, "{}", message);

        // Logging must never fail a merge; write errors are dropped.
        if let Some(file) = &self.file {
            if let Ok(mut writer) = file.writer.lock() {
                let _ = writeln!(
                    writer,
                    "{} {:<5} [{}] {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    level,
                    self.target,
                    message
                );
                if level <= Level::Warn {
                    let _ = writer.flush();
                }
            }
        }
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}
