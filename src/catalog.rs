//! # Identity Catalog Builder
//!
//! Folds the readings of many projects into two cross-project catalogs, one
//! for rasters and one for vector containers. Each catalog maps a dataset
//! identity (the `id` a metadata tree assigns) to every occurrence of that
//! dataset across projects.
//!
//! Identity resolution is a pure key → accumulator step:
//!
//! - the first occurrence of an identity fixes its display name and relative
//!   output path;
//! - later occurrences only contribute source paths, in project order;
//! - declarations whose path fails the inclusion filter are logged and skipped.
//!
//! Catalog iteration order is the order identities were first seen.

use std::path::PathBuf;

use indexmap::IndexMap;

use crate::filter::InclusionFilter;
use crate::logsink::LogSink;
use crate::project::{Project, ProjectReading};

/// One concrete file instance of an identity, contributed by one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub identity: String,
    /// Absolute source path (project root + declared relative path).
    pub path: PathBuf,
    /// Display name declared by the contributing project.
    pub name: String,
    /// Identifier of the contributing project.
    pub project: String,
}

/// Catalog entry for one raster identity.
#[derive(Debug, Clone)]
pub struct RasterEntry {
    pub id: String,
    pub name: String,
    /// Relative output path, taken from the first occurrence.
    pub rel_path: String,
    pub occurrences: Vec<Occurrence>,
}

/// Occurrences of one layer inside a container identity.
#[derive(Debug, Clone)]
pub struct LayerEntry {
    pub key: String,
    pub name: String,
    pub occurrences: Vec<Occurrence>,
}

/// Catalog entry for one vector container identity.
#[derive(Debug, Clone)]
pub struct ContainerEntry {
    pub id: String,
    pub name: String,
    pub rel_path: String,
    pub occurrences: Vec<Occurrence>,
    /// Layers keyed by layer name, in first-seen order.
    pub layers: IndexMap<String, LayerEntry>,
}

pub type RasterCatalog = IndexMap<String, RasterEntry>;
pub type ContainerCatalog = IndexMap<String, ContainerEntry>;

/// Both catalogs for one merge.
#[derive(Debug, Clone, Default)]
pub struct Catalogs {
    pub rasters: RasterCatalog,
    pub containers: ContainerCatalog,
}

impl Catalogs {
    pub fn is_empty(&self) -> bool {
        self.rasters.is_empty() && self.containers.is_empty()
    }
}

/// Folds project readings into [`Catalogs`].
pub struct CatalogBuilder<'a> {
    filter: &'a InclusionFilter,
    catalogs: Catalogs,
    log: LogSink,
}

impl<'a> CatalogBuilder<'a> {
    pub fn new(filter: &'a InclusionFilter, log: &LogSink) -> Self {
        Self {
            filter,
            catalogs: Catalogs::default(),
            log: log.scoped("catalog"),
        }
    }

    /// Fold one project's declarations into the catalogs.
    ///
    /// Projects must be folded in the caller's priority order: the first
    /// project to declare an identity names it.
    pub fn fold(&mut self, project: &Project, reading: &ProjectReading) {
        for raster in &reading.rasters {
            if !self.filter.matches(&raster.rel_path) {
                self.log.info(format!(
                    "Skipping non-regex raster {} with path {} in project {}",
                    raster.name, raster.rel_path, project.id
                ));
                continue;
            }

            let occurrence = Occurrence {
                identity: raster.id.clone(),
                path: project.resolve(&raster.rel_path),
                name: raster.name.clone(),
                project: project.id.clone(),
            };

            let entry = self
                .catalogs
                .rasters
                .entry(raster.id.clone())
                .or_insert_with(|| RasterEntry {
                    id: raster.id.clone(),
                    name: raster.name.clone(),
                    rel_path: raster.rel_path.clone(),
                    occurrences: Vec::new(),
                });
            if entry.rel_path != raster.rel_path {
                self.log.debug(format!(
                    "Raster {} declared at {} in project {} (first seen at {})",
                    raster.id, raster.rel_path, project.id, entry.rel_path
                ));
            }
            entry.occurrences.push(occurrence);
        }

        for container in &reading.containers {
            if !self.filter.matches(&container.rel_path) {
                self.log.info(format!(
                    "Skipping non-regex geopackage {} with path {} in project {}",
                    container.name, container.rel_path, project.id
                ));
                continue;
            }

            let occurrence = Occurrence {
                identity: container.id.clone(),
                path: project.resolve(&container.rel_path),
                name: container.name.clone(),
                project: project.id.clone(),
            };

            let entry = self
                .catalogs
                .containers
                .entry(container.id.clone())
                .or_insert_with(|| ContainerEntry {
                    id: container.id.clone(),
                    name: container.name.clone(),
                    rel_path: container.rel_path.clone(),
                    occurrences: Vec::new(),
                    layers: IndexMap::new(),
                });
            if entry.rel_path != container.rel_path {
                self.log.debug(format!(
                    "Geopackage {} declared at {} in project {} (first seen at {})",
                    container.id, container.rel_path, project.id, entry.rel_path
                ));
            }

            for layer in &container.layers {
                entry
                    .layers
                    .entry(layer.key.clone())
                    .or_insert_with(|| LayerEntry {
                        key: layer.key.clone(),
                        name: layer.name.clone(),
                        occurrences: Vec::new(),
                    })
                    .occurrences
                    .push(occurrence.clone());
            }
            entry.occurrences.push(occurrence);
        }
    }

    /// Finish folding and return the catalogs.
    pub fn finish(self) -> Catalogs {
        self.log.info(format!(
            "Catalogued {} raster identities and {} geopackage identities",
            self.catalogs.rasters.len(),
            self.catalogs.containers.len()
        ));
        self.catalogs
    }
}
