//! # Project Metadata Reader
//!
//! Reads one project's `project.rs.xml` and extracts the declarations the
//! merge needs:
//!
//! - raster datasets (`<Raster>` and `<DEM>` elements),
//! - GeoPackage containers (`<Geopackage>`) with their `<Vector>` layers,
//! - the extent polygon path (`<ProjectBounds>/<Path>`),
//! - the project's warehouse identifier (`<Warehouse id>`), used for provenance.
//!
//! Reading is side-effect free. A project whose metadata tree is missing or
//! malformed yields `Error::MetadataParse`; the caller decides to skip it.
//! Individual declarations that cannot be catalogued (no id, path or name)
//! are dropped with a warning and do not fail the project.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::Result;
use crate::logsink::LogSink;
use crate::metadata::{tags, MetadataTree, METADATA_FILE};

/// One source project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Directory holding `project.rs.xml` and the declared artifacts.
    pub root: PathBuf,
    /// Identifier used for provenance (warehouse id, else directory name).
    pub id: String,
}

impl Project {
    /// A project rooted at `root`, identified by its directory name until its
    /// metadata says otherwise.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let id = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        Self { root, id }
    }

    /// Path of this project's metadata tree.
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    /// Absolute path of an artifact declared relative to the project root.
    pub fn resolve(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path.replace('\\', "/"))
    }
}

/// A declared raster dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterDeclaration {
    pub id: String,
    pub rel_path: String,
    pub name: String,
}

/// A declared layer inside a vector container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDeclaration {
    /// Layer (feature class) name inside the container, the `lyrName` attribute.
    pub key: String,
    pub name: String,
}

/// A declared vector container and its layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDeclaration {
    pub id: String,
    pub rel_path: String,
    pub name: String,
    pub layers: Vec<LayerDeclaration>,
}

/// Everything the merge reads from one project's metadata tree.
#[derive(Debug)]
pub struct ProjectReading {
    pub rasters: Vec<RasterDeclaration>,
    pub containers: Vec<ContainerDeclaration>,
    /// Relative path of the extent polygon file, when declared.
    pub bounds_path: Option<String>,
    /// Warehouse identifier, when the project was registered.
    pub warehouse_id: Option<String>,
    /// The parsed tree, kept so the first valid project can serve as template.
    pub tree: MetadataTree,
}

/// Reads project metadata trees, logging every skipped declaration.
pub struct MetadataReader {
    log: LogSink,
}

impl MetadataReader {
    pub fn new(log: &LogSink) -> Self {
        Self {
            log: log.scoped("reader"),
        }
    }

    /// Read the metadata tree of `project`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MetadataParse` when `project.rs.xml` is missing or is
    /// not a valid project document.
    pub fn read(&self, project: &Project) -> Result<ProjectReading> {
        let tree = MetadataTree::load(&project.metadata_path())?;
        let root = tree.root()?;

        let mut rasters = Vec::new();
        let mut raster_nodes = tree.descendants_named(root, tags::RASTER);
        raster_nodes.extend(tree.descendants_named(root, tags::DEM));
        for node in raster_nodes {
            match self.dataset_fields(&tree, node, project, "raster") {
                Some((id, rel_path, name)) => rasters.push(RasterDeclaration { id, rel_path, name }),
                None => continue,
            }
        }

        let mut containers = Vec::new();
        for node in tree.descendants_named(root, tags::GEOPACKAGE) {
            let Some((id, rel_path, name)) = self.dataset_fields(&tree, node, project, "geopackage")
            else {
                continue;
            };

            let mut layers = Vec::new();
            for layer in tree.descendants_named(node, tags::VECTOR) {
                let Some(key) = tree.attribute(layer, tags::ATTR_LAYER_NAME) else {
                    self.log.warn(format!(
                        "Skipping layer without lyrName in geopackage {} of project {}",
                        id, project.id
                    ));
                    continue;
                };
                let name = tree.child_text(layer, tags::NAME).unwrap_or_else(|| key.clone());
                layers.push(LayerDeclaration { key, name });
            }

            containers.push(ContainerDeclaration {
                id,
                rel_path,
                name,
                layers,
            });
        }

        let bounds_path = tree
            .descendants_named(root, tags::PROJECT_BOUNDS)
            .first()
            .and_then(|bounds| tree.child_text(*bounds, tags::PATH));

        let warehouse_id = tree
            .child_named(root, tags::WAREHOUSE)
            .and_then(|w| tree.attribute(w, tags::ATTR_ID))
            .filter(|id| !id.trim().is_empty());

        self.log.debug(format!(
            "Read project {}: {} raster(s), {} geopackage(s), bounds {}",
            project.id,
            rasters.len(),
            containers.len(),
            bounds_path.as_deref().unwrap_or("<none>")
        ));

        Ok(ProjectReading {
            rasters,
            containers,
            bounds_path,
            warehouse_id,
            tree,
        })
    }

    /// Extract `(id, path, name)` from a dataset element, warning when any is
    /// missing.
    fn dataset_fields(
        &self,
        tree: &MetadataTree,
        node: xot::Node,
        project: &Project,
        kind: &str,
    ) -> Option<(String, String, String)> {
        let id = tree.attribute(node, tags::ATTR_ID);
        let rel_path = tree.child_text(node, tags::PATH);
        let name = tree.child_text(node, tags::NAME);

        match (id, rel_path, name) {
            (Some(id), Some(rel_path), Some(name)) => Some((id, rel_path, name)),
            (id, rel_path, _) => {
                self.log.warn(format!(
                    "Skipping {} declaration in project {} (id: {}, path: {}): missing id, Path or Name",
                    kind,
                    project.id,
                    id.as_deref().unwrap_or("<none>"),
                    rel_path.as_deref().unwrap_or("<none>")
                ));
                None
            }
        }
    }
}

/// Find every project directory below `dir`.
///
/// A project directory is one containing `project.rs.xml`. Results are sorted
/// by path so repeated runs supply projects in the same order.
pub fn discover_projects(dir: &Path) -> Vec<Project> {
    let mut roots: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == METADATA_FILE)
        .filter_map(|entry| entry.path().parent().map(Path::to_path_buf))
        .collect();
    roots.sort();
    roots.into_iter().map(Project::new).collect()
}
