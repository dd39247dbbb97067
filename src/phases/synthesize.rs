//! Phase 5: Metadata Synthesis
//!
//! Rewrites the first valid project's metadata tree so it describes the
//! merged output:
//!
//! 1.  Copy the template tree.
//! 2.  Overwrite `<Name>`, `<Description>` and `<ProjectBounds>` (centroid,
//!     bounding box and path of the unioned extent).
//! 3.  Replace the project-level `<MetaData>` with provenance: the source
//!     project URLs, creation date, merge type and collection id.
//! 4.  Drop `<Warehouse>`; the merged project is not registered yet.
//! 5.  Prune every declaration whose `<Path>` is not a GeoPackage, GeoJSON,
//!     GeoTIFF or log, or names a file the merge did not produce.
//! 6.  Point every `<LogFile>` at the merge log, or drop them when the merge
//!     wrote none.
//!
//! After synthesis every `<Path>` in the tree names a file that exists in the
//! output directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use super::extent::ExtentSummary;
use crate::config::{project_type_label, Stage};
use crate::error::{Error, Result};
use crate::logsink::LogSink;
use crate::metadata::{tags, MetadataTree, METADATA_FILE};

/// File extensions a merged project may declare.
pub const KEPT_EXTENSIONS: [&str; 5] = ["gpkg", "geojson", "tif", "tiff", "log"];

/// Everything synthesis needs to know about the merge.
#[derive(Debug, Clone)]
pub struct SynthesisContext<'a> {
    pub name: &'a str,
    pub project_type: &'a str,
    pub collection_id: Option<&'a str>,
    pub stage: Stage,
    /// Identifiers of the projects that contributed, in merge order.
    pub project_ids: &'a [String],
    pub extent: &'a ExtentSummary,
    pub output_dir: &'a Path,
    /// The merge log, when one is written.
    pub log_file: Option<&'a Path>,
    pub created: DateTime<Utc>,
}

/// Build the merged metadata tree from `template`.
pub fn synthesize(template: &MetadataTree, context: &SynthesisContext<'_>, log: &LogSink) -> Result<MetadataTree> {
    let mut tree = template.duplicate()?;
    let root = tree.root()?;

    tree.set_child_text(root, tags::NAME, context.name)?;
    tree.set_child_text(root, tags::DESCRIPTION, &description(context))?;
    write_bounds(&mut tree, context)?;
    write_provenance(&mut tree, context)?;

    for warehouse in tree.children_named(root, tags::WAREHOUSE) {
        tree.remove(warehouse)?;
    }

    let pruned = prune_paths(&mut tree, context.output_dir, log)?;
    log.debug(format!("Pruned {} declaration(s) from the merged metadata", pruned));
    redirect_logs(&mut tree, context.output_dir, context.log_file)?;

    Ok(tree)
}

fn description(context: &SynthesisContext<'_>) -> String {
    format!(
        "This project was generated by merging {} {} projects together, using the merge-projects tool. \
         The project bounds are the union of the bounds of the individual projects.",
        context.project_ids.len(),
        context.project_type
    )
}

fn write_bounds(tree: &mut MetadataTree, context: &SynthesisContext<'_>) -> Result<()> {
    let root = tree.root()?;
    let bounds = tree.ensure_child(root, tags::PROJECT_BOUNDS)?;
    tree.clear_children(bounds)?;

    let centroid = tree.append_element(bounds, tags::CENTROID)?;
    tree.set_child_text(centroid, tags::LAT, &context.extent.centroid.y().to_string())?;
    tree.set_child_text(centroid, tags::LNG, &context.extent.centroid.x().to_string())?;

    let (min_x, max_x, min_y, max_y) = context.extent.bounding_rect.as_tuple();
    let bbox = tree.append_element(bounds, tags::BOUNDING_BOX)?;
    tree.set_child_text(bbox, tags::MIN_LNG, &min_x.to_string())?;
    tree.set_child_text(bbox, tags::MIN_LAT, &min_y.to_string())?;
    tree.set_child_text(bbox, tags::MAX_LNG, &max_x.to_string())?;
    tree.set_child_text(bbox, tags::MAX_LAT, &max_y.to_string())?;

    let file_name = context
        .extent
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::Metadata {
            message: format!("extent path {} has no file name", context.extent.path.display()),
        })?;
    tree.set_child_text(bounds, tags::PATH, &file_name)?;
    Ok(())
}

fn write_provenance(tree: &mut MetadataTree, context: &SynthesisContext<'_>) -> Result<()> {
    let root = tree.root()?;
    let meta_data = tree.ensure_child(root, tags::META_DATA)?;
    tree.clear_children(meta_data)?;

    let urls = context
        .project_ids
        .iter()
        .map(|id| context.stage.project_url(id).map(String::from))
        .collect::<Result<Vec<_>>>()?;
    let created = context.created.to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut entries: Vec<(&str, String, Option<&str>)> = vec![
        ("projects", serde_json::to_string(&urls)?, Some("json")),
        ("Date Created", created, Some("isodate")),
        ("Merge Type", project_type_label(context.project_type).to_string(), None),
    ];
    if let Some(collection_id) = context.collection_id {
        entries.push(("Collection ID", collection_id.to_string(), None));
    }

    for (name, value, kind) in entries {
        let meta = tree.append_element(meta_data, tags::META)?;
        tree.set_attribute(meta, tags::ATTR_NAME, name);
        if let Some(kind) = kind {
            tree.set_attribute(meta, tags::ATTR_TYPE, kind);
        }
        tree.set_text(meta, &value)?;
    }
    Ok(())
}

/// Remove every declaration whose `<Path>` has an unsupported extension or
/// names a file missing from `output_dir`. Log file declarations are exempt
/// from the existence check; they are redirected afterwards.
///
/// Returns the number of declarations removed.
pub fn prune_paths(tree: &mut MetadataTree, output_dir: &Path, log: &LogSink) -> Result<usize> {
    let root = tree.root()?;
    let parents = tree.parent_map()?;

    let mut doomed = Vec::new();
    let mut seen = HashSet::new();
    for path_node in tree.descendants_named(root, tags::PATH) {
        let Some(&declaration) = parents.get(&path_node) else {
            continue;
        };
        if declaration == root || !seen.insert(declaration) {
            continue;
        }

        let rel_path = tree.text(path_node).unwrap_or_default().replace('\\', "/");
        let extension = Path::new(&rel_path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if !KEPT_EXTENSIONS.contains(&extension.as_str()) {
            log.info(format!(
                "Removing non GeoPackage, raster or log declaration with path {}",
                rel_path
            ));
            doomed.push(declaration);
        } else if !tree.is_named(declaration, tags::LOG_FILE) && !output_dir.join(&rel_path).is_file() {
            log.info(format!("Removing declaration of unmerged file {}", rel_path));
            doomed.push(declaration);
        }
    }

    // Skip declarations nested inside one already being removed.
    let doomed_set: HashSet<_> = doomed.iter().copied().collect();
    let mut removed = 0;
    for node in &doomed {
        let mut ancestor = parents.get(node);
        let mut nested = false;
        while let Some(parent) = ancestor {
            if doomed_set.contains(parent) {
                nested = true;
                break;
            }
            ancestor = parents.get(parent);
        }
        if !nested {
            tree.remove(*node)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Point every `<LogFile>/<Path>` at `log_file`, relative to `output_dir`.
///
/// The log declarations are removed when there is no log file or it lies
/// outside `output_dir`.
pub fn redirect_logs(tree: &mut MetadataTree, output_dir: &Path, log_file: Option<&Path>) -> Result<()> {
    let root = tree.root()?;
    let log_path = log_file
        .and_then(|p| p.strip_prefix(output_dir).ok())
        .filter(|rel| rel.file_name().is_some())
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        });

    for declaration in tree.descendants_named(root, tags::LOG_FILE) {
        match &log_path {
            Some(path) => {
                tree.set_child_text(declaration, tags::PATH, path)?;
            }
            None => tree.remove(declaration)?,
        }
    }
    Ok(())
}

/// Execute Phase 5: synthesize and write `<output_dir>/project.rs.xml`.
pub fn execute(template: &MetadataTree, context: &SynthesisContext<'_>, log: &LogSink) -> Result<PathBuf> {
    let log = log.scoped("synthesize");
    let tree = synthesize(template, context, &log)?;
    let path = context.output_dir.join(METADATA_FILE);
    tree.write(&path)?;
    log.info(format!("Merged metadata written to {}", path.display()));
    Ok(path)
}
