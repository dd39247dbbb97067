//! # Metadata Tree
//!
//! A thin, typed layer over an `xot` arena holding one `project.rs.xml`
//! document. Nodes are `xot::Node` handles into the arena; structural passes
//! that need upward navigation build an explicit child → parent map once per
//! pass with [`MetadataTree::parent_map`] instead of following back-pointers
//! while the tree is being edited.
//!
//! Only element names without a namespace are used by the project format, so
//! every lookup here is by local name.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use xot::{Node, Xot};

use crate::error::{Error, Result};

/// Element and attribute names of the project metadata format.
pub mod tags {
    pub const PROJECT: &str = "Project";
    pub const NAME: &str = "Name";
    pub const DESCRIPTION: &str = "Description";
    pub const PATH: &str = "Path";
    pub const RASTER: &str = "Raster";
    pub const DEM: &str = "DEM";
    pub const GEOPACKAGE: &str = "Geopackage";
    pub const VECTOR: &str = "Vector";
    pub const LOG_FILE: &str = "LogFile";
    pub const META_DATA: &str = "MetaData";
    pub const META: &str = "Meta";
    pub const WAREHOUSE: &str = "Warehouse";
    pub const PROJECT_BOUNDS: &str = "ProjectBounds";
    pub const CENTROID: &str = "Centroid";
    pub const LAT: &str = "Lat";
    pub const LNG: &str = "Lng";
    pub const BOUNDING_BOX: &str = "BoundingBox";
    pub const MIN_LNG: &str = "MinLng";
    pub const MIN_LAT: &str = "MinLat";
    pub const MAX_LNG: &str = "MaxLng";
    pub const MAX_LAT: &str = "MaxLat";

    pub const ATTR_ID: &str = "id";
    pub const ATTR_LAYER_NAME: &str = "lyrName";
    pub const ATTR_NAME: &str = "name";
    pub const ATTR_TYPE: &str = "type";
}

/// File name of a project's metadata tree inside its root directory.
pub const METADATA_FILE: &str = "project.rs.xml";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// A parsed, mutable metadata document.
pub struct MetadataTree {
    xot: Xot,
    document: Node,
    origin: PathBuf,
}

impl std::fmt::Debug for MetadataTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTree")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl MetadataTree {
    /// Load and parse a metadata tree from disk.
    ///
    /// # Errors
    ///
    /// Returns `Error::MetadataParse` when the file cannot be read or is not
    /// well-formed XML.
    pub fn load(path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(path).map_err(|e| Error::MetadataParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&xml, path)
    }

    /// Parse a metadata tree from a string; `origin` is used in error messages.
    pub fn parse(xml: &str, origin: &Path) -> Result<Self> {
        let parse_error = |message: String| Error::MetadataParse {
            path: origin.to_path_buf(),
            message,
        };

        let mut xot = Xot::new();
        let document = xot.parse(xml).map_err(|e| parse_error(e.to_string()))?;
        let tree = Self {
            xot,
            document,
            origin: origin.to_path_buf(),
        };

        let root = tree.root()?;
        if !tree.is_named(root, tags::PROJECT) {
            return Err(parse_error(format!(
                "root element is not <{}>",
                tags::PROJECT
            )));
        }
        Ok(tree)
    }

    /// Produce an independent copy of this tree.
    pub fn duplicate(&self) -> Result<Self> {
        let xml = self.to_xml_string()?;
        Self::parse(&xml, &self.origin)
    }

    /// Path the tree was loaded from.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// The document element (`<Project>`).
    pub fn root(&self) -> Result<Node> {
        self.xot
            .document_element(self.document)
            .map_err(|e| Error::MetadataParse {
                path: self.origin.clone(),
                message: e.to_string(),
            })
    }

    /// Whether `node` is an element with the local name `name`.
    pub fn is_named(&self, node: Node, name: &str) -> bool {
        match (self.xot.element(node), self.xot.name(name)) {
            (Some(element), Some(name_id)) => element.name() == name_id,
            _ => false,
        }
    }

    /// Direct element children of `node` named `name`, in document order.
    pub fn children_named(&self, node: Node, name: &str) -> Vec<Node> {
        self.xot
            .children(node)
            .filter(|child| self.is_named(*child, name))
            .collect()
    }

    /// The first direct element child of `node` named `name`.
    pub fn child_named(&self, node: Node, name: &str) -> Option<Node> {
        self.xot.children(node).find(|child| self.is_named(*child, name))
    }

    /// Every element below `node` (excluding `node`) named `name`, in document
    /// order.
    pub fn descendants_named(&self, node: Node, name: &str) -> Vec<Node> {
        self.xot
            .descendants(node)
            .filter(|d| *d != node && self.is_named(*d, name))
            .collect()
    }

    /// Trimmed text content of an element with a single text child.
    pub fn text(&self, node: Node) -> Option<String> {
        self.xot
            .text_content_str(node)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Trimmed text of the first child element named `name`.
    pub fn child_text(&self, node: Node, name: &str) -> Option<String> {
        self.child_named(node, name).and_then(|child| self.text(child))
    }

    /// Value of an unqualified attribute.
    pub fn attribute(&self, node: Node, name: &str) -> Option<String> {
        let name_id = self.xot.name(name)?;
        self.xot.get_attribute(node, name_id).map(|s| s.to_string())
    }

    pub fn set_attribute(&mut self, node: Node, name: &str, value: &str) {
        let name_id = self.xot.add_name(name);
        self.xot.set_attribute(node, name_id, value);
    }

    /// Replace all children of `node` with a single text node.
    pub fn set_text(&mut self, node: Node, text: &str) -> Result<()> {
        self.clear_children(node)?;
        self.xot.append_text(node, text).map_err(xml_error)
    }

    /// Remove every child of `node`.
    pub fn clear_children(&mut self, node: Node) -> Result<()> {
        let children: Vec<Node> = self.xot.children(node).collect();
        for child in children {
            self.xot.remove(child).map_err(xml_error)?;
        }
        Ok(())
    }

    /// Return the first child element named `name`, creating it at the end of
    /// `parent` when missing.
    pub fn ensure_child(&mut self, parent: Node, name: &str) -> Result<Node> {
        if let Some(existing) = self.child_named(parent, name) {
            return Ok(existing);
        }
        self.append_element(parent, name)
    }

    /// Append a new, empty element named `name` to `parent`.
    pub fn append_element(&mut self, parent: Node, name: &str) -> Result<Node> {
        let name_id = self.xot.add_name(name);
        let element = self.xot.new_element(name_id);
        self.xot.append(parent, element).map_err(xml_error)?;
        Ok(element)
    }

    /// Set the text of child `name` of `parent`, creating the child if needed.
    pub fn set_child_text(&mut self, parent: Node, name: &str, text: &str) -> Result<Node> {
        let child = self.ensure_child(parent, name)?;
        self.set_text(child, text)?;
        Ok(child)
    }

    /// Detach `node` (and its subtree) from the tree.
    pub fn remove(&mut self, node: Node) -> Result<()> {
        self.xot.remove(node).map_err(xml_error)
    }

    /// Map every node below the document element to its parent.
    ///
    /// Built fresh for each structural pass; it is invalidated by removals.
    pub fn parent_map(&self) -> Result<HashMap<Node, Node>> {
        let root = self.root()?;
        let mut parents = HashMap::new();
        for parent in self.xot.descendants(root) {
            for child in self.xot.children(parent) {
                parents.insert(child, parent);
            }
        }
        Ok(parents)
    }

    /// Serialize the document, XML declaration included.
    pub fn to_xml_string(&self) -> Result<String> {
        let body = self.xot.to_string(self.document).map_err(xml_error)?;
        if body.trim_start().starts_with("<?xml") {
            Ok(body)
        } else {
            Ok(format!("{}\n{}", XML_DECLARATION, body))
        }
    }

    /// Write the document to `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let xml = self.to_xml_string()?;
        fs::write(path, xml).map_err(|e| Error::filesystem("write", path, e))
    }
}

fn xml_error(err: impl std::fmt::Display) -> Error {
    Error::Metadata {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Project>
  <Name>Sample</Name>
  <Realizations>
    <Realization id="REALIZATION1">
      <Outputs>
        <Raster id="SLOPE"><Name>Slope</Name><Path>outputs/slope.tif</Path></Raster>
        <Raster id="HAND"><Name>HAND</Name><Path>outputs/hand.tif</Path></Raster>
      </Outputs>
    </Realization>
  </Realizations>
</Project>"#;

    fn sample() -> MetadataTree {
        MetadataTree::parse(SAMPLE, Path::new("sample/project.rs.xml")).unwrap()
    }

    #[test]
    fn test_parse_reads_root_and_children() {
        let tree = sample();
        let root = tree.root().unwrap();
        assert!(tree.is_named(root, tags::PROJECT));
        assert_eq!(tree.child_text(root, tags::NAME).as_deref(), Some("Sample"));
    }

    #[test]
    fn test_parse_rejects_other_root_elements() {
        let result = MetadataTree::parse("<Other/>", Path::new("x.xml"));
        assert!(matches!(result, Err(Error::MetadataParse { .. })));
    }

    #[test]
    fn test_parse_rejects_malformed_xml() {
        let result = MetadataTree::parse("<Project><Name>", Path::new("x.xml"));
        assert!(matches!(result, Err(Error::MetadataParse { .. })));
    }

    #[test]
    fn test_descendants_and_attributes() {
        let tree = sample();
        let root = tree.root().unwrap();
        let rasters = tree.descendants_named(root, tags::RASTER);
        assert_eq!(rasters.len(), 2);
        assert_eq!(tree.attribute(rasters[0], tags::ATTR_ID).as_deref(), Some("SLOPE"));
        assert_eq!(
            tree.child_text(rasters[1], tags::PATH).as_deref(),
            Some("outputs/hand.tif")
        );
        assert_eq!(tree.attribute(rasters[0], "missing"), None);
    }

    #[test]
    fn test_set_child_text_creates_and_replaces() {
        let mut tree = sample();
        let root = tree.root().unwrap();
        tree.set_child_text(root, tags::NAME, "Merged").unwrap();
        tree.set_child_text(root, tags::DESCRIPTION, "New description").unwrap();

        assert_eq!(tree.child_text(root, tags::NAME).as_deref(), Some("Merged"));
        assert_eq!(
            tree.child_text(root, tags::DESCRIPTION).as_deref(),
            Some("New description")
        );
    }

    #[test]
    fn test_parent_map_and_remove() {
        let mut tree = sample();
        let root = tree.root().unwrap();
        let hand = tree.descendants_named(root, tags::RASTER)[1];

        let parents = tree.parent_map().unwrap();
        let outputs = parents[&hand];
        assert!(tree.is_named(outputs, "Outputs"));

        tree.remove(hand).unwrap();
        assert_eq!(tree.descendants_named(root, tags::RASTER).len(), 1);
    }

    #[test]
    fn test_duplicate_is_independent() {
        let original = sample();
        let mut copy = original.duplicate().unwrap();
        let root = copy.root().unwrap();
        copy.set_child_text(root, tags::NAME, "Changed").unwrap();

        let original_root = original.root().unwrap();
        assert_eq!(
            original.child_text(original_root, tags::NAME).as_deref(),
            Some("Sample")
        );
    }

    #[test]
    fn test_serialization_keeps_declaration() {
        let tree = sample();
        let xml = tree.to_xml_string().unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<Path>outputs/slope.tif</Path>"));
    }
}
