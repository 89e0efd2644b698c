use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::coordinates::LatLonBox;
use super::map_type::MapType;

/// The opacity of a node that declares none.
pub const FULL_OPACITY: f64 = 1.;

fn full_opacity() -> f64 {
  FULL_OPACITY
}

#[derive(Error, Debug)]
pub enum TreeError {
  #[error("Failed to parse layer tree: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Failed to access {}: {source}", path.display())]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("Layer id {0:?} is used more than once.")]
  DuplicateId(String),
  #[error("A layer has an empty id.")]
  EmptyId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
  #[default]
  Leaf,
  Folder,
}

/// How a folder treats its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FolderSubtype {
  #[default]
  Plain,
  /// Children are not listed individually in the layer panel.
  Locked,
  /// At most one child is enabled at a time.
  SingleSelect,
}

/// A node of the layer tree. Folders own their children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNode {
  pub id: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub title: String,
  #[serde(default)]
  pub kind: NodeKind,
  #[serde(default)]
  pub folder_subtype: FolderSubtype,
  /// The children are one logical layer at different points in time.
  #[serde(default)]
  pub time_series: bool,
  #[serde(default)]
  pub default_visible: bool,
  /// Opacity between 0 and 1.
  #[serde(default = "full_opacity")]
  pub opacity: f64,
  /// Marks the most recent child of a time-series folder.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub latest: bool,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub children: Vec<LayerNode>,
}

impl LayerNode {
  #[must_use]
  pub fn leaf(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      title: String::new(),
      kind: NodeKind::Leaf,
      folder_subtype: FolderSubtype::Plain,
      time_series: false,
      default_visible: false,
      opacity: FULL_OPACITY,
      latest: false,
      children: Vec::new(),
    }
  }

  #[must_use]
  pub fn folder(id: impl Into<String>, subtype: FolderSubtype) -> Self {
    Self {
      kind: NodeKind::Folder,
      folder_subtype: subtype,
      ..Self::leaf(id)
    }
  }

  #[must_use]
  pub fn with_visible(mut self, visible: bool) -> Self {
    self.default_visible = visible;
    self
  }

  #[must_use]
  pub fn with_opacity(mut self, opacity: f64) -> Self {
    self.opacity = opacity;
    self
  }

  #[must_use]
  pub fn with_time_series(mut self) -> Self {
    self.time_series = true;
    self
  }

  #[must_use]
  pub fn with_latest(mut self) -> Self {
    self.latest = true;
    self
  }

  #[must_use]
  pub fn with_children(mut self, children: Vec<LayerNode>) -> Self {
    self.children = children;
    self
  }

  #[must_use]
  pub fn is_folder(&self) -> bool {
    self.kind == NodeKind::Folder
  }

  /// The folder subtype, `None` for leaves.
  #[must_use]
  pub fn subtype(&self) -> Option<FolderSubtype> {
    self.is_folder().then_some(self.folder_subtype)
  }

  #[must_use]
  pub fn is_single_select(&self) -> bool {
    self.subtype() == Some(FolderSubtype::SingleSelect)
  }

  #[must_use]
  pub fn is_time_series_folder(&self) -> bool {
    self.is_folder() && self.time_series
  }

  fn find(&self, id: &str) -> Option<&LayerNode> {
    if self.id == id {
      return Some(self);
    }
    self.children.iter().find_map(|c| c.find(id))
  }

  fn find_mut(&mut self, id: &str) -> Option<&mut LayerNode> {
    if self.id == id {
      return Some(self);
    }
    self.children.iter_mut().find_map(|c| c.find_mut(id))
  }

  fn for_each_mut(&mut self, f: &mut impl FnMut(&mut LayerNode)) {
    f(self);
    for child in &mut self.children {
      child.for_each_mut(f);
    }
  }
}

/// The map document: root-level settings and the layer forest.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapRoot {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub title: String,
  #[serde(default)]
  pub viewport: Option<LatLonBox>,
  #[serde(default)]
  pub map_type: Option<MapType>,
  /// Identifies the style of a [`MapType::Custom`] base map.
  #[serde(default)]
  pub base_map_style: Option<String>,
  #[serde(default)]
  pub layers: Vec<LayerNode>,
}

impl MapRoot {
  #[must_use]
  pub fn new(layers: Vec<LayerNode>) -> Self {
    Self {
      layers,
      ..Self::default()
    }
  }

  #[must_use]
  pub fn with_map_type(mut self, map_type: MapType) -> Self {
    self.map_type = Some(map_type);
    self
  }

  /// All nodes in document order (depth first, parents before children).
  pub fn nodes(&self) -> Nodes<'_> {
    Nodes {
      stack: self.layers.iter().rev().collect(),
    }
  }

  #[must_use]
  pub fn find(&self, id: &str) -> Option<&LayerNode> {
    self.layers.iter().find_map(|l| l.find(id))
  }

  pub fn find_mut(&mut self, id: &str) -> Option<&mut LayerNode> {
    self.layers.iter_mut().find_map(|l| l.find_mut(id))
  }

  /// The folder holding `id`, `None` for root layers and unknown ids.
  #[must_use]
  pub fn parent_of(&self, id: &str) -> Option<&LayerNode> {
    self
      .nodes()
      .find(|n| n.children.iter().any(|c| c.id == id))
  }

  /// Calls `f` on every node in document order.
  pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut LayerNode)) {
    for layer in &mut self.layers {
      layer.for_each_mut(&mut f);
    }
  }

  /// Checks that every id is non-empty and unique.
  pub fn validate(&self) -> Result<(), TreeError> {
    let mut seen = HashSet::new();
    for node in self.nodes() {
      if node.id.is_empty() {
        return Err(TreeError::EmptyId);
      }
      if !seen.insert(node.id.as_str()) {
        return Err(TreeError::DuplicateId(node.id.clone()));
      }
    }
    Ok(())
  }

  pub fn from_json(json: &str) -> Result<Self, TreeError> {
    let root: Self = serde_json::from_str(json)?;
    root.validate()?;
    Ok(root)
  }

  pub fn to_json(&self) -> Result<String, TreeError> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  pub fn load(path: &Path) -> Result<Self, TreeError> {
    let json = std::fs::read_to_string(path).map_err(|source| TreeError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&json)
  }

  pub fn save(&self, path: &Path) -> Result<(), TreeError> {
    std::fs::write(path, self.to_json()?).map_err(|source| TreeError::Io {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Builds the parent/children lookup for this tree.
  #[must_use]
  pub fn index(&self) -> TreeIndex {
    TreeIndex::new(self)
  }
}

/// Depth-first iterator over the nodes of a [`MapRoot`].
///
/// Created by [`MapRoot::nodes`].
#[derive(Debug)]
pub struct Nodes<'a> {
  stack: Vec<&'a LayerNode>,
}

impl<'a> Iterator for Nodes<'a> {
  type Item = &'a LayerNode;

  fn next(&mut self) -> Option<&'a LayerNode> {
    let node = self.stack.pop()?;
    self.stack.extend(node.children.iter().rev());
    Some(node)
  }
}

/// What the index knows about one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
  pub parent: Option<String>,
  pub kind: NodeKind,
  pub folder_subtype: FolderSubtype,
  pub time_series: bool,
  pub children: Vec<String>,
}

impl IndexEntry {
  #[must_use]
  pub fn is_single_select(&self) -> bool {
    self.kind == NodeKind::Folder && self.folder_subtype == FolderSubtype::SingleSelect
  }

  #[must_use]
  pub fn is_time_series_folder(&self) -> bool {
    self.kind == NodeKind::Folder && self.time_series
  }
}

/// A snapshot of the tree's topology keyed by layer id.
///
/// The tree owns its nodes; this index only records ids, so parent links never form a second
/// ownership path. It has to be rebuilt when the tree changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeIndex {
  entries: HashMap<String, IndexEntry>,
}

impl TreeIndex {
  #[must_use]
  pub fn new(root: &MapRoot) -> Self {
    let mut index = Self::default();
    for layer in &root.layers {
      index.add(layer, None);
    }
    index
  }

  fn add(&mut self, node: &LayerNode, parent: Option<&str>) {
    self.entries.insert(
      node.id.clone(),
      IndexEntry {
        parent: parent.map(str::to_owned),
        kind: node.kind,
        folder_subtype: node.folder_subtype,
        time_series: node.time_series,
        children: node.children.iter().map(|c| c.id.clone()).collect(),
      },
    );
    for child in &node.children {
      self.add(child, Some(&node.id));
    }
  }

  #[must_use]
  pub fn get(&self, id: &str) -> Option<&IndexEntry> {
    self.entries.get(id)
  }

  #[must_use]
  pub fn contains(&self, id: &str) -> bool {
    self.entries.contains_key(id)
  }

  #[must_use]
  pub fn parent_of(&self, id: &str) -> Option<&str> {
    self.entries.get(id)?.parent.as_deref()
  }

  /// The parent's entry, if `id` is known and not a root layer.
  #[must_use]
  pub fn parent_entry(&self, id: &str) -> Option<&IndexEntry> {
    self.get(self.parent_of(id)?)
  }

  /// The direct children of `id` in document order. Empty for leaves and unknown ids.
  #[must_use]
  pub fn children(&self, id: &str) -> &[String] {
    self.entries.get(id).map_or(&[], |e| e.children.as_slice())
  }

  /// Siblings of `id`, excluding itself.
  pub fn siblings<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a String> + 'a {
    self
      .parent_of(id)
      .map(|p| self.children(p))
      .unwrap_or_default()
      .iter()
      .filter(move |s| s.as_str() != id)
  }

  /// Ids of all folders with the given property, in no particular order.
  pub fn folders_where(&self, pred: impl Fn(&IndexEntry) -> bool) -> impl Iterator<Item = &str> {
    self
      .entries
      .iter()
      .filter(move |&(_, e)| e.kind == NodeKind::Folder && pred(e))
      .map(|(id, _)| id.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> MapRoot {
    MapRoot::new(vec![
      LayerNode::folder("weather", FolderSubtype::Plain)
        .with_visible(true)
        .with_children(vec![
          LayerNode::folder("radar", FolderSubtype::SingleSelect).with_children(vec![
            LayerNode::leaf("radar-1"),
            LayerNode::leaf("radar-2"),
          ]),
          LayerNode::leaf("clouds").with_opacity(0.5),
        ]),
      LayerNode::leaf("roads").with_visible(true),
    ])
  }

  #[test]
  fn document_order() {
    let ids: Vec<_> = sample().nodes().map(|n| n.id.clone()).collect();
    assert_eq!(
      ids,
      vec!["weather", "radar", "radar-1", "radar-2", "clouds", "roads"]
    );
  }

  #[test]
  fn parents() {
    let tree = sample();
    assert_eq!(tree.parent_of("radar-2").map(|n| n.id.as_str()), Some("radar"));
    assert_eq!(tree.parent_of("weather"), None);
    assert_eq!(tree.parent_of("unknown"), None);

    let index = tree.index();
    assert_eq!(index.parent_of("radar-2"), Some("radar"));
    assert_eq!(index.parent_of("roads"), None);
    assert!(index.parent_entry("radar-1").unwrap().is_single_select());
    assert_eq!(index.siblings("radar-1").collect::<Vec<_>>(), vec!["radar-2"]);
    assert_eq!(index.siblings("roads").count(), 0);
  }

  #[test]
  fn json_round_trip() {
    let tree = sample().with_map_type(MapType::Terrain);
    let json = tree.to_json().unwrap();
    assert_eq!(MapRoot::from_json(&json).unwrap(), tree);
  }

  #[test]
  fn json_defaults() {
    let tree = MapRoot::from_json(
      r#"{"layers": [{"id": "f", "kind": "folder", "folder_subtype": "single_select",
          "children": [{"id": "a"}]}]}"#,
    )
    .unwrap();
    let f = tree.find("f").unwrap();
    assert!(f.is_single_select());
    assert!(!f.default_visible);
    let a = tree.find("a").unwrap();
    assert_eq!(a.kind, NodeKind::Leaf);
    assert!((a.opacity - FULL_OPACITY).abs() < f64::EPSILON);
    assert_eq!(tree.viewport, None);
  }

  #[test]
  fn rejects_duplicates() {
    let tree = MapRoot::new(vec![
      LayerNode::leaf("a"),
      LayerNode::folder("f", FolderSubtype::Plain).with_children(vec![LayerNode::leaf("a")]),
    ]);
    assert!(matches!(tree.validate(), Err(TreeError::DuplicateId(id)) if id == "a"));
    assert!(matches!(
      MapRoot::new(vec![LayerNode::leaf("")]).validate(),
      Err(TreeError::EmptyId)
    ));
  }

  #[test]
  fn leaves_have_no_subtype() {
    let mut leaf = LayerNode::leaf("a");
    leaf.folder_subtype = FolderSubtype::SingleSelect;
    leaf.time_series = true;
    assert_eq!(leaf.subtype(), None);
    assert!(!leaf.is_single_select());
    assert!(!leaf.is_time_series_folder());
  }
}
