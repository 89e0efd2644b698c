use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::notify::{ChangeNotifier, Field, SubscriptionId};
use crate::map::coordinates::LatLonBox;
use crate::map::layer_tree::{FULL_OPACITY, IndexEntry, LayerNode, MapRoot, NodeKind, TreeIndex};
use crate::map::map_type::MapType;

pub const DEFAULT_LOCALE: &str = "en";

/// Misuse of a folder-scoped operation. These indicate a caller bug, not bad input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
  #[error("Unknown layer {0:?}.")]
  UnknownLayer(String),
  #[error("Layer {0:?} is not a folder.")]
  NotAFolder(String),
  #[error("Layer {0:?} is not a single-select folder.")]
  NotSingleSelect(String),
  #[error("The parent of layer {0:?} is not a time-series folder.")]
  NotTimeSeries(String),
}

/// Converts an opacity between 0 and 1 into whole percent.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn opacity_percent(opacity: f64) -> u8 {
  (opacity.clamp(0., 1.) * 100.).round() as u8
}

/// The plain data of a [`StateStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
  pub locale: String,
  pub enabled_layer_ids: BTreeSet<String>,
  pub promoted_layer_ids: BTreeSet<String>,
  /// Opacity overrides in percent. Absent ids use the tree's opacity.
  pub layer_opacities: BTreeMap<String, u8>,
  pub viewport: LatLonBox,
  pub map_type: MapType,
  pub base_map_style: Option<String>,
  pub filter_query: String,
}

impl ViewState {
  #[must_use]
  pub fn new(locale: impl Into<String>) -> Self {
    Self {
      locale: locale.into(),
      enabled_layer_ids: BTreeSet::new(),
      promoted_layer_ids: BTreeSet::new(),
      layer_opacities: BTreeMap::new(),
      viewport: LatLonBox::default(),
      map_type: MapType::default(),
      base_map_style: None,
      filter_query: String::new(),
    }
  }

  /// Fields whose values differ between `self` and `other`.
  fn changed_fields(&self, other: &Self) -> Vec<Field> {
    let mut changed = Vec::new();
    if self.enabled_layer_ids != other.enabled_layer_ids {
      changed.push(Field::EnabledLayerIds);
    }
    if self.promoted_layer_ids != other.promoted_layer_ids {
      changed.push(Field::PromotedLayerIds);
    }
    if self.layer_opacities != other.layer_opacities {
      changed.push(Field::LayerOpacities);
    }
    if self.viewport != other.viewport {
      changed.push(Field::Viewport);
    }
    if self.map_type != other.map_type {
      changed.push(Field::MapType);
    }
    if self.base_map_style != other.base_map_style {
      changed.push(Field::BaseMapStyle);
    }
    if self.filter_query != other.filter_query {
      changed.push(Field::FilterQuery);
    }
    if self.locale != other.locale {
      changed.push(Field::Locale);
    }
    changed
  }
}

impl Default for ViewState {
  fn default() -> Self {
    Self::new(DEFAULT_LOCALE)
  }
}

/// The view state of one map session.
///
/// Holds which layers are enabled or promoted, opacity overrides, the viewport and the base
/// map, and keeps the folder invariants of the layer tree it was last initialized or
/// reconciled with. Every mutation that changes a field notifies the subscribers of that
/// field once.
#[derive(Debug, Default)]
pub struct StateStore {
  state: ViewState,
  index: TreeIndex,
  notifier: ChangeNotifier,
}

impl Clone for StateStore {
  fn clone(&self) -> Self {
    Self::from_state(self)
  }
}

impl StateStore {
  #[must_use]
  pub fn new(locale: impl Into<String>) -> Self {
    Self {
      state: ViewState::new(locale),
      index: TreeIndex::default(),
      notifier: ChangeNotifier::default(),
    }
  }

  /// A deep copy of `other`'s fields. Subscriptions are not copied.
  #[must_use]
  pub fn from_state(other: &StateStore) -> Self {
    Self {
      state: other.state.clone(),
      index: other.index.clone(),
      notifier: ChangeNotifier::default(),
    }
  }

  #[must_use]
  pub fn state(&self) -> &ViewState {
    &self.state
  }

  /// The topology of the tree last used to initialize or reconcile the store.
  #[must_use]
  pub fn tree_index(&self) -> &TreeIndex {
    &self.index
  }

  #[must_use]
  pub fn locale(&self) -> &str {
    &self.state.locale
  }

  #[must_use]
  pub fn enabled_layer_ids(&self) -> &BTreeSet<String> {
    &self.state.enabled_layer_ids
  }

  #[must_use]
  pub fn promoted_layer_ids(&self) -> &BTreeSet<String> {
    &self.state.promoted_layer_ids
  }

  #[must_use]
  pub fn layer_opacities(&self) -> &BTreeMap<String, u8> {
    &self.state.layer_opacities
  }

  #[must_use]
  pub fn viewport(&self) -> LatLonBox {
    self.state.viewport
  }

  #[must_use]
  pub fn map_type(&self) -> MapType {
    self.state.map_type
  }

  #[must_use]
  pub fn base_map_style(&self) -> Option<&str> {
    self.state.base_map_style.as_deref()
  }

  #[must_use]
  pub fn filter_query(&self) -> &str {
    &self.state.filter_query
  }

  // -- Subscriptions --

  /// Registers `handler` for changes of `field`.
  pub fn subscribe(
    &mut self,
    field: Field,
    handler: impl FnMut(&mut StateStore, Field) + 'static,
  ) -> SubscriptionId {
    self.notifier.subscribe(Some(field), Box::new(handler))
  }

  /// Registers `handler` for changes of any field.
  pub fn subscribe_all(
    &mut self,
    handler: impl FnMut(&mut StateStore, Field) + 'static,
  ) -> SubscriptionId {
    self.notifier.subscribe(None, Box::new(handler))
  }

  /// Returns whether the subscription existed.
  pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
    self.notifier.unsubscribe(id)
  }

  fn emit(&mut self, field: Field) {
    debug!("{}", field.event_name());
    if !self.notifier.enqueue(field) {
      return;
    }
    while let Some(field) = self.notifier.next_pending() {
      let mut handlers = self.notifier.take_handlers();
      for sub in &mut handlers {
        if sub.matches(field) && self.notifier.is_live(sub.id()) {
          sub.call(self, field);
        }
      }
      self.notifier.restore_handlers(handlers);
    }
  }

  fn emit_all(&mut self, fields: Vec<Field>) {
    for field in fields {
      self.emit(field);
    }
  }

  // -- Enabling and selection --

  #[must_use]
  pub fn layer_enabled(&self, id: &str) -> bool {
    self.state.enabled_layer_ids.contains(id)
  }

  /// Enables or disables `id`. Enabling a child of a single-select folder disables its
  /// siblings in the same step.
  pub fn set_layer_enabled(&mut self, id: &str, enabled: bool) {
    let enabled_ids = &mut self.state.enabled_layer_ids;
    let mut changed = false;
    if enabled
      && self
        .index
        .parent_entry(id)
        .is_some_and(IndexEntry::is_single_select)
    {
      for sibling in self.index.siblings(id) {
        changed |= enabled_ids.remove(sibling);
      }
    }
    changed |= if enabled {
      enabled_ids.insert(id.to_owned())
    } else {
      enabled_ids.remove(id)
    };

    if changed {
      debug!("Layer {id} enabled: {enabled}");
      self.emit(Field::EnabledLayerIds);
    }
  }

  /// Selects `id` in the single-select `folder`.
  ///
  /// With `force_one_selected`, an `id` that is not a child of `folder` selects the first
  /// child instead if nothing in the folder is selected yet.
  pub fn select_sublayer(
    &mut self,
    folder: &str,
    id: &str,
    force_one_selected: bool,
  ) -> Result<(), StateError> {
    let entry = self
      .index
      .get(folder)
      .ok_or_else(|| StateError::UnknownLayer(folder.to_owned()))?;
    if !entry.is_single_select() {
      return Err(StateError::NotSingleSelect(folder.to_owned()));
    }

    let is_child = entry.children.iter().any(|c| c == id);
    let has_selection = entry.children.iter().any(|c| self.layer_enabled(c));
    let fallback = entry.children.first().cloned();

    match fallback {
      Some(first) if !is_child && force_one_selected && !has_selection => {
        debug!("{id} is not in {folder}, selecting {first} instead.");
        self.set_layer_enabled(&first, true);
      }
      _ => self.set_layer_enabled(id, true),
    }
    Ok(())
  }

  /// Makes `id` the displayed sublayer of its time-series folder.
  pub fn promote_layer(&mut self, id: &str) -> Result<(), StateError> {
    if !self.index.contains(id) {
      return Err(StateError::UnknownLayer(id.to_owned()));
    }
    let Some(parent) = self
      .index
      .parent_entry(id)
      .filter(|p| p.is_time_series_folder())
    else {
      return Err(StateError::NotTimeSeries(id.to_owned()));
    };

    let promoted = &mut self.state.promoted_layer_ids;
    let mut changed = false;
    for sibling in parent.children.iter().filter(|c| c.as_str() != id) {
      changed |= promoted.remove(sibling);
    }
    changed |= promoted.insert(id.to_owned());

    if changed {
      debug!("Promoted {id}");
      self.emit(Field::PromotedLayerIds);
    }
    Ok(())
  }

  /// Removes every direct child of `folder` from the promoted layers.
  pub fn demote_sublayers(&mut self, folder: &str) -> Result<(), StateError> {
    let entry = self
      .index
      .get(folder)
      .ok_or_else(|| StateError::UnknownLayer(folder.to_owned()))?;
    if entry.kind != NodeKind::Folder {
      return Err(StateError::NotAFolder(folder.to_owned()));
    }

    let promoted = &mut self.state.promoted_layer_ids;
    let mut changed = false;
    for child in &entry.children {
      changed |= promoted.remove(child);
    }

    if changed {
      debug!("Demoted sublayers of {folder}");
      self.emit(Field::PromotedLayerIds);
    }
    Ok(())
  }

  /// Ids of the layers drawn on the map: enabled layers whose ancestors are all enabled.
  #[must_use]
  pub fn visible_layer_ids(&self, tree: &MapRoot) -> BTreeSet<String> {
    let mut visible = BTreeSet::new();
    self.collect_visible(&tree.layers, &mut visible);
    visible
  }

  fn collect_visible(&self, nodes: &[LayerNode], visible: &mut BTreeSet<String>) {
    for node in nodes.iter().filter(|n| self.layer_enabled(&n.id)) {
      visible.insert(node.id.clone());
      self.collect_visible(&node.children, visible);
    }
  }

  // -- Plain setters --

  /// Replaces the enabled layers without enforcing folder invariants. Use
  /// [`StateStore::reconcile_with_tree`] afterwards.
  pub fn set_enabled_layer_ids(&mut self, ids: BTreeSet<String>) {
    if self.state.enabled_layer_ids != ids {
      self.state.enabled_layer_ids = ids;
      self.emit(Field::EnabledLayerIds);
    }
  }

  /// Adds promoted layers without checking their folders.
  pub fn add_promoted_layer_ids(&mut self, ids: impl IntoIterator<Item = String>) {
    let mut changed = false;
    for id in ids {
      changed |= self.state.promoted_layer_ids.insert(id);
    }
    if changed {
      self.emit(Field::PromotedLayerIds);
    }
  }

  /// The opacity override of `id` in percent.
  #[must_use]
  pub fn layer_opacity(&self, id: &str) -> Option<u8> {
    self.state.layer_opacities.get(id).copied()
  }

  /// Sets or clears the opacity override of `id`. Values above 100 are clamped.
  pub fn set_layer_opacity(&mut self, id: &str, opacity: Option<u8>) {
    let opacities = &mut self.state.layer_opacities;
    let previous = match opacity {
      Some(o) => opacities.insert(id.to_owned(), o.min(100)),
      None => opacities.remove(id),
    };
    if previous != opacity.map(|o| o.min(100)) {
      self.emit(Field::LayerOpacities);
    }
  }

  pub fn set_layer_opacities(&mut self, opacities: BTreeMap<String, u8>) {
    let opacities = opacities
      .into_iter()
      .map(|(id, o)| (id, o.min(100)))
      .collect();
    if self.state.layer_opacities != opacities {
      self.state.layer_opacities = opacities;
      self.emit(Field::LayerOpacities);
    }
  }

  pub fn set_viewport(&mut self, viewport: LatLonBox) {
    if self.state.viewport != viewport {
      self.state.viewport = viewport;
      self.emit(Field::Viewport);
    }
  }

  pub fn set_map_type(&mut self, map_type: MapType) {
    if self.state.map_type != map_type {
      self.state.map_type = map_type;
      self.emit(Field::MapType);
    }
  }

  pub fn set_base_map_style(&mut self, style: Option<String>) {
    if self.state.base_map_style != style {
      self.state.base_map_style = style;
      self.emit(Field::BaseMapStyle);
    }
  }

  pub fn set_filter_query(&mut self, query: impl Into<String>) {
    let query = query.into();
    if self.state.filter_query != query {
      self.state.filter_query = query;
      self.emit(Field::FilterQuery);
    }
  }

  pub fn set_locale(&mut self, locale: impl Into<String>) {
    let locale = locale.into();
    if self.state.locale != locale {
      self.state.locale = locale;
      self.emit(Field::Locale);
    }
  }

  // -- Tree synchronization --

  /// Resets the state to the defaults declared by `tree`. The locale is kept and the filter
  /// query is cleared.
  #[allow(clippy::float_cmp)]
  pub fn initialize_from_tree(&mut self, tree: &MapRoot) {
    let mut next = ViewState::new(self.state.locale.clone());
    collect_default_enabled(&tree.layers, false, &mut next.enabled_layer_ids);

    for node in tree.nodes() {
      if node.opacity != FULL_OPACITY {
        next
          .layer_opacities
          .insert(node.id.clone(), opacity_percent(node.opacity));
      }
      if node.is_time_series_folder()
        && let Some(latest) = node.children.iter().find(|c| c.latest)
      {
        next.promoted_layer_ids.insert(latest.id.clone());
      }
    }

    next.viewport = tree.viewport.unwrap_or_default();
    next.map_type = tree.map_type.unwrap_or_default();
    next.base_map_style.clone_from(&tree.base_map_style);

    self.index = tree.index();
    let changed = next.changed_fields(&self.state);
    self.state = next;
    debug!(
      "Initialized from tree with {} enabled layers, changed: {changed:?}",
      self.state.enabled_layer_ids.len()
    );
    self.emit_all(changed);
  }

  /// Writes visibility, opacity, viewport and base map onto `tree`. Promotion is view-only
  /// and not written.
  pub fn write_back_to_tree(&self, tree: &mut MapRoot) {
    tree.for_each_mut(|node| {
      node.default_visible = self.layer_enabled(&node.id);
      node.opacity = self
        .layer_opacity(&node.id)
        .map_or(FULL_OPACITY, |o| f64::from(o) / 100.);
    });
    tree.viewport = Some(self.state.viewport);
    tree.map_type = Some(self.state.map_type);
    tree.base_map_style.clone_from(&self.state.base_map_style);
  }

  /// Adopts the topology of a changed `tree` and restores the folder invariants:
  /// promoted layers must be children of time-series folders (at most one per folder), and
  /// single-select folders keep only their first enabled child.
  pub fn reconcile_with_tree(&mut self, tree: &MapRoot) {
    self.index = tree.index();
    let mut next = self.state.clone();

    next.promoted_layer_ids.retain(|id| {
      self
        .index
        .parent_entry(id)
        .is_some_and(IndexEntry::is_time_series_folder)
    });
    for folder in self.index.folders_where(IndexEntry::is_time_series_folder) {
      keep_first_member(self.index.children(folder), &mut next.promoted_layer_ids);
    }
    for folder in self.index.folders_where(IndexEntry::is_single_select) {
      keep_first_member(self.index.children(folder), &mut next.enabled_layer_ids);
    }

    let changed = next.changed_fields(&self.state);
    if !changed.is_empty() {
      debug!("Reconciled with tree, changed: {changed:?}");
    }
    self.state = next;
    self.emit_all(changed);
  }
}

/// Adds the default-visible nodes to `enabled`. Children of a single-select folder contribute
/// exactly one id: the first default-visible child, or the first child.
fn collect_default_enabled(
  nodes: &[LayerNode],
  single_select: bool,
  enabled: &mut BTreeSet<String>,
) {
  if single_select
    && let Some(chosen) = nodes.iter().find(|n| n.default_visible).or(nodes.first())
  {
    enabled.insert(chosen.id.clone());
  }
  for node in nodes {
    if !single_select && node.default_visible {
      enabled.insert(node.id.clone());
    }
    collect_default_enabled(&node.children, node.is_single_select(), enabled);
  }
}

/// Removes all but the first of `children` (in order) from `set`.
fn keep_first_member(children: &[String], set: &mut BTreeSet<String>) {
  let mut kept = false;
  for child in children {
    if set.contains(child) {
      if kept {
        set.remove(child);
      }
      kept = true;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::map::layer_tree::FolderSubtype;
  use std::cell::RefCell;
  use std::rc::Rc;

  fn radio_tree() -> MapRoot {
    MapRoot::new(vec![
      LayerNode::folder("basemaps", FolderSubtype::SingleSelect)
        .with_visible(true)
        .with_children(vec![
          LayerNode::leaf("streets"),
          LayerNode::leaf("topo").with_visible(true),
          LayerNode::leaf("dark"),
        ]),
      LayerNode::folder("radar", FolderSubtype::Plain)
        .with_time_series()
        .with_visible(true)
        .with_children(vec![
          LayerNode::leaf("radar-0900"),
          LayerNode::leaf("radar-1000").with_latest(),
        ]),
      LayerNode::leaf("roads").with_opacity(0.25),
    ])
  }

  fn counting(store: &mut StateStore, field: Field) -> Rc<RefCell<usize>> {
    let count = Rc::new(RefCell::new(0));
    let c = count.clone();
    store.subscribe(field, move |_, _| *c.borrow_mut() += 1);
    count
  }

  fn enabled_children(store: &StateStore, folder: &str) -> usize {
    store
      .tree_index()
      .children(folder)
      .iter()
      .filter(|c| store.layer_enabled(c))
      .count()
  }

  #[test]
  fn set_layer_enabled_is_idempotent() {
    let mut store = StateStore::default();
    let count = counting(&mut store, Field::EnabledLayerIds);

    store.set_layer_enabled("a", true);
    store.set_layer_enabled("a", true);
    assert_eq!(*count.borrow(), 1);

    store.set_layer_enabled("a", false);
    store.set_layer_enabled("a", false);
    assert_eq!(*count.borrow(), 2);
    assert!(!store.layer_enabled("a"));
  }

  #[test]
  fn single_select_keeps_one_child() {
    let mut store = StateStore::default();
    store.initialize_from_tree(&radio_tree());
    let count = counting(&mut store, Field::EnabledLayerIds);

    store.set_layer_enabled("streets", true);
    assert_eq!(*count.borrow(), 1, "removal and addition notify once");
    assert!(store.layer_enabled("streets"));
    assert!(!store.layer_enabled("topo"));

    store.select_sublayer("basemaps", "dark", false).unwrap();
    store.set_layer_enabled("topo", true);
    store.select_sublayer("basemaps", "streets", true).unwrap();
    assert_eq!(enabled_children(&store, "basemaps"), 1);
    assert!(store.layer_enabled("streets"));

    store.set_layer_enabled("streets", false);
    assert_eq!(enabled_children(&store, "basemaps"), 0);
  }

  #[test]
  fn select_sublayer_forces_first_child() {
    let mut store = StateStore::default();
    store.initialize_from_tree(&radio_tree());
    store.set_layer_enabled("topo", false);

    store.select_sublayer("basemaps", "missing", true).unwrap();
    assert!(store.layer_enabled("streets"));
    assert!(!store.layer_enabled("missing"));

    // With a selection in place a foreign id is accepted as is.
    store.select_sublayer("basemaps", "missing", true).unwrap();
    assert!(store.layer_enabled("missing"));
    assert!(store.layer_enabled("streets"));
  }

  #[test]
  fn folder_operations_check_their_target() {
    let mut store = StateStore::default();
    store.initialize_from_tree(&radio_tree());

    assert_eq!(
      store.select_sublayer("radar", "radar-0900", false),
      Err(StateError::NotSingleSelect("radar".to_string()))
    );
    assert_eq!(
      store.select_sublayer("nope", "x", false),
      Err(StateError::UnknownLayer("nope".to_string()))
    );
    assert_eq!(
      store.promote_layer("streets"),
      Err(StateError::NotTimeSeries("streets".to_string()))
    );
    assert_eq!(
      store.demote_sublayers("roads"),
      Err(StateError::NotAFolder("roads".to_string()))
    );
  }

  #[test]
  fn visibility_requires_enabled_ancestors() {
    let tree = MapRoot::new(vec![
      LayerNode::folder("root", FolderSubtype::Plain)
        .with_visible(true)
        .with_children(vec![
          LayerNode::folder("mid", FolderSubtype::Plain)
            .with_children(vec![LayerNode::leaf("leaf").with_visible(true)]),
        ]),
    ]);
    let mut store = StateStore::default();
    store.initialize_from_tree(&tree);

    let visible = store.visible_layer_ids(&tree);
    assert_eq!(visible, BTreeSet::from(["root".to_string()]));
    assert!(store.layer_enabled("leaf"));

    store.set_layer_enabled("mid", true);
    assert_eq!(
      store.visible_layer_ids(&tree),
      BTreeSet::from(["root".to_string(), "mid".to_string(), "leaf".to_string()])
    );
  }

  #[test]
  fn clones_are_independent() {
    let mut a = StateStore::new("de");
    a.initialize_from_tree(&radio_tree());
    let mut b = StateStore::from_state(&a);
    b.set_layer_enabled("x", true);
    b.set_layer_opacity("roads", Some(90));
    b.set_locale("fr");

    assert!(!a.layer_enabled("x"));
    assert_eq!(a.layer_opacity("roads"), Some(25));
    assert_eq!(a.locale(), "de");

    a.set_layer_enabled("y", true);
    assert!(!b.layer_enabled("y"));
  }

  #[test]
  fn clone_does_not_copy_subscriptions() {
    let mut a = StateStore::default();
    let count = counting(&mut a, Field::MapType);
    let mut b = a.clone();
    b.set_map_type(MapType::Hybrid);
    assert_eq!(*count.borrow(), 0);
    assert_eq!(a.map_type(), MapType::Roadmap);
  }

  #[test]
  fn initialize_picks_defaults() {
    let mut store = StateStore::new("fr");
    store.set_filter_query("fire");
    store.initialize_from_tree(&radio_tree());

    assert_eq!(
      store.enabled_layer_ids(),
      &BTreeSet::from([
        "basemaps".to_string(),
        "topo".to_string(),
        "radar".to_string()
      ])
    );
    assert_eq!(
      store.promoted_layer_ids(),
      &BTreeSet::from(["radar-1000".to_string()])
    );
    assert_eq!(
      store.layer_opacities(),
      &BTreeMap::from([("roads".to_string(), 25)])
    );
    assert_eq!(store.viewport(), LatLonBox::default());
    assert_eq!(store.map_type(), MapType::Roadmap);
    assert_eq!(store.filter_query(), "");
    assert_eq!(store.locale(), "fr");
  }

  #[test]
  fn single_select_without_defaults_takes_first_child() {
    let tree = MapRoot::new(vec![
      LayerNode::folder("f", FolderSubtype::SingleSelect).with_children(vec![
        LayerNode::leaf("a"),
        LayerNode::leaf("b"),
      ]),
      LayerNode::folder("g", FolderSubtype::SingleSelect).with_children(vec![
        LayerNode::leaf("c"),
        LayerNode::leaf("d").with_visible(true),
        LayerNode::leaf("e").with_visible(true),
      ]),
      LayerNode::folder("empty", FolderSubtype::SingleSelect),
    ]);
    let mut store = StateStore::default();
    store.initialize_from_tree(&tree);

    assert!(store.layer_enabled("a"));
    assert!(!store.layer_enabled("b"));
    assert!(store.layer_enabled("d"));
    assert!(!store.layer_enabled("c"));
    assert!(!store.layer_enabled("e"));
    assert_eq!(enabled_children(&store, "empty"), 0);
  }

  #[test]
  fn initialize_notifies_changed_fields_only() {
    let tree = radio_tree();
    let mut store = StateStore::default();
    let fields = Rc::new(RefCell::new(Vec::new()));
    let f = fields.clone();
    store.subscribe_all(move |_, field| f.borrow_mut().push(field));

    store.initialize_from_tree(&tree);
    assert_eq!(
      *fields.borrow(),
      vec![
        Field::EnabledLayerIds,
        Field::PromotedLayerIds,
        Field::LayerOpacities
      ]
    );

    fields.borrow_mut().clear();
    store.initialize_from_tree(&tree);
    assert!(fields.borrow().is_empty());
  }

  #[test]
  fn promotion_and_demotion() {
    let mut store = StateStore::default();
    store.initialize_from_tree(&radio_tree());
    store.set_layer_enabled("radar-0900", true);

    store.promote_layer("radar-0900").unwrap();
    assert_eq!(
      store.promoted_layer_ids(),
      &BTreeSet::from(["radar-0900".to_string()])
    );
    store.promote_layer("radar-1000").unwrap();
    assert_eq!(
      store.promoted_layer_ids(),
      &BTreeSet::from(["radar-1000".to_string()])
    );

    let enabled_before = store.enabled_layer_ids().clone();
    store.demote_sublayers("radar").unwrap();
    assert!(store.promoted_layer_ids().is_empty());
    assert_eq!(store.enabled_layer_ids(), &enabled_before);
  }

  #[test]
  fn write_back_sets_flags() {
    let mut tree = radio_tree();
    let mut store = StateStore::default();
    store.initialize_from_tree(&tree);
    store.set_layer_enabled("roads", true);
    store.set_layer_opacity("roads", None);
    store.set_layer_opacity("dark", Some(40));
    store.set_map_type(MapType::Terrain);

    store.write_back_to_tree(&mut tree);
    let roads = tree.find("roads").unwrap();
    assert!(roads.default_visible);
    assert!((roads.opacity - 1.).abs() < f64::EPSILON);
    assert!((tree.find("dark").unwrap().opacity - 0.4).abs() < 1e-9);
    assert!(!tree.find("streets").unwrap().default_visible);
    assert_eq!(tree.map_type, Some(MapType::Terrain));
    assert_eq!(tree.viewport, Some(LatLonBox::default()));
  }

  #[test]
  fn reconcile_restores_invariants() {
    let mut tree = radio_tree();
    let mut store = StateStore::default();
    store.initialize_from_tree(&tree);
    store.set_enabled_layer_ids(BTreeSet::from([
      "basemaps".to_string(),
      "streets".to_string(),
      "dark".to_string(),
    ]));
    store.add_promoted_layer_ids(["radar-0900".to_string(), "ghost".to_string()]);

    // The radar folder stops being a time series.
    tree.find_mut("radar").unwrap().time_series = false;
    store.reconcile_with_tree(&tree);

    assert!(store.promoted_layer_ids().is_empty());
    assert!(store.layer_enabled("streets"));
    assert!(!store.layer_enabled("dark"));
  }

  #[test]
  fn reconcile_keeps_one_promoted_per_folder() {
    let tree = radio_tree();
    let mut store = StateStore::default();
    store.initialize_from_tree(&tree);
    store.add_promoted_layer_ids(["radar-0900".to_string()]);
    assert_eq!(store.promoted_layer_ids().len(), 2);

    store.reconcile_with_tree(&tree);
    assert_eq!(
      store.promoted_layer_ids(),
      &BTreeSet::from(["radar-0900".to_string()])
    );
  }

  #[test]
  fn reentrant_handlers_terminate() {
    let mut store = StateStore::default();
    let count = counting(&mut store, Field::EnabledLayerIds);
    store.subscribe(Field::EnabledLayerIds, |store, _| {
      store.set_layer_enabled("companion", true);
    });

    store.set_layer_enabled("a", true);
    assert!(store.layer_enabled("companion"));
    assert_eq!(*count.borrow(), 2);
  }

  #[test]
  fn handlers_run_in_registration_order() {
    let mut store = StateStore::default();
    let order = Rc::new(RefCell::new(Vec::new()));
    for i in 0..3 {
      let o = order.clone();
      store.subscribe(Field::Viewport, move |_, _| o.borrow_mut().push(i));
    }
    store.set_viewport(LatLonBox::new(1., 0., 1., 0.));
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
  }

  #[test]
  fn unsubscribe_from_handler() {
    let mut store = StateStore::default();
    let count = Rc::new(RefCell::new(0));
    let id = Rc::new(RefCell::new(None));
    let (c, i) = (count.clone(), id.clone());
    let sub = store.subscribe(Field::FilterQuery, move |store, _| {
      *c.borrow_mut() += 1;
      if let Some(id) = i.borrow_mut().take() {
        store.unsubscribe(id);
      }
    });
    *id.borrow_mut() = Some(sub);

    store.set_filter_query("a");
    store.set_filter_query("b");
    assert_eq!(*count.borrow(), 1);
  }

  #[test]
  fn opacity_overrides() {
    let mut store = StateStore::default();
    let count = counting(&mut store, Field::LayerOpacities);
    store.set_layer_opacity("a", Some(150));
    assert_eq!(store.layer_opacity("a"), Some(100));
    store.set_layer_opacity("a", Some(100));
    assert_eq!(*count.borrow(), 1);
    store.set_layer_opacity("a", None);
    store.set_layer_opacity("a", None);
    assert_eq!(*count.borrow(), 2);
  }
}
