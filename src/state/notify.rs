use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::StateStore;

static ALL_FIELDS: [Field; 8] = [
  Field::EnabledLayerIds,
  Field::PromotedLayerIds,
  Field::LayerOpacities,
  Field::Viewport,
  Field::MapType,
  Field::BaseMapStyle,
  Field::FilterQuery,
  Field::Locale,
];

/// The observable fields of a [`StateStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
  EnabledLayerIds,
  PromotedLayerIds,
  LayerOpacities,
  Viewport,
  MapType,
  BaseMapStyle,
  FilterQuery,
  Locale,
}

impl Field {
  #[must_use]
  pub fn name(&self) -> &'static str {
    match self {
      Field::EnabledLayerIds => "enabled_layer_ids",
      Field::PromotedLayerIds => "promoted_layer_ids",
      Field::LayerOpacities => "layer_opacities",
      Field::Viewport => "viewport",
      Field::MapType => "map_type",
      Field::BaseMapStyle => "base_map_style",
      Field::FilterQuery => "filter_query",
      Field::Locale => "locale",
    }
  }

  /// The name of the event fired when the field changes, e.g. `enabled_layer_ids_changed`.
  #[must_use]
  pub fn event_name(&self) -> String {
    format!("{}_changed", self.name())
  }

  #[must_use]
  pub fn all() -> &'static [Field] {
    &ALL_FIELDS
  }
}

/// Handle returned by [`StateStore::subscribe`], used to unsubscribe again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Called with the store after `field` changed. Handlers may mutate the store again.
pub type Handler = Box<dyn FnMut(&mut StateStore, Field)>;

pub(crate) struct Subscription {
  id: SubscriptionId,
  /// `None` listens to every field.
  field: Option<Field>,
  handler: Handler,
}

/// Registry of change handlers and the queue of undelivered notifications.
///
/// Delivery is driven by the store: while a notification is dispatched the handlers are
/// taken out of the registry, so notifications raised by a handler are queued and delivered
/// after the current one, still within the outermost mutating call.
#[derive(Default)]
pub struct ChangeNotifier {
  subscriptions: Vec<Subscription>,
  live: HashSet<SubscriptionId>,
  next_id: u64,
  pending: VecDeque<Field>,
  dispatching: bool,
}

impl std::fmt::Debug for ChangeNotifier {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ChangeNotifier")
      .field("subscriptions", &self.live.len())
      .field("pending", &self.pending)
      .field("dispatching", &self.dispatching)
      .finish()
  }
}

impl ChangeNotifier {
  pub(crate) fn subscribe(&mut self, field: Option<Field>, handler: Handler) -> SubscriptionId {
    let id = SubscriptionId(self.next_id);
    self.next_id += 1;
    self.live.insert(id);
    self.subscriptions.push(Subscription { id, field, handler });
    id
  }

  pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
    let removed = self.live.remove(&id);
    if !self.dispatching {
      self.subscriptions.retain(|s| s.id != id);
    }
    removed
  }

  #[must_use]
  pub fn subscription_count(&self) -> usize {
    self.live.len()
  }

  /// Queues `field`. Returns whether the caller has to start delivering.
  pub(crate) fn enqueue(&mut self, field: Field) -> bool {
    self.pending.push_back(field);
    if self.dispatching {
      return false;
    }
    self.dispatching = true;
    true
  }

  pub(crate) fn next_pending(&mut self) -> Option<Field> {
    let next = self.pending.pop_front();
    if next.is_none() {
      self.dispatching = false;
      self.subscriptions.retain(|s| self.live.contains(&s.id));
    }
    next
  }

  pub(crate) fn take_handlers(&mut self) -> Vec<Subscription> {
    std::mem::take(&mut self.subscriptions)
  }

  /// Puts the handlers back in front of the ones subscribed while they were out.
  pub(crate) fn restore_handlers(&mut self, mut handlers: Vec<Subscription>) {
    handlers.append(&mut self.subscriptions);
    self.subscriptions = handlers;
  }

  pub(crate) fn is_live(&self, id: SubscriptionId) -> bool {
    self.live.contains(&id)
  }
}

impl Subscription {
  pub(crate) fn id(&self) -> SubscriptionId {
    self.id
  }

  pub(crate) fn matches(&self, field: Field) -> bool {
    self.field.is_none_or(|f| f == field)
  }

  pub(crate) fn call(&mut self, store: &mut StateStore, field: Field) {
    (self.handler)(store, field);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn event_names() {
    assert_eq!(
      Field::EnabledLayerIds.event_name(),
      "enabled_layer_ids_changed"
    );
    assert_eq!(
      Field::PromotedLayerIds.event_name(),
      "promoted_layer_ids_changed"
    );
    assert_eq!(Field::LayerOpacities.event_name(), "layer_opacities_changed");
    assert_eq!(Field::all().len(), 8);
  }

  #[test]
  fn unsubscribe_outside_dispatch() {
    let mut notifier = ChangeNotifier::default();
    let a = notifier.subscribe(None, Box::new(|_, _| {}));
    let b = notifier.subscribe(Some(Field::Viewport), Box::new(|_, _| {}));
    assert_eq!(notifier.subscription_count(), 2);
    assert!(notifier.unsubscribe(a));
    assert!(!notifier.unsubscribe(a));
    assert_eq!(notifier.subscription_count(), 1);
    assert!(notifier.is_live(b));
  }
}
