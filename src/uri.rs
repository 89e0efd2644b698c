//! Shareable URLs for a [`StateStore`].
//!
//! The query string carries the locale (`hl`), the viewport (`llbox`), the base map (`t`),
//! the enabled layers with their opacity overrides (`layers`), the promoted time-series
//! sublayers (`promoted`) and the filter query (`q`).

mod query;

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub use query::{SplitUrl, decode_component, encode_component};

use crate::map::coordinates::{LatLonBox, WGS84Coordinate, lon_span_for_zoom};
use crate::map::map_type::MapType;
use crate::state::StateStore;

/// Parameters of older URL formats that `llbox` and the layer list replace.
pub const LEGACY_PARAMS: [&str; 4] = ["crisis", "lat", "lng", "z"];

/// Which optional parts of the schema are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriOptions {
  /// Write the `promoted` parameter.
  #[serde(default = "enabled")]
  pub emit_promoted: bool,
  /// Write the `q` parameter.
  #[serde(default = "enabled")]
  pub emit_query: bool,
  /// Significant digits of the `llbox` edges relative to the viewport span.
  #[serde(default = "default_digits")]
  pub significant_digits: u32,
}

fn enabled() -> bool {
  true
}

fn default_digits() -> u32 {
  4
}

impl Default for UriOptions {
  fn default() -> Self {
    Self {
      emit_promoted: true,
      emit_query: true,
      significant_digits: default_digits(),
    }
  }
}

/// Writes the state of `store` into `current_uri`.
///
/// Unrelated parameters, the path and the fragment are kept. If `current_uri` has a `base`
/// parameter, the URL it names is used instead.
#[must_use]
pub fn encode(store: &StateStore, current_uri: &str, options: &UriOptions) -> String {
  let mut url = SplitUrl::parse(current_uri);
  if let Some(base) = url.get("base").filter(|b| !b.is_empty()) {
    debug!("Encoding into base url {base}");
    url = SplitUrl::parse(&base);
  }

  for legacy in LEGACY_PARAMS {
    url.remove(legacy);
  }

  url.set("hl", store.locale());
  url.set_raw(
    "llbox",
    store
      .viewport()
      .round(options.significant_digits)
      .to_string(),
  );
  url.set_raw("t", store.map_type().name().to_owned());

  if store.enabled_layer_ids().is_empty() {
    url.remove("layers");
  } else {
    url.set_raw(
      "layers",
      list_value(layer_tokens(store.enabled_layer_ids(), store.layer_opacities())),
    );
  }

  if options.emit_promoted && !store.promoted_layer_ids().is_empty() {
    url.set_raw(
      "promoted",
      list_value(
        store
          .promoted_layer_ids()
          .iter()
          .map(|id| encode_component(id))
          .join(","),
      ),
    );
  } else {
    url.remove("promoted");
  }

  if options.emit_query && !store.filter_query().is_empty() {
    url.set("q", store.filter_query());
  } else {
    url.remove("q");
  }

  url.to_string()
}

/// Lists carry their separators literally. A value without one is read as re-serialized
/// and decoded once before splitting, so a lone id that contains a separator gets a
/// trailing `,`.
fn list_value(joined: String) -> String {
  if !has_separator(&joined) && has_separator(&decode_component(&joined)) {
    return joined + ",";
  }
  joined
}

fn has_separator(value: &str) -> bool {
  value.contains([',', ':'])
}

/// The list form of a `layers` or `promoted` value. Links that went through a form
/// serializer have their separators escaped as `%2C` and `%3A` and are decoded once.
fn split_list(raw: &str) -> Cow<'_, str> {
  if has_separator(raw) {
    Cow::Borrowed(raw)
  } else {
    Cow::Owned(decode_component(raw))
  }
}

fn layer_tokens(enabled: &BTreeSet<String>, opacities: &BTreeMap<String, u8>) -> String {
  enabled
    .iter()
    .map(|id| match opacities.get(id) {
      Some(opacity) => format!("{}:{opacity}", encode_component(id)),
      None => encode_component(id),
    })
    .join(",")
}

/// Applies the state found in `uri` to `store`.
///
/// Parameters that are missing leave their fields untouched. Malformed values fall back to
/// defaults (`t`) or are ignored (`llbox`, opacities) instead of failing. Promoted ids are
/// not checked against the tree; call [`StateStore::reconcile_with_tree`] afterwards.
pub fn decode(uri: &str, store: &mut StateStore) {
  let url = SplitUrl::parse(uri);

  if let Some(locale) = url.get("hl").filter(|l| !l.is_empty()) {
    store.set_locale(locale);
  }

  if let Some(raw) = url.get("llbox") {
    match parse_llbox(&raw) {
      Some(viewport) => store.set_viewport(viewport),
      None => warn!("Ignoring malformed llbox {raw:?}"),
    }
  } else if let Some(viewport) = legacy_viewport(&url, store.viewport()) {
    debug!("Using legacy lat/lng viewport {viewport}");
    store.set_viewport(viewport);
  }

  if let Some(token) = url.get("t") {
    store.set_map_type(MapType::from_token(&token));
  }

  if let Some((enabled, opacities)) = url
    .raw("layers")
    .and_then(|raw| parse_layers(&split_list(raw)))
  {
    store.set_enabled_layer_ids(enabled);
    store.set_layer_opacities(opacities);
  }

  if let Some(raw) = url.raw("promoted") {
    store.add_promoted_layer_ids(
      split_list(raw)
        .split(',')
        .filter(|t| !t.is_empty())
        .map(decode_component),
    );
  }

  if let Some(query) = url.get("q") {
    store.set_filter_query(query);
  }
}

/// Parses `north,south,east,west` with an optional fifth `0` marking a zero-width box.
#[must_use]
pub fn parse_llbox(value: &str) -> Option<LatLonBox> {
  let parts: Vec<&str> = value.split(',').map(str::trim).collect();
  let zero_width = match parts.len() {
    4 => false,
    5 if parts[4] == "0" => true,
    _ => return None,
  };
  let edges: Vec<f64> = parts[..4]
    .iter()
    .map(|p| p.parse::<f64>().ok().filter(|v| v.is_finite()))
    .collect::<Option<_>>()?;
  Some(LatLonBox::from_edges(
    edges[0], edges[1], edges[2], edges[3], zero_width,
  ))
}

/// A viewport from the `lat`/`lng`/`z` parameters of old links. Without `z` the spans of
/// `current` are kept.
fn legacy_viewport(url: &SplitUrl, current: LatLonBox) -> Option<LatLonBox> {
  let lat = url.get("lat")?.trim().parse::<f64>().ok()?;
  let lng = url.get("lng")?.trim().parse::<f64>().ok()?;
  let center = WGS84Coordinate::new(lat, lng);
  if !center.is_valid() {
    return None;
  }
  let (lat_span, lon_span) = match url.get("z").and_then(|z| z.trim().parse::<u8>().ok()) {
    Some(zoom) => {
      let lon_span = lon_span_for_zoom(zoom);
      (lon_span / 2., lon_span)
    }
    None => (current.lat_span(), current.lon_span()),
  };
  Some(LatLonBox::centered_on(center, lat_span, lon_span))
}

/// Parses `id` and `id:opacity` tokens. `None` if there are no tokens.
fn parse_layers(raw: &str) -> Option<(BTreeSet<String>, BTreeMap<String, u8>)> {
  let mut enabled = BTreeSet::new();
  let mut opacities = BTreeMap::new();
  for token in raw.split(',').filter(|t| !t.is_empty()) {
    let (id, opacity) = match token.split_once(':') {
      Some((id, opacity)) => (decode_component(id), Some(opacity)),
      None => (decode_component(token), None),
    };
    if id.is_empty() {
      continue;
    }
    if let Some(opacity) = opacity {
      match parse_opacity(opacity) {
        Some(o) => {
          opacities.insert(id.clone(), o);
        }
        None => warn!("Ignoring opacity {opacity:?} of layer {id}"),
      }
    }
    enabled.insert(id);
  }
  (!enabled.is_empty()).then_some((enabled, opacities))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_opacity(value: &str) -> Option<u8> {
  let value = value.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
  Some(value.round().clamp(0., 100.) as u8)
}
