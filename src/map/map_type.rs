use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

static ALL_MAP_TYPES: [MapType; 6] = [
  MapType::Roadmap,
  MapType::Satellite,
  MapType::Hybrid,
  MapType::Terrain,
  MapType::Custom,
  MapType::Osm,
];

/// The base map drawn below all layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MapType {
  #[default]
  Roadmap,
  Satellite,
  Hybrid,
  Terrain,
  /// A styled map. The style itself is identified separately.
  Custom,
  Osm,
}

impl MapType {
  /// The token used in URLs and documents.
  #[must_use]
  pub fn name(&self) -> &'static str {
    match self {
      MapType::Roadmap => "ROADMAP",
      MapType::Satellite => "SATELLITE",
      MapType::Hybrid => "HYBRID",
      MapType::Terrain => "TERRAIN",
      MapType::Custom => "CUSTOM",
      MapType::Osm => "OSM",
    }
  }

  #[must_use]
  pub fn all() -> &'static [MapType] {
    &ALL_MAP_TYPES
  }

  /// Parses a token case-insensitively, falling back to the road map for anything unknown.
  #[must_use]
  pub fn from_token(token: &str) -> Self {
    token.parse().unwrap_or_else(|()| {
      log::debug!("Unknown map type {token:?}, using {}.", MapType::Roadmap);
      MapType::Roadmap
    })
  }
}

impl Display for MapType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.name())
  }
}

impl FromStr for MapType {
  type Err = ();
  fn from_str(input: &str) -> Result<MapType, Self::Err> {
    let trimmed = input.trim();
    MapType::all()
      .iter()
      .find(|t| t.name().eq_ignore_ascii_case(trimmed))
      .copied()
      .ok_or(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  #[rstest]
  #[case("SATELLITE", MapType::Satellite)]
  #[case("satellite", MapType::Satellite)]
  #[case("Hybrid", MapType::Hybrid)]
  #[case("osm", MapType::Osm)]
  #[case("wxyz", MapType::Roadmap)]
  #[case("", MapType::Roadmap)]
  fn tokens(#[case] token: &str, #[case] expected: MapType) {
    assert_eq!(MapType::from_token(token), expected);
  }

  #[test]
  fn names_round_trip() {
    for t in MapType::all() {
      assert_eq!(t.name().parse::<MapType>(), Ok(*t));
    }
  }

  #[test]
  fn serde_uses_tokens() {
    assert_eq!(
      serde_json::to_string(&MapType::Terrain).unwrap(),
      r#""TERRAIN""#
    );
  }
}
