use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::WGS84Coordinate;

/// Latitude limit of the map projection.
pub const MAX_LAT: f64 = 85.;

/// A rectangle on the sphere given by its four edges in degrees.
///
/// Boxes are normalized on construction so that two boxes covering the same area compare
/// equal:
/// * latitudes are clamped to `[-90, 90]` and ordered so that `north >= south`,
/// * longitudes are wrapped into `[-180, 180)`,
/// * a box whose east and west edges coincide spans the full 360 degrees unless it is
///   explicitly built as a zero-width box. Every full-width box is stored as `-180..180`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawLatLonBox", into = "RawLatLonBox")]
pub struct LatLonBox {
  north: f64,
  south: f64,
  east: f64,
  west: f64,
}

/// The sentinel box covering the entire map.
pub const ENTIRE_MAP: LatLonBox = LatLonBox {
  north: MAX_LAT,
  south: -MAX_LAT,
  east: 180.,
  west: -180.,
};

impl Default for LatLonBox {
  fn default() -> Self {
    ENTIRE_MAP
  }
}

/// Wraps a longitude into `[-180, 180)`. In-range values are returned untouched so that no
/// precision is lost on the common path.
fn wrap_lon(lon: f64) -> f64 {
  if (-180.0..180.0).contains(&lon) {
    lon + 0.
  } else {
    (lon + 180.).rem_euclid(360.) - 180.
  }
}

#[allow(clippy::cast_possible_truncation)]
fn round_to(value: f64, decimals: i64) -> f64 {
  let exponent = decimals.unsigned_abs().min(300) as i32;
  let factor = 10f64.powi(exponent);
  // Adding 0 turns a rounded -0 into 0.
  if decimals >= 0 {
    (value * factor).round() / factor + 0.
  } else {
    (value / factor).round() * factor + 0.
  }
}

impl LatLonBox {
  /// Builds a box from its edges. Equal east and west edges describe a full-width box.
  #[must_use]
  pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
    Self::from_edges(north, south, east, west, false)
  }

  /// Builds a box from its edges. With `zero_width` set, equal east and west edges describe a
  /// box of no width instead of a full-width one.
  #[must_use]
  pub fn from_edges(north: f64, south: f64, east: f64, west: f64, zero_width: bool) -> Self {
    let north = north.clamp(-90., 90.);
    let south = south.clamp(-90., 90.);
    let (north, south) = if north >= south {
      (north, south)
    } else {
      (south, north)
    };

    let east = wrap_lon(east);
    let west = wrap_lon(west);
    let (east, west) = if east == west && !zero_width {
      (180., -180.)
    } else {
      (east, west)
    };

    Self {
      north: north + 0.,
      south: south + 0.,
      east,
      west,
    }
  }

  /// A box of the given spans around `center`.
  #[must_use]
  pub fn centered_on(center: WGS84Coordinate, lat_span: f64, lon_span: f64) -> Self {
    if lon_span >= 360. {
      return Self::new(
        center.lat + lat_span / 2.,
        center.lat - lat_span / 2.,
        180.,
        -180.,
      );
    }
    let half = lon_span.max(0.) / 2.;
    Self::from_edges(
      center.lat + lat_span / 2.,
      center.lat - lat_span / 2.,
      center.lon + half,
      center.lon - half,
      lon_span <= 0.,
    )
  }

  #[must_use]
  pub fn north(&self) -> f64 {
    self.north
  }

  #[must_use]
  pub fn south(&self) -> f64 {
    self.south
  }

  /// The east edge. `180` for full-width boxes.
  #[must_use]
  pub fn east(&self) -> f64 {
    self.east
  }

  #[must_use]
  pub fn west(&self) -> f64 {
    self.west
  }

  #[must_use]
  pub fn is_full_width(&self) -> bool {
    self.east - self.west >= 360.
  }

  #[must_use]
  pub fn is_zero_width(&self) -> bool {
    self.east == self.west
  }

  #[must_use]
  pub fn lat_span(&self) -> f64 {
    self.north - self.south
  }

  /// The width in degrees, crossing the antimeridian if east is west of west.
  #[must_use]
  pub fn lon_span(&self) -> f64 {
    if self.is_full_width() {
      360.
    } else {
      (self.east - self.west).rem_euclid(360.)
    }
  }

  #[must_use]
  pub fn center(&self) -> WGS84Coordinate {
    WGS84Coordinate {
      lat: f64::midpoint(self.north, self.south),
      lon: wrap_lon(self.west + self.lon_span() / 2.),
    }
  }

  /// Rounds all four edges to `significant_digits` digits relative to the smaller of the two
  /// spans. Never rounds coarser than to multiples of ten since 100 does not divide 360.
  #[must_use]
  #[allow(clippy::cast_possible_truncation)]
  pub fn round(&self, significant_digits: u32) -> Self {
    let span = [self.lat_span(), self.lon_span()]
      .into_iter()
      .filter(|s| *s > 0.)
      .reduce(f64::min);
    let Some(span) = span else {
      return *self;
    };

    let magnitude = span.log10().floor() as i64;
    let decimals = (i64::from(significant_digits) - 1 - magnitude).max(-1);
    Self::from_edges(
      round_to(self.north, decimals),
      round_to(self.south, decimals),
      round_to(self.east, decimals),
      round_to(self.west, decimals),
      self.is_zero_width(),
    )
  }
}

/// Prints `north,south,east,west`, followed by `,0` for zero-width boxes.
impl Display for LatLonBox {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{},{},{},{}", self.north, self.south, self.east, self.west)?;
    if self.is_zero_width() {
      write!(f, ",0")?;
    }
    Ok(())
  }
}

#[derive(Serialize, Deserialize)]
struct RawLatLonBox {
  north: f64,
  south: f64,
  east: f64,
  west: f64,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  zero_width: bool,
}

impl From<RawLatLonBox> for LatLonBox {
  fn from(raw: RawLatLonBox) -> Self {
    Self::from_edges(raw.north, raw.south, raw.east, raw.west, raw.zero_width)
  }
}

impl From<LatLonBox> for RawLatLonBox {
  fn from(b: LatLonBox) -> Self {
    Self {
      north: b.north,
      south: b.south,
      east: b.east,
      west: b.west,
      zero_width: b.is_zero_width(),
    }
  }
}
