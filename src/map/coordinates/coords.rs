use serde::{Deserialize, Serialize};

/// A position on the WGS84 ellipsoid in degrees.
#[derive(Debug, PartialEq, Copy, Clone, Default, Serialize, Deserialize)]
pub struct WGS84Coordinate {
  pub lat: f64,
  pub lon: f64,
}

impl WGS84Coordinate {
  #[must_use]
  pub fn new(lat: f64, lon: f64) -> Self {
    Self { lat, lon }
  }

  #[must_use]
  pub fn is_valid(&self) -> bool {
    (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
  }
}

/// The longitude span shown at a legacy zoom level, one 256px tile per `360 / 2^zoom` degrees.
#[must_use]
pub fn lon_span_for_zoom(zoom: u8) -> f64 {
  360. / 2f64.powi(i32::from(zoom.min(30)))
}
