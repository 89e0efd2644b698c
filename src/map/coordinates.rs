mod boxes;
mod coords;

/// Bounding boxes on the sphere.
pub use boxes::*;
/// Coordinates.
pub use coords::*;
