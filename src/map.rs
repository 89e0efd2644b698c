/// Contains everything needed to handle coordinates.
pub mod coordinates;
/// The layer tree document and its index.
pub mod layer_tree;
/// Base map kinds.
pub mod map_type;
