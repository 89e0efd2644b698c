pub mod config;
pub mod map;
pub mod remote;
pub mod state;
pub mod uri;

pub use state::{Field, StateStore};
