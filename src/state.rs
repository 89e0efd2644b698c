/// A thread owning a store, driven by serializable commands.
pub mod actor;
/// Change notification of store fields.
mod notify;
/// The store itself.
mod store;

pub use notify::{ChangeNotifier, Field, Handler, SubscriptionId};
pub use store::{DEFAULT_LOCALE, StateError, StateStore, ViewState, opacity_percent};
