//! Scope-filtered broadcast delivery.

pub mod observer;
pub mod router;
pub mod scope;

pub use observer::{BroadcastContext, BroadcastObserver};
pub use router::{BroadcastReport, BroadcastRouter};
pub use scope::BroadcastScope;
