//! Publish/subscribe event bus decoupling the pipeline stage components

pub mod bus;
pub mod event;

pub use bus::{handler_fn, BusStats, EventBus, EventHandler, KindStats, SubscriptionId};
pub use event::{Event, EventKind};
