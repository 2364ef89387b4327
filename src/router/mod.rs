//! Event Router
//!
//! Watch notifications flow through an [`Informer`] into handlers that turn
//! them into reconcile keys on a deduplicating [`WorkQueue`], either the key
//! of the notified object or the key of its controller.

mod informer;
mod queue;
mod watch;

pub use informer::{Informer, Lister, ResourceEventHandler};
pub use queue::WorkQueue;
pub use watch::{
    watch_for_controller, watch_for_object, EnqueueController, EnqueueObject, GetControllerFn,
};
