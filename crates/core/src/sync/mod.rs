//! Async rendezvous primitives used to wait on one-shot session milestones.

mod completer;
mod registry;

pub use completer::Completer;
pub use registry::CompleterRegistry;
