//! Boundary types for the roomlink signaling protocol.
//!
//! This crate contains the serde-serializable types exchanged with the
//! signaling collaborator: connect responses, session descriptions, ICE
//! candidates, and the sync-state payload sent on reconnect. These types
//! represent the "protocol layer" - the shapes of data as they cross the
//! session engine's boundary.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * Boundary-shaped: they mirror what the signaling server sends and
//!   expects, not the engine's internal state
//! * Stable: Changes only when the boundary shape changes
//!
//! The engine itself lives in the `roomlink` crate and consumes these types
//! through its `SignalClient` and `Transport` traits.

pub mod connect;
pub mod sync_state;
pub mod types;

pub use connect::*;
pub use sync_state::*;
pub use types::*;
