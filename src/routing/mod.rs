//! Routing module
//!
//! The instrument -> analyser -> output graph and the manager that switches
//! instruments inside it.

pub mod context;
pub mod manager;

pub use context::{ConnectFailure, ContextState, PlaybackContext, RouteTarget};
pub use manager::{
    AudioRoutingManager, RoutingState, SwitchConfig, SwitchError, SwitchFailure, SwitchOutcome,
};
