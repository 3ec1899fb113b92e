//! Presence and trust-scoped broadcast engine.
//!
//! The gateway owns sockets; this crate owns everything behind them:
//! who is connected, who may see whom, and the lifecycle of walks.

pub mod collaborators;
pub mod dispatch;
pub mod engine;
pub mod identity;
pub mod lock;
pub mod persistence;
pub mod proximity;
pub mod registry;
pub mod trust;
pub mod walk;
pub mod walks;

pub use engine::{Collaborators, PresenceEngine};
