//! Shared domain types for SafeTrack: identities, locations, errors,
//! configuration, and structured trace events.

pub mod config;
pub mod error;
pub mod geo;
pub mod identity;
pub mod trace;
pub mod walk;
