//! Core domain types
//!
//! The structures the orchestrator owns and persists, and that the client
//! and CLI read back over the control API.

pub mod lifecycle;
pub mod pipeline;
