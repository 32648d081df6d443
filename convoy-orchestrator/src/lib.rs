//! Convoy Orchestrator
//!
//! Turns a repository goal into tasks, runs one coding agent per task
//! (local process or remote machine), tracks agent callbacks until the
//! pipeline finishes, and keeps the host alive exactly as long as work or
//! sessions exist.

pub mod api;
pub mod config;
pub mod repository;
pub mod service;
pub mod spawn;

#[cfg(test)]
pub(crate) mod testing;
