//! Convoy Core
//!
//! Core types shared by the Convoy orchestrator, client and CLI.
//!
//! This crate contains:
//! - Domain types: pipelines, tasks, lifecycle state and sessions
//! - DTOs: request/response bodies for the agent callback and control APIs

pub mod domain;
pub mod dto;
