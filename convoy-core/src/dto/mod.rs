//! Data Transfer Objects
//!
//! Request and response bodies for the HTTP surface. Field names are
//! camelCase on the wire because agent scripts post them with curl.

pub mod agent;
pub mod lifecycle;
pub mod pipeline;
