//! Shared service plumbing for Warden services: tracing setup, request ids,
//! health probes and serde helpers.

pub mod health;
pub mod middleware;
pub mod serde;
pub mod tracing;
