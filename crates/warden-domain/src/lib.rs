//! Domain types shared across all Warden services.
//!
//! This crate contains only pure types with no framework dependencies.

pub mod id;
