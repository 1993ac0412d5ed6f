//! Foundation types for tether.
//!
//! Shared by every tether crate: the error taxonomy reported back to
//! sessions and the TOML configuration model.

pub mod config;
pub mod error;
