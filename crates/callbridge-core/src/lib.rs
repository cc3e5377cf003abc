//! Core types, config, errors, and stream protocol for Callbridge.

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;
