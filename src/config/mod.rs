//! Configuration module for rpbuild
//!
//! Provides types and parsing for `rpbuild.toml` project configuration.

pub mod loader;
pub mod schema;

pub use loader::*;
pub use schema::*;
