//! rpbuild - Plugin-driven resource pack builder
//!
//! This library provides:
//! - A tree of build sections with inherited exclude patterns
//! - A plugin contract with four phases and a registry of loaded plugins
//! - Plugin resolution through bundled, cached and remote repositories
//! - A concurrent transform engine and the build orchestrator
//! - A deterministic zip sink for the assembled pack

pub mod build;
pub mod cli;
pub mod config;
pub mod logging;
pub mod plugin;
pub mod repository;
pub mod section;
