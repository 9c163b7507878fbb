//! Build orchestration for resource packs.
//!
//! Turns a source tree and its section configuration into a pack archive.
//!
//! # Overview
//!
//! A build runs in these steps:
//! - **Resolution**: every plugin named by the section tree is located in the
//!   registry, the local cache or a remote repository
//! - **Staging**: sources are copied to a scratch directory unless building
//!   in place
//! - **Orchestration**: sections are processed depth-first, children before
//!   their parent, running the generate and transform phases of each binding
//! - **Assembly**: the surviving files are packed into a deterministic zip
//!
//! # Example
//!
//! ```ignore
//! use rpbuild::build::{BuildContext, BuildPipeline};
//! use rpbuild::config::load_config;
//!
//! let config = load_config(None)?;
//! let context = BuildContext::new(config, project_root);
//! let report = BuildPipeline::new(context).run()?;
//! println!("{}", report.summary());
//! ```

pub mod archive;
pub mod context;
pub mod discovery;
pub mod parallel;
pub mod pipeline;
pub mod result;
pub mod staging;

pub use archive::*;
pub use context::*;
pub use discovery::*;
pub use parallel::*;
pub use pipeline::*;
pub use result::*;
pub use staging::*;
