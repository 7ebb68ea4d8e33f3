//! Shroud - reversible obfuscation of PHP source trees
//!
//! Every executable unit in a tree is replaced by a one-line bootstrap that
//! decodes and evaluates the original at load time. The decoders live in a
//! generated revert unit that the dependency manifest loads before anything
//! else.
//!
//! ## Pipeline
//!
//! ```text
//! Strip wrapper → Pack (base64 + marker) → Escape call site → Bootstrap
//! ```
//!
//! - **Strip**: drop the open tag and a trailing close tag; mixed units pass through
//! - **Pack**: one of three invertible schemes, picked per run through an alias
//! - **Escape**: the decoder call is hex-escaped so no alias name is readable
//! - **Bootstrap**: `<?php eval("...");`
//!
//! ## Migration
//!
//! ```text
//! app/            → app_obfuscated/   (walk, revert unit, index)
//! app/            → app_backup/       (rename)
//! app_obfuscated/ → app/              (rename, reversed on failure)
//! composer.json     autoload.files gets the revert unit first
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use shroud::{MigrationCoordinator, ObfuscatorConfig};
//! use std::path::Path;
//!
//! let mut coordinator =
//!     MigrationCoordinator::new(Path::new("/srv/site/app"), ObfuscatorConfig::default()).unwrap();
//! let report = coordinator.run().unwrap();
//! println!("{} units obfuscated", report.walk.obfuscated.len());
//! ```

pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod index;
pub mod manifest;
pub mod migrate;
pub mod pipeline;
pub mod registry;
pub mod revert;
pub mod transform;
pub mod walker;

pub use config::{AliasTable, DecoderAlias, ObfuscatorConfig, Scheme};
pub use error::{ObfuscatorError, Result};
pub use migrate::{MigrationCoordinator, MigrationReport, MigrationState};
pub use registry::SchemeRegistry;
pub use revert::RevertUnitGenerator;
pub use transform::{CodeTransformer, UnitOutput};
pub use walker::{TreeWalker, WalkReport};
