pub mod file;
pub mod migrate;
pub mod mirror;
pub mod reveal;

pub use file::*;
pub use migrate::*;
pub use mirror::*;
pub use reveal::*;

use crate::config::ObfuscatorConfig;
use crate::error::Result;
use std::path::Path;

/// Config file (or defaults) with a command-line seed on top
pub(crate) fn load_config(path: Option<&Path>, seed: Option<u64>) -> Result<ObfuscatorConfig> {
    let mut config = match path {
        Some(path) => ObfuscatorConfig::from_file(path)?,
        None => ObfuscatorConfig::default(),
    };
    if seed.is_some() {
        config.seed = seed;
    }
    config.validate()?;
    Ok(config)
}
