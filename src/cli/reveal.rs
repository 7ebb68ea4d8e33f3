use crate::cli::load_config;
use crate::error::Result;
use crate::registry::SchemeRegistry;
use crate::transform::CodeTransformer;
use std::fs;
use std::path::{Path, PathBuf};

/// Options for the reveal command
#[derive(Debug, Clone, Default)]
pub struct RevealOptions {
    /// Alias table the unit was produced with
    pub config: Option<PathBuf>,
}

/// Decode one obfuscated unit back to plain source with an open tag.
/// Writes to `output` when given, and returns the text either way.
pub fn reveal_file(input: &Path, output: Option<&Path>, options: &RevealOptions) -> Result<String> {
    let config = load_config(options.config.as_deref(), None)?;
    let registry = SchemeRegistry::from_seed(config.aliases, config.seed)?;
    let transformer = CodeTransformer::new(&registry);

    let obfuscated = fs::read_to_string(input)?;
    let plain = format!("<?php\n{}\n", transformer.reveal(&obfuscated)?);

    if let Some(output) = output {
        fs::write(output, &plain)?;
    }
    Ok(plain)
}
