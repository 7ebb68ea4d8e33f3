use crate::cli::load_config;
use crate::error::Result;
use crate::registry::SchemeRegistry;
use crate::revert::RevertUnitGenerator;
use crate::transform::{CodeTransformer, UnitOutput};
use std::fs;
use std::path::{Path, PathBuf};

/// Options for the file command
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    pub config: Option<PathBuf>,
    pub seed: Option<u64>,
    /// Also write the matching revert unit here
    pub revert_unit: Option<PathBuf>,
}

/// `name.php` -> `name.obfuscated.php`
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}.obfuscated.{}", stem, ext.to_string_lossy()),
        None => format!("{}.obfuscated", stem),
    };
    input.with_file_name(name)
}

/// Obfuscate a single source unit. Rejected units are written unchanged;
/// the returned output says which happened.
pub fn obfuscate_file(input: &Path, output: &Path, options: &FileOptions) -> Result<UnitOutput> {
    let config = load_config(options.config.as_deref(), options.seed)?;
    let source = String::from_utf8(fs::read(input)?)?;

    let registry = SchemeRegistry::from_seed(config.aliases.clone(), config.seed)?;
    let transformer = CodeTransformer::new(&registry).suppress_errors(config.suppress_decode_errors);
    let unit = transformer.obfuscate_unit(&source);
    fs::write(output, unit.text())?;

    if let Some(revert_path) = &options.revert_unit {
        let revert = RevertUnitGenerator::new(&registry, config.bootstrap_scheme)
            .suppress_errors(config.suppress_decode_errors)
            .generate();
        fs::write(revert_path, revert)?;
    }
    Ok(unit)
}
