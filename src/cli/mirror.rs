use crate::cli::load_config;
use crate::config::ObfuscatorConfig;
use crate::error::{ObfuscatorError, Result};
use crate::index::{IndexBase, UnitIndex};
use crate::registry::SchemeRegistry;
use crate::revert::RevertUnitGenerator;
use crate::transform::CodeTransformer;
use crate::walker::{TreeWalker, WalkReport};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Options for the mirror command
#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    pub config: Option<PathBuf>,
    pub seed: Option<u64>,
}

/// Write an obfuscated copy of `source` to `dest` without touching `source`.
/// `dest` gets its own revert unit and a `__DIR__`-relative index.
pub fn mirror_tree(source: &Path, dest: &Path, options: &MirrorOptions) -> Result<WalkReport> {
    let config = load_config(options.config.as_deref(), options.seed)?;
    if !source.is_dir() {
        return Err(ObfuscatorError::PlainTreeMissing(source.to_path_buf()));
    }
    if fs::symlink_metadata(dest).is_ok() {
        return Err(ObfuscatorError::ObfuscatedOutputExists(dest.to_path_buf()));
    }
    for name in [&config.revert_unit_name, &config.autoload_index_name] {
        if fs::symlink_metadata(source.join(name)).is_ok() {
            return Err(ObfuscatorError::ReservedName(source.join(name)));
        }
    }

    let registry = SchemeRegistry::from_seed(config.aliases.clone(), config.seed)?;
    let transformer = CodeTransformer::new(&registry).suppress_errors(config.suppress_decode_errors);
    let result = TreeWalker::new(&transformer)
        .extensions(&config.extensions)
        .mirror(source, dest, &config.exclude_dirs, &config.exclude_files)
        .and_then(|report| {
            report.check()?;
            finish_mirror(&registry, &config, dest, &report)?;
            Ok(report)
        });

    // `dest` did not exist before this call; never leave a partial copy behind
    if result.is_err() {
        match fs::remove_dir_all(dest) {
            Ok(()) => warn!("Removed incomplete mirror {}", dest.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove incomplete mirror {}: {}", dest.display(), e),
        }
    }
    result
}

fn finish_mirror(
    registry: &SchemeRegistry,
    config: &ObfuscatorConfig,
    dest: &Path,
    report: &WalkReport,
) -> Result<()> {
    let revert = RevertUnitGenerator::new(registry, config.bootstrap_scheme)
        .suppress_errors(config.suppress_decode_errors)
        .generate();
    fs::write(dest.join(&config.revert_unit_name), revert)?;

    let index = UnitIndex::new(
        &config.revert_unit_name,
        &config.autoload_index_name,
        report.obfuscated.iter().cloned(),
    );
    index.write(&dest.join(&config.autoload_index_name), IndexBase::Relative)
}
