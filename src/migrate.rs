//! Migration coordinator: walk, generate, stage, promote, patch.
//!
//! ```text
//! IDLE -> WALKING -> GENERATING_REVERT -> STAGED -> PROMOTING -> MANIFEST_PATCHING -> DONE
//!                                                       ^
//!                                     first destructive step (renames)
//! ```
//!
//! `FAILED` is reachable from every state. Before `PROMOTING` a failure
//! leaves the plain tree untouched and removes the staging tree this run
//! created. A failed second rename is reversed; if the reversal fails too
//! the error is irrecoverable and nothing else is attempted.

use crate::config::{ObfuscatorConfig, SymlinkPolicy};
use crate::digest::tree_digest;
use crate::error::{ObfuscatorError, Result};
use crate::index::{slash_path, IndexBase, UnitIndex};
use crate::manifest::{Manifest, ManifestChange};
use crate::registry::SchemeRegistry;
use crate::revert::RevertUnitGenerator;
use crate::transform::CodeTransformer;
use crate::walker::{anchor_path, EntryError, TreeWalker, WalkReport};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const MANIFEST_NAME: &str = "composer.json";

/// Migration state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationState {
    /// Nothing checked, nothing written
    Idle,
    /// Mirroring the plain tree into the staging tree
    Walking,
    /// Writing the revert unit into the staging tree
    GeneratingRevert,
    /// Unit index written; staging tree complete
    Staged,
    /// Renaming plain -> backup -> staging -> plain
    Promoting,
    /// Index rebased, manifest being patched
    ManifestPatching,
    Done,
    Failed,
}

/// The three directory roles plus the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePaths {
    pub plain: PathBuf,
    pub obfuscated: PathBuf,
    pub backup: PathBuf,
    pub manifest: PathBuf,
}

impl TreePaths {
    /// `<plain>_obfuscated`, `<plain>_backup` and `composer.json` beside the plain tree
    pub fn for_plain(plain: &Path) -> Result<Self> {
        let name = plain.file_name().ok_or_else(|| {
            ObfuscatorError::InvalidConfig(format!(
                "plain tree {} has no directory name",
                plain.display()
            ))
        })?;
        let sibling = |suffix: &str| {
            let mut sibling: OsString = name.to_os_string();
            sibling.push(suffix);
            plain.with_file_name(sibling)
        };
        let manifest = plain
            .parent()
            .map(|p| p.join(MANIFEST_NAME))
            .unwrap_or_else(|| PathBuf::from(MANIFEST_NAME));

        Ok(Self {
            plain: plain.to_path_buf(),
            obfuscated: sibling("_obfuscated"),
            backup: sibling("_backup"),
            manifest,
        })
    }

    /// Manifest entry for a file inside the plain tree
    pub fn manifest_entry(&self, file_name: &str) -> String {
        let file = self.plain.join(file_name);
        let base = self.manifest.parent().unwrap_or(Path::new(""));
        match file.strip_prefix(base) {
            Ok(relative) => slash_path(relative),
            Err(_) => slash_path(&file),
        }
    }
}

/// Directory rename used for promotion.
/// Implementations must be all-or-nothing; no copy fallback.
pub trait Renamer {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// `std::fs::rename`: a single metadata update. Cross-volume moves fail
/// with `EXDEV` and are reported as failed renames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRenamer;

impl Renamer for FsRenamer {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

/// Summary of a completed migration
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub paths: TreePaths,
    pub walk: WalkReport,
    /// Load order, relative to the plain tree
    pub index: Vec<PathBuf>,
    pub manifest_entry: String,
    pub manifest_change: ManifestChange,
    pub links_recreated: usize,
    /// Digest of the plain tree before promotion (now the backup)
    pub backup_digest: Option<String>,
}

pub struct MigrationCoordinator<R: Renamer = FsRenamer> {
    config: ObfuscatorConfig,
    paths: TreePaths,
    registry: SchemeRegistry,
    renamer: R,
    state: MigrationState,
    walk: Option<WalkReport>,
    index: Option<UnitIndex>,
    links_recreated: usize,
    plain_digest: Option<String>,
    manifest_change: Option<ManifestChange>,
    created_staging: bool,
}

impl MigrationCoordinator<FsRenamer> {
    /// Relative `plain` and manifest paths are anchored at the working
    /// directory, so the manifest entry is always computed between absolute paths.
    pub fn new(plain: &Path, config: ObfuscatorConfig) -> Result<Self> {
        config.validate()?;
        let cwd = std::env::current_dir()?;
        let mut paths = TreePaths::for_plain(&anchor_path(plain, &cwd))?;
        if let Some(manifest) = &config.manifest {
            paths.manifest = anchor_path(manifest, &cwd);
        }
        let registry = SchemeRegistry::from_seed(config.aliases.clone(), config.seed)?;

        Ok(Self {
            config,
            paths,
            registry,
            renamer: FsRenamer,
            state: MigrationState::Idle,
            walk: None,
            index: None,
            links_recreated: 0,
            plain_digest: None,
            manifest_change: None,
            created_staging: false,
        })
    }
}

impl<R: Renamer> MigrationCoordinator<R> {
    /// Swap the promotion renamer
    pub fn with_renamer<R2: Renamer>(self, renamer: R2) -> MigrationCoordinator<R2> {
        MigrationCoordinator {
            config: self.config,
            paths: self.paths,
            registry: self.registry,
            renamer,
            state: self.state,
            walk: self.walk,
            index: self.index,
            links_recreated: self.links_recreated,
            plain_digest: self.plain_digest,
            manifest_change: self.manifest_change,
            created_staging: self.created_staging,
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    pub fn paths(&self) -> &TreePaths {
        &self.paths
    }

    pub fn registry(&self) -> &SchemeRegistry {
        &self.registry
    }

    pub fn walk_report(&self) -> Option<&WalkReport> {
        self.walk.as_ref()
    }

    /// Run every step in order
    pub fn run(&mut self) -> Result<MigrationReport> {
        self.walk()?;
        self.generate_revert()?;
        self.stage()?;
        self.promote()?;
        self.rebase_index()?;
        self.patch_manifest()?;
        self.report()
    }

    /// IDLE -> WALKING: check preconditions, mirror into the staging tree
    pub fn walk(&mut self) -> Result<&WalkReport> {
        self.enter(MigrationState::Idle, MigrationState::Walking, "walk")?;
        info!("Obfuscating {}", self.paths.plain.display());

        if let Err(e) = self.check_preconditions() {
            return Err(self.fail(e));
        }

        self.created_staging = true;
        let transformer = self.transformer();
        let report = TreeWalker::new(&transformer)
            .extensions(&self.config.extensions)
            .mirror(
                &self.paths.plain,
                &self.paths.obfuscated,
                &self.config.exclude_dirs,
                &self.config.exclude_files,
            );
        match report {
            Ok(report) => Ok(&*self.walk.insert(report)),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// WALKING -> GENERATING_REVERT: refuse partial trees, write the revert unit
    pub fn generate_revert(&mut self) -> Result<PathBuf> {
        self.enter(MigrationState::Walking, MigrationState::GeneratingRevert, "generate the revert unit")?;
        match self.write_revert_unit() {
            Ok(path) => Ok(path),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// GENERATING_REVERT -> STAGED: write the load-order index
    pub fn stage(&mut self) -> Result<&UnitIndex> {
        self.enter(MigrationState::GeneratingRevert, MigrationState::Staged, "stage")?;
        let units = self
            .walk
            .as_ref()
            .map(|w| w.obfuscated.clone())
            .unwrap_or_default();
        let index = UnitIndex::new(
            &self.config.revert_unit_name,
            &self.config.autoload_index_name,
            units,
        );
        let index_path = self.paths.obfuscated.join(&self.config.autoload_index_name);
        if let Err(e) = index.write(&index_path, IndexBase::Absolute(&self.paths.obfuscated)) {
            return Err(self.fail(e));
        }
        info!(units = index.entries().len(), "Staged {}", self.paths.obfuscated.display());

        if self.config.verify_rollback {
            match tree_digest(&self.paths.plain) {
                Ok(digest) => self.plain_digest = Some(digest),
                Err(e) => return Err(self.fail(e)),
            }
        }
        Ok(&*self.index.insert(index))
    }

    /// STAGED -> PROMOTING: plain -> backup, then staging -> plain
    pub fn promote(&mut self) -> Result<()> {
        self.enter(MigrationState::Staged, MigrationState::Promoting, "promote")?;
        let TreePaths {
            plain,
            obfuscated,
            backup,
            ..
        } = self.paths.clone();

        if backup.exists() {
            return Err(self.fail(ObfuscatorError::BackupExists(backup)));
        }

        if let Err(source) = self.renamer.rename(&plain, &backup) {
            return Err(self.fail(ObfuscatorError::BackupRenameFailed {
                plain,
                backup,
                source,
            }));
        }
        info!("Backed up {} to {}", plain.display(), backup.display());

        let promote_error = match self.renamer.rename(&obfuscated, &plain) {
            Ok(()) => {
                self.created_staging = false;
                info!("Promoted {} to {}", obfuscated.display(), plain.display());
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(
            "Promotion of {} failed: {}; restoring {}",
            obfuscated.display(),
            promote_error,
            plain.display()
        );
        if let Err(restore_error) = self.renamer.rename(&backup, &plain) {
            // Staging stays where it is; nothing else is touched
            self.created_staging = false;
            error!(
                plain = %plain.display(),
                obfuscated = %obfuscated.display(),
                backup = %backup.display(),
                "IRRECOVERABLE: could not restore the original tree ({}); manual intervention required",
                restore_error
            );
            return Err(self.fail(ObfuscatorError::Irrecoverable {
                plain,
                obfuscated,
                backup,
                promote_error,
                restore_error,
            }));
        }

        let verified = self.verify_restored();
        Err(self.fail(ObfuscatorError::PromotionRolledBack {
            obfuscated,
            plain,
            source: promote_error,
            verified,
        }))
    }

    /// PROMOTING -> MANIFEST_PATCHING: rebase the index onto the promoted tree
    pub fn rebase_index(&mut self) -> Result<()> {
        self.enter(MigrationState::Promoting, MigrationState::ManifestPatching, "rebase the index")?;
        let index_path = self.paths.plain.join(&self.config.autoload_index_name);
        let result = match &self.index {
            Some(index) => index.write(&index_path, IndexBase::Relative),
            None => Ok(()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// MANIFEST_PATCHING -> DONE: put the revert unit first in `autoload.files`
    pub fn patch_manifest(&mut self) -> Result<ManifestChange> {
        self.enter(MigrationState::ManifestPatching, MigrationState::ManifestPatching, "patch the manifest")?;
        let entry = self.paths.manifest_entry(&self.config.revert_unit_name);

        let result = Manifest::load(&self.paths.manifest).and_then(|mut manifest| {
            let change = manifest.prepend_autoload_file(&entry);
            if change != ManifestChange::AlreadyFirst {
                manifest.save()?;
            }
            Ok(change)
        });
        match result {
            Ok(change) => {
                info!("Manifest {} {:?} {}", self.paths.manifest.display(), change, entry);
                self.manifest_change = Some(change);
                self.state = MigrationState::Done;
                Ok(change)
            }
            Err(e) => {
                error!(
                    "Tree promoted but manifest {} could not be patched; add {} to autoload.files by hand",
                    self.paths.manifest.display(),
                    entry
                );
                Err(self.fail(e))
            }
        }
    }

    /// Report of a run that reached DONE
    pub fn report(&self) -> Result<MigrationReport> {
        if self.state != MigrationState::Done {
            return Err(ObfuscatorError::InvalidState {
                action: "report",
                state: self.state,
            });
        }
        Ok(MigrationReport {
            paths: self.paths.clone(),
            walk: self.walk.clone().unwrap_or_default(),
            index: self
                .index
                .as_ref()
                .map(|i| i.entries().to_vec())
                .unwrap_or_default(),
            manifest_entry: self.paths.manifest_entry(&self.config.revert_unit_name),
            manifest_change: self.manifest_change.unwrap_or(ManifestChange::AlreadyFirst),
            links_recreated: self.links_recreated,
            backup_digest: self.plain_digest.clone(),
        })
    }

    fn transformer(&self) -> CodeTransformer<'_> {
        CodeTransformer::new(&self.registry).suppress_errors(self.config.suppress_decode_errors)
    }

    fn enter(&mut self, expected: MigrationState, next: MigrationState, action: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(ObfuscatorError::InvalidState {
                action,
                state: self.state,
            });
        }
        self.state = next;
        Ok(())
    }

    fn check_preconditions(&self) -> Result<()> {
        let paths = &self.paths;
        if !paths.plain.is_dir() {
            return Err(ObfuscatorError::PlainTreeMissing(paths.plain.clone()));
        }
        if fs::symlink_metadata(&paths.obfuscated).is_ok() {
            return Err(ObfuscatorError::ObfuscatedOutputExists(paths.obfuscated.clone()));
        }
        if fs::symlink_metadata(&paths.backup).is_ok() {
            return Err(ObfuscatorError::BackupExists(paths.backup.clone()));
        }
        Manifest::load(&paths.manifest)?;
        Ok(())
    }

    fn write_revert_unit(&mut self) -> Result<PathBuf> {
        let staging = self.paths.obfuscated.clone();
        let mut walk = self.walk.take().unwrap_or_default();

        if self.config.symlinks == SymlinkPolicy::Recreate {
            self.links_recreated = recreate_links(&staging, &mut walk);
        }
        let checked = walk.check();
        self.walk = Some(walk);
        checked?;

        for name in [&self.config.revert_unit_name, &self.config.autoload_index_name] {
            let reserved = staging.join(name);
            if fs::symlink_metadata(&reserved).is_ok() {
                return Err(ObfuscatorError::ReservedName(self.paths.plain.join(name)));
            }
        }

        let unit = RevertUnitGenerator::new(&self.registry, self.config.bootstrap_scheme)
            .suppress_errors(self.config.suppress_decode_errors)
            .generate();
        let path = staging.join(&self.config.revert_unit_name);
        fs::write(&path, unit)?;
        info!("Wrote revert unit {}", path.display());
        Ok(path)
    }

    fn verify_restored(&self) -> Option<bool> {
        let expected = self.plain_digest.as_ref()?;
        match tree_digest(&self.paths.plain) {
            Ok(actual) if actual == *expected => Some(true),
            Ok(_) => {
                error!("Restored tree {} differs from its pre-run digest", self.paths.plain.display());
                Some(false)
            }
            Err(e) => {
                error!("Could not verify restored tree {}: {}", self.paths.plain.display(), e);
                Some(false)
            }
        }
    }

    /// Move to FAILED, drop our staging tree if promotion never started
    fn fail(&mut self, source: ObfuscatorError) -> ObfuscatorError {
        let step = self.state;
        self.state = MigrationState::Failed;

        if self.created_staging && !self.config.keep_staging_on_failure {
            match fs::remove_dir_all(&self.paths.obfuscated) {
                Ok(()) => info!("Removed staging tree {}", self.paths.obfuscated.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove staging tree {}: {}", self.paths.obfuscated.display(), e),
            }
            self.created_staging = false;
        }

        if source.is_irrecoverable() {
            error!("Migration failed during {:?}: {}", step, source);
        } else {
            warn!("Migration failed during {:?}: {}", step, source);
        }
        ObfuscatorError::Step {
            step,
            source: Box::new(source),
        }
    }
}

#[cfg(unix)]
fn recreate_links(staging: &Path, walk: &mut WalkReport) -> usize {
    let mut created = 0;
    for link in &walk.symlinks {
        let at = staging.join(&link.path);
        let result = match at.parent() {
            Some(parent) if !parent.is_dir() => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "parent directory was not mirrored",
            )),
            _ => std::os::unix::fs::symlink(&link.target, &at),
        };
        match result {
            Ok(()) => created += 1,
            Err(e) => walk.errors.push(EntryError {
                path: at,
                message: e.to_string(),
            }),
        }
    }
    created
}

#[cfg(not(unix))]
fn recreate_links(_staging: &Path, walk: &mut WalkReport) -> usize {
    for link in &walk.symlinks {
        warn!("Symbolic links are not recreated on this platform: {}", link.path.display());
    }
    0
}
