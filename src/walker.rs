use crate::error::{ObfuscatorError, Result};
use crate::pipeline::Rejection;
use crate::transform::{CodeTransformer, UnitOutput};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Why a source unit was copied instead of obfuscated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteReason {
    Rejected(Rejection),
    NotUtf8,
}

impl std::fmt::Display for NoteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(rejection) => rejection.fmt(f),
            Self::NotUtf8 => f.write_str("not valid UTF-8, not obfuscated"),
        }
    }
}

/// Non-fatal note about a source unit that was passed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingNote {
    pub path: PathBuf,
    pub reason: NoteReason,
}

/// A symbolic link found while mirroring; never followed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkRecord {
    /// Link location relative to the source root
    pub path: PathBuf,
    pub target: PathBuf,
}

/// An entry that could not be read or written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryError {
    pub path: PathBuf,
    pub message: String,
}

impl std::fmt::Display for EntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Everything a mirror pass did, in walk order.
/// Paths are relative to the source root unless noted.
#[derive(Debug, Clone, Default)]
pub struct WalkReport {
    pub obfuscated: Vec<PathBuf>,
    pub notes: Vec<EncodingNote>,
    pub copied: Vec<PathBuf>,
    pub symlinks: Vec<SymlinkRecord>,
    pub excluded: Vec<PathBuf>,
    /// Absolute paths of entries that failed
    pub errors: Vec<EntryError>,
}

impl WalkReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Fold the per-entry errors into a single error, if any
    pub fn check(&self) -> Result<()> {
        match self.errors.first() {
            None => Ok(()),
            Some(first) => Err(ObfuscatorError::WalkFailed {
                count: self.errors.len(),
                first: first.to_string(),
            }),
        }
    }
}

/// Absolute form of `path` resolved against `base`. The longest existing
/// ancestor is canonicalized and the remaining components are appended with
/// `.` and `..` folded, so paths that do not exist yet compare reliably.
pub fn anchor_path(path: &Path, base: &Path) -> PathBuf {
    let joined = base.join(path);
    let mut existing = joined.as_path();
    let mut rest = Vec::new();

    loop {
        if let Ok(real) = existing.canonicalize() {
            let mut anchored = real;
            for component in rest.iter().rev() {
                match component {
                    Component::ParentDir => {
                        anchored.pop();
                    }
                    Component::CurDir => {}
                    other => anchored.push(other.as_os_str()),
                }
            }
            return anchored;
        }
        match (existing.parent(), existing.components().next_back()) {
            (Some(parent), Some(last)) => {
                rest.push(last);
                existing = parent;
            }
            _ => return joined,
        }
    }
}

enum FileOutcome {
    Obfuscated,
    Noted(NoteReason),
    Copied,
}

/// Mirrors a source tree, obfuscating executable units on the way
pub struct TreeWalker<'t, 'r> {
    transformer: &'t CodeTransformer<'r>,
    extensions: Vec<String>,
}

impl<'t, 'r> TreeWalker<'t, 'r> {
    pub fn new(transformer: &'t CodeTransformer<'r>) -> Self {
        Self {
            transformer,
            extensions: vec!["php".into()],
        }
    }

    pub fn extensions(mut self, extensions: &[String]) -> Self {
        self.extensions = extensions.to_vec();
        self
    }

    /// Mirror `source` into `dest`. Unreadable entries are collected in the
    /// report and the walk carries on with their siblings.
    pub fn mirror(
        &self,
        source: &Path,
        dest: &Path,
        exclude_dirs: &[String],
        exclude_files: &[String],
    ) -> Result<WalkReport> {
        let cwd = std::env::current_dir()?;
        if anchor_path(dest, &cwd).starts_with(anchor_path(source, &cwd)) {
            return Err(ObfuscatorError::DestinationInsideSource(dest.to_path_buf()));
        }
        info!("Mirroring {} into {}", source.display(), dest.display());
        fs::create_dir_all(dest)?;

        let mut report = WalkReport::default();
        let mut entries = WalkDir::new(source)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(source).to_path_buf();
                    warn!("Cannot read {}: {}", path.display(), err);
                    report.errors.push(EntryError {
                        path,
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let relative = match entry.path().strip_prefix(source) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy();
            let file_type = entry.file_type();
            let target = dest.join(&relative);

            if file_type.is_symlink() {
                match fs::read_link(entry.path()) {
                    Ok(link_target) => {
                        debug!("Link {} -> {}", relative.display(), link_target.display());
                        report.symlinks.push(SymlinkRecord {
                            path: relative,
                            target: link_target,
                        });
                    }
                    Err(e) => report.errors.push(EntryError {
                        path: entry.path().to_path_buf(),
                        message: e.to_string(),
                    }),
                }
            } else if file_type.is_dir() {
                if exclude_dirs.iter().any(|d| *d == name) {
                    debug!("Excluded directory {}", relative.display());
                    report.excluded.push(relative);
                    entries.skip_current_dir();
                } else if let Err(e) = fs::create_dir_all(&target) {
                    report.errors.push(EntryError {
                        path: target,
                        message: e.to_string(),
                    });
                    entries.skip_current_dir();
                }
            } else if file_type.is_file() {
                if exclude_files.iter().any(|f| *f == name) {
                    debug!("Excluded file {}", relative.display());
                    report.excluded.push(relative);
                    continue;
                }
                match self.mirror_file(entry.path(), &target) {
                    Ok(FileOutcome::Obfuscated) => {
                        debug!("Obfuscated {}", relative.display());
                        report.obfuscated.push(relative);
                    }
                    Ok(FileOutcome::Noted(reason)) => {
                        warn!("{}: {}", relative.display(), reason);
                        report.notes.push(EncodingNote {
                            path: relative,
                            reason,
                        });
                    }
                    Ok(FileOutcome::Copied) => {
                        debug!("Copied {}", relative.display());
                        report.copied.push(relative);
                    }
                    Err(e) => {
                        warn!("Cannot mirror {}: {}", entry.path().display(), e);
                        report.errors.push(EntryError {
                            path: entry.path().to_path_buf(),
                            message: e.to_string(),
                        });
                    }
                }
            } else {
                warn!("Skipping special file {}", relative.display());
                report.excluded.push(relative);
            }
        }

        info!(
            obfuscated = report.obfuscated.len(),
            copied = report.copied.len(),
            notes = report.notes.len(),
            errors = report.errors.len(),
            "Mirror finished"
        );
        Ok(report)
    }

    fn mirror_file(&self, source: &Path, target: &Path) -> io::Result<FileOutcome> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if !self.is_source(source) {
            fs::copy(source, target)?;
            return Ok(FileOutcome::Copied);
        }

        let bytes = fs::read(source)?;
        let outcome = match String::from_utf8(bytes) {
            Ok(text) => match self.transformer.obfuscate_unit(&text) {
                UnitOutput::Obfuscated(wrapped) => {
                    fs::write(target, wrapped)?;
                    FileOutcome::Obfuscated
                }
                UnitOutput::PassThrough { original, rejection } => {
                    fs::write(target, original)?;
                    FileOutcome::Noted(NoteReason::Rejected(rejection))
                }
            },
            Err(err) => {
                fs::write(target, err.into_bytes())?;
                FileOutcome::Noted(NoteReason::NotUtf8)
            }
        };
        fs::set_permissions(target, fs::metadata(source)?.permissions())?;
        Ok(outcome)
    }

    fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AliasTable;
    use crate::registry::SchemeRegistry;
    use tempfile::tempdir;

    fn no_excludes() -> Vec<String> {
        Vec::new()
    }

    fn fixture(root: &Path) {
        fs::create_dir_all(root.join("Http/Controllers")).unwrap();
        fs::create_dir_all(root.join("vendor/lib")).unwrap();
        fs::write(root.join("Kernel.php"), "<?php\nclass Kernel {}\n").unwrap();
        fs::write(
            root.join("Http/Controllers/HomeController.php"),
            "<?php\nnamespace App\\Http\\Controllers;\nclass HomeController {}\n",
        )
        .unwrap();
        fs::write(root.join("Http/view.php"), "<h1><?= $title ?></h1><?php echo 1; ?>").unwrap();
        fs::write(root.join("readme.txt"), "plain notes").unwrap();
        fs::write(root.join(".env"), "APP_KEY=secret").unwrap();
        fs::write(root.join("vendor/lib/Dep.php"), "<?php class Dep {}").unwrap();
    }

    #[test]
    fn test_mirror_classifies_entries() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("app");
        let dest = dir.path().join("app_obfuscated");
        fixture(&source);

        let registry = SchemeRegistry::new(AliasTable::default()).unwrap();
        let transformer = CodeTransformer::new(&registry);
        let report = TreeWalker::new(&transformer)
            .mirror(&source, &dest, &["vendor".into()], &[".env".into()])
            .unwrap();

        assert!(!report.has_errors());
        assert_eq!(
            report.obfuscated,
            vec![
                PathBuf::from("Http/Controllers/HomeController.php"),
                PathBuf::from("Kernel.php"),
            ]
        );
        assert_eq!(report.copied, vec![PathBuf::from("readme.txt")]);
        assert_eq!(report.notes.len(), 1);
        assert_eq!(report.notes[0].path, PathBuf::from("Http/view.php"));
        assert!(report.excluded.contains(&PathBuf::from("vendor")));
        assert!(report.excluded.contains(&PathBuf::from(".env")));

        let kernel = fs::read_to_string(dest.join("Kernel.php")).unwrap();
        assert!(kernel.starts_with("<?php eval(\""));
        assert_eq!(transformer.reveal(&kernel).unwrap(), "class Kernel {}");
        assert_eq!(
            fs::read(dest.join("Http/view.php")).unwrap(),
            fs::read(source.join("Http/view.php")).unwrap()
        );
        assert_eq!(fs::read_to_string(dest.join("readme.txt")).unwrap(), "plain notes");
        assert!(!dest.join("vendor").exists());
        assert!(!dest.join(".env").exists());
    }

    #[test]
    fn test_exclusion_is_exact_name_match() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        let dest = dir.path().join("out");
        fs::create_dir_all(source.join("vendors")).unwrap();
        fs::write(source.join("vendors/a.txt"), "a").unwrap();

        let registry = SchemeRegistry::new(AliasTable::default()).unwrap();
        let transformer = CodeTransformer::new(&registry);
        let report = TreeWalker::new(&transformer)
            .mirror(&source, &dest, &["vendor".into()], &no_excludes())
            .unwrap();
        assert!(report.excluded.is_empty());
        assert!(dest.join("vendors/a.txt").exists());
    }

    #[test]
    fn test_non_utf8_unit_copied_verbatim() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        let dest = dir.path().join("out");
        fs::create_dir_all(&source).unwrap();
        let latin1 = b"<?php echo '\xe9t\xe9';".to_vec();
        fs::write(source.join("legacy.php"), &latin1).unwrap();

        let registry = SchemeRegistry::new(AliasTable::default()).unwrap();
        let transformer = CodeTransformer::new(&registry);
        let report = TreeWalker::new(&transformer)
            .mirror(&source, &dest, &no_excludes(), &no_excludes())
            .unwrap();
        assert_eq!(report.notes[0].reason, NoteReason::NotUtf8);
        assert_eq!(fs::read(dest.join("legacy.php")).unwrap(), latin1);
    }

    #[test]
    fn test_destination_inside_source_rejected() {
        let dir = tempdir().unwrap();
        let registry = SchemeRegistry::new(AliasTable::default()).unwrap();
        let transformer = CodeTransformer::new(&registry);
        let result = TreeWalker::new(&transformer).mirror(
            dir.path(),
            &dir.path().join("nested"),
            &no_excludes(),
            &no_excludes(),
        );
        assert!(matches!(result, Err(ObfuscatorError::DestinationInsideSource(_))));
    }

    #[test]
    fn test_destination_inside_source_behind_dot_dot() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("x")).unwrap();
        let source = dir.path().join("src");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.php"), "<?php echo 1;").unwrap();

        let registry = SchemeRegistry::new(AliasTable::default()).unwrap();
        let transformer = CodeTransformer::new(&registry);
        let result = TreeWalker::new(&transformer).mirror(
            &dir.path().join("x/../src"),
            &source.join("out"),
            &no_excludes(),
            &no_excludes(),
        );
        assert!(matches!(result, Err(ObfuscatorError::DestinationInsideSource(_))));
        assert!(!source.join("out").exists());
    }

    #[test]
    fn test_anchor_path() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("work")).unwrap();

        assert_eq!(anchor_path(Path::new("../composer.json"), &root.join("work")), root.join("composer.json"));
        assert_eq!(anchor_path(Path::new("./composer.json"), &root), root.join("composer.json"));
        assert_eq!(
            anchor_path(Path::new("new/./deep/../out"), &root.join("work")),
            root.join("work/new/out")
        );
        assert_eq!(anchor_path(&root.join("work/.."), Path::new("/elsewhere")), root);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_recorded_not_followed() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        let dest = dir.path().join("out");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("real.php"), "<?php return 1;").unwrap();
        std::os::unix::fs::symlink("real.php", source.join("alias.php")).unwrap();

        let registry = SchemeRegistry::new(AliasTable::default()).unwrap();
        let transformer = CodeTransformer::new(&registry);
        let report = TreeWalker::new(&transformer)
            .mirror(&source, &dest, &no_excludes(), &no_excludes())
            .unwrap();

        assert_eq!(
            report.symlinks,
            vec![SymlinkRecord {
                path: PathBuf::from("alias.php"),
                target: PathBuf::from("real.php"),
            }]
        );
        assert_eq!(report.obfuscated, vec![PathBuf::from("real.php")]);
        assert!(fs::symlink_metadata(dest.join("alias.php")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_collected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        let dest = dir.path().join("out");
        fs::create_dir_all(source.join("locked")).unwrap();
        fs::write(source.join("locked/a.php"), "<?php return 1;").unwrap();
        fs::write(source.join("open.txt"), "ok").unwrap();
        fs::set_permissions(source.join("locked"), fs::Permissions::from_mode(0o000)).unwrap();

        // Root ignores permission bits
        if fs::read_dir(source.join("locked")).is_ok() {
            fs::set_permissions(source.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let registry = SchemeRegistry::new(AliasTable::default()).unwrap();
        let transformer = CodeTransformer::new(&registry);
        let report = TreeWalker::new(&transformer)
            .mirror(&source, &dest, &no_excludes(), &no_excludes())
            .unwrap();
        fs::set_permissions(source.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();

        assert!(report.has_errors());
        assert!(report.check().is_err());
        assert_eq!(report.copied, vec![PathBuf::from("open.txt")]);
    }
}
