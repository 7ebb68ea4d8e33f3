use crate::cli::load_config;
use crate::error::{ObfuscatorError, Result};
use crate::migrate::{MigrationCoordinator, MigrationReport};
use std::path::{Path, PathBuf};

/// Options for the migrate command
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    pub config: Option<PathBuf>,
    /// Overrides the manifest from the config file
    pub manifest: Option<PathBuf>,
    pub seed: Option<u64>,
    pub keep_staging: bool,
    /// Treat the path as a package root and obfuscate its `src/` when present
    pub package: bool,
}

/// Tree to obfuscate for a package root: `<root>/src` if it is a directory
pub fn package_tree(root: &Path) -> PathBuf {
    let src = root.join("src");
    if src.is_dir() {
        src
    } else {
        root.to_path_buf()
    }
}

/// Obfuscate `plain` in place, keeping the original as `<plain>_backup`
pub fn migrate_tree(plain: &Path, options: &MigrateOptions) -> Result<MigrationReport> {
    let mut config = load_config(options.config.as_deref(), options.seed)?;
    if let Some(manifest) = &options.manifest {
        config.manifest = Some(manifest.clone());
    }
    if options.keep_staging {
        config.keep_staging_on_failure = true;
    }

    if !plain.is_dir() {
        return Err(ObfuscatorError::PlainTreeMissing(plain.to_path_buf()));
    }
    let plain = if options.package {
        package_tree(plain)
    } else {
        plain.to_path_buf()
    };

    let mut coordinator = MigrationCoordinator::new(&plain, config)?;
    coordinator.run()
}

/// Human-readable summary of a finished migration
pub fn format_migration(report: &MigrationReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("Obfuscated {}\n", report.paths.plain.display()));
    output.push_str(&format!("  Backup: {}\n", report.paths.backup.display()));
    output.push_str(&format!("  Units obfuscated: {}\n", report.walk.obfuscated.len()));
    output.push_str(&format!("  Files copied: {}\n", report.walk.copied.len()));
    output.push_str(&format!("  Excluded: {}\n", report.walk.excluded.len()));
    if report.links_recreated > 0 {
        output.push_str(&format!("  Links recreated: {}\n", report.links_recreated));
    }
    output.push_str(&format!(
        "  Manifest: {} ({:?})\n",
        report.manifest_entry, report.manifest_change
    ));

    if !report.walk.notes.is_empty() {
        output.push_str(&format!("\nPassed through unchanged ({}):\n", report.walk.notes.len()));
        for note in &report.walk.notes {
            output.push_str(&format!("  {}: {}\n", note.path.display(), note.reason));
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_migrate_tree() {
        let dir = tempdir().unwrap();
        let app = dir.path().join("app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("Kernel.php"), "<?php\nclass Kernel {}\n").unwrap();
        fs::write(app.join("page.php"), "<div><?= $a ?></div><?php echo 1;").unwrap();
        fs::write(dir.path().join("composer.json"), r#"{"autoload": {"files": []}}"#).unwrap();

        let options = MigrateOptions {
            seed: Some(5),
            ..Default::default()
        };
        let report = migrate_tree(&app, &options).unwrap();
        assert_eq!(report.walk.obfuscated.len(), 1);

        let summary = format_migration(&report);
        assert!(summary.contains("Units obfuscated: 1"));
        assert!(summary.contains("app/App.php (Prepended)"));
        assert!(summary.contains("page.php: "));
    }

    #[test]
    fn test_missing_tree() {
        let dir = tempdir().unwrap();
        let err = migrate_tree(&dir.path().join("absent"), &MigrateOptions::default()).unwrap_err();
        assert!(matches!(err, ObfuscatorError::PlainTreeMissing(_)));
    }

    #[test]
    fn test_manifest_override() {
        let dir = tempdir().unwrap();
        let app = dir.path().join("app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("a.php"), "<?php echo 1;").unwrap();
        let manifest = dir.path().join("deps.json");
        fs::write(&manifest, "{}").unwrap();

        let options = MigrateOptions {
            manifest: Some(manifest.clone()),
            ..Default::default()
        };
        migrate_tree(&app, &options).unwrap();
        assert!(fs::read_to_string(&manifest).unwrap().contains("app/App.php"));
    }

    #[test]
    fn test_package_root_uses_src() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("acme-mailer");
        fs::create_dir_all(pkg.join("src")).unwrap();
        fs::write(pkg.join("src/Mailer.php"), "<?php\nclass Mailer {}\n").unwrap();
        fs::write(pkg.join("README.md"), "mailer").unwrap();
        fs::write(pkg.join("composer.json"), r#"{"name": "acme/mailer"}"#).unwrap();

        let options = MigrateOptions {
            package: true,
            ..Default::default()
        };
        let report = migrate_tree(&pkg, &options).unwrap();
        assert_eq!(report.manifest_entry, "src/App.php");
        assert!(pkg.join("src_backup/Mailer.php").exists());
        assert_eq!(fs::read_to_string(pkg.join("README.md")).unwrap(), "mailer");
        assert!(fs::read_to_string(pkg.join("composer.json")).unwrap().contains("\"src/App.php\""));
    }

    #[test]
    fn test_package_without_src_is_its_own_tree() {
        let dir = tempdir().unwrap();
        assert_eq!(package_tree(dir.path()), dir.path().to_path_buf());
    }
}
