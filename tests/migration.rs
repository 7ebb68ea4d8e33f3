use shroud::digest::tree_digest;
use shroud::manifest::Manifest;
use shroud::migrate::{MigrationCoordinator, MigrationState, Renamer};
use shroud::{CodeTransformer, ObfuscatorConfig, ObfuscatorError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Refuses to move the staging tree onto the plain tree
struct NoPromotion {
    plain: PathBuf,
}

impl Renamer for NoPromotion {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if to == self.plain && from.ends_with("app_obfuscated") {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated cross-device rename"));
        }
        fs::rename(from, to)
    }
}

fn project(root: &Path) -> PathBuf {
    let app = root.join("app");
    fs::create_dir_all(app.join("Services")).unwrap();
    fs::write(app.join("bootstrap.php"), "<?php\nrequire 'Services/Mailer.php';\n").unwrap();
    fs::write(
        app.join("Services/Mailer.php"),
        "<?php\nnamespace App\\Services;\n\nfinal class Mailer\n{\n    public function send(): bool { return true; }\n}\n",
    )
    .unwrap();
    fs::write(app.join("Services/template.html"), "<p>{{ body }}</p>").unwrap();
    fs::write(
        root.join("composer.json"),
        r#"{"autoload": {"files": ["src/a.php", "src/b.php"]}, "config": {"sort-packages": true}}"#,
    )
    .unwrap();
    app
}

fn seeded() -> ObfuscatorConfig {
    ObfuscatorConfig {
        seed: Some(2024),
        ..Default::default()
    }
}

#[test]
fn migration_promotes_and_patches_manifest() {
    let dir = tempdir().unwrap();
    let app = project(dir.path());

    let mut coordinator = MigrationCoordinator::new(&app, seeded()).unwrap();
    let report = coordinator.run().unwrap();
    assert_eq!(coordinator.state(), MigrationState::Done);
    assert_eq!(report.walk.obfuscated.len(), 2);
    assert_eq!(report.walk.copied, vec![PathBuf::from("Services/template.html")]);

    let manifest = Manifest::load(&dir.path().join("composer.json")).unwrap();
    assert_eq!(
        manifest.autoload_files(),
        vec!["app/App.php", "src/a.php", "src/b.php"]
    );
    let text = fs::read_to_string(dir.path().join("composer.json")).unwrap();
    assert!(text.contains("\"sort-packages\": true"));

    let transformer = CodeTransformer::new(coordinator.registry());
    let mailer = fs::read_to_string(app.join("Services/Mailer.php")).unwrap();
    assert!(transformer
        .reveal(&mailer)
        .unwrap()
        .starts_with("namespace App\\Services;"));
}

#[test]
fn rerun_never_clobbers_backup() {
    let dir = tempdir().unwrap();
    let app = project(dir.path());
    MigrationCoordinator::new(&app, seeded()).unwrap().run().unwrap();

    let backup = dir.path().join("app_backup");
    let recovery_point = tree_digest(&backup).unwrap();

    for _ in 0..2 {
        let err = MigrationCoordinator::new(&app, seeded()).unwrap().run().unwrap_err();
        assert!(err.is_precondition(), "unexpected error: {}", err);
    }
    assert_eq!(tree_digest(&backup).unwrap(), recovery_point);

    // Manifest still lists the revert unit once
    let manifest = Manifest::load(&dir.path().join("composer.json")).unwrap();
    let files = manifest.autoload_files();
    assert_eq!(files.iter().filter(|f| *f == "app/App.php").count(), 1);
}

#[test]
fn failed_promotion_restores_original_tree() {
    let dir = tempdir().unwrap();
    let app = project(dir.path());
    let before = tree_digest(&app).unwrap();
    let manifest_before = fs::read_to_string(dir.path().join("composer.json")).unwrap();

    let renamer = NoPromotion { plain: app.clone() };
    let mut coordinator = MigrationCoordinator::new(&app, seeded())
        .unwrap()
        .with_renamer(renamer);
    let err = coordinator.run().unwrap_err();

    assert_eq!(coordinator.state(), MigrationState::Failed);
    assert!(!err.is_irrecoverable());
    match &err {
        ObfuscatorError::Step { step, source } => {
            assert_eq!(*step, MigrationState::Promoting);
            assert!(matches!(
                **source,
                ObfuscatorError::PromotionRolledBack { verified: Some(true), .. }
            ));
        }
        other => panic!("unexpected error: {}", other),
    }

    assert_eq!(tree_digest(&app).unwrap(), before);
    assert!(!dir.path().join("app_backup").exists());
    assert!(!dir.path().join("app_obfuscated").exists());
    assert_eq!(
        fs::read_to_string(dir.path().join("composer.json")).unwrap(),
        manifest_before
    );
}
