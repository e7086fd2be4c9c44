//! Freeze and thaw of local secret files.

mod common;

use serde_json::{Value, json};

use common::{Workspace, context};
use vaultseed::archive::PassthroughEncryptor;
use vaultseed::error::{ArchiveError, SeedError};

fn manifest() -> Value {
    json!({
        "secrets": [{"var_file": "apps/db.yml", "mount": "secret", "path": "db"}],
        "approles": [{
            "name": "ci",
            "policies": ["default"],
            "preset": [{"name": "pipeline", "filename": "ci-secret-id"}],
        }],
    })
}

fn populated() -> Workspace {
    let ws = Workspace::new();
    ws.secret("apps/db.yml", "user: app\n");
    ws.secret("ci-secret-id", "5f1c0e4a-ci\n");
    ws.secret("unrelated.txt", "not referenced\n");
    ws
}

#[test]
fn test_freeze_then_thaw_restores_referenced_files() {
    let source = populated();
    let options = source.options();
    let env = source.env();
    let ctx = context(manifest(), &options, &env);

    let out = tempfile::tempdir().unwrap();
    let icefile = ctx
        .freeze(out.path(), &env, &PassthroughEncryptor, &[], "aomi", "demo")
        .unwrap();
    let name = icefile.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("aomi-demo-"), "{name}");
    assert!(name.ends_with(".ice"), "{name}");

    let target = Workspace::new();
    let options = target.options();
    let env = target.env();
    let ctx = context(manifest(), &options, &env);
    let mut thawed = ctx.thaw(&icefile, &env, &PassthroughEncryptor, false).unwrap();
    thawed.sort();
    assert_eq!(thawed, vec!["apps/db.yml", "ci-secret-id"]);

    let secrets = target.root().join(".secrets");
    assert_eq!(
        std::fs::read_to_string(secrets.join("apps/db.yml")).unwrap(),
        "user: app\n"
    );
    assert!(!secrets.join("unrelated.txt").exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(secrets.join("ci-secret-id"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o077, 0);
    }
}

#[test]
fn test_freeze_fails_on_missing_secret() {
    let ws = Workspace::new();
    ws.secret("apps/db.yml", "user: app\n");
    let options = ws.options();
    let env = ws.env();
    let ctx = context(manifest(), &options, &env);

    let out = tempfile::tempdir().unwrap();
    let err = ctx
        .freeze(out.path(), &env, &PassthroughEncryptor, &[], "aomi", "demo")
        .unwrap_err();
    assert!(matches!(err, SeedError::Manifest(_)));
}

#[test]
fn test_thaw_missing_member() {
    let source = populated();
    let options = source.options();
    let env = source.env();
    let doc = json!({"secrets": [{"var_file": "apps/db.yml", "mount": "secret", "path": "db"}]});
    let ctx = context(doc, &options, &env);
    let out = tempfile::tempdir().unwrap();
    let icefile = ctx
        .freeze(out.path(), &env, &PassthroughEncryptor, &[], "aomi", "demo")
        .unwrap();

    let target = Workspace::new();
    let options = target.options();
    let env = target.env();
    let ctx = context(manifest(), &options, &env);

    let err = ctx
        .thaw(&icefile, &env, &PassthroughEncryptor, false)
        .unwrap_err();
    assert!(matches!(err, SeedError::Archive(ArchiveError::IceFile { .. })));

    let thawed = ctx.thaw(&icefile, &env, &PassthroughEncryptor, true).unwrap();
    assert_eq!(thawed, vec!["apps/db.yml"]);
}

#[test]
fn test_thaw_unreadable_icefile() {
    let ws = Workspace::new();
    let options = ws.options();
    let env = ws.env();
    let ctx = context(manifest(), &options, &env);

    let err = ctx
        .thaw(&ws.root().join("nope.ice"), &env, &PassthroughEncryptor, false)
        .unwrap_err();
    assert!(matches!(err, SeedError::Archive(ArchiveError::IceFile { .. })));

    let garbage = ws.root().join("garbage.ice");
    std::fs::write(&garbage, b"definitely not a zip").unwrap();
    assert!(ctx.thaw(&garbage, &env, &PassthroughEncryptor, false).is_err());
}
