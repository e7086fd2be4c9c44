//! End to end seeding against an in-memory Vault.

mod common;

use async_trait::async_trait;
use mockall::mock;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use common::{Call, MemoryVault, Workspace, context};
use vaultseed::config::SeedOptions;
use vaultseed::error::{ConstraintError, ManifestError, Result, SeedError, VaultError};
use vaultseed::planner::DiffType;
use vaultseed::reconciler::Reconciler;
use vaultseed::vault::{BackendRole, MountInfo, MountRequest, VaultApi};

fn workspace() -> Workspace {
    let ws = Workspace::new();
    ws.secret("db.yml", "user: app\npassword: hunter2\n");
    ws.secret("ci-secret-id", "5f1c0e4a-ci\n");
    ws.policy("apps-read.hcl", "path \"apps/*\" {\n  capabilities = [\"read\"]\n}\n");
    ws
}

fn manifest() -> Value {
    json!({
        "mounts": [{"path": "apps", "tune": {"default_lease_ttl": "1h"}}],
        "policies": [{"name": "apps-read", "file": "apps-read.hcl"}],
        "secrets": [
            {"var_file": "db.yml", "mount": "apps", "path": "db", "tags": ["db"]},
            {"generated": {
                "mount": "secret",
                "path": "web",
                "keys": [{"name": "session", "method": "uuid"}],
                "tags": ["web"],
            }},
        ],
        "approles": [{
            "name": "ci",
            "policies": ["apps-read"],
            "preset": [{"name": "pipeline", "filename": "ci-secret-id"}],
        }],
    })
}

async fn seed(
    vault: &MemoryVault,
    ws: &Workspace,
    doc: Value,
    options: &SeedOptions,
) -> vaultseed::SeedReport {
    let env = ws.env();
    let mut ctx = context(doc, options, &env);
    Reconciler::new(vault, &env, options).seed(&mut ctx).await.unwrap()
}

#[tokio::test]
async fn test_first_seed_creates_everything() {
    let vault = MemoryVault::new();
    let ws = workspace();
    let report = seed(&vault, &ws, manifest(), &ws.options()).await;

    assert_eq!(report.mounted, vec!["approle", "apps"]);
    assert_eq!(vault.get("apps/db"), Some(json!({"user": "app", "password": "hunter2"})));
    assert!(vault.get("secret/web").unwrap()["session"].is_string());
    assert_eq!(
        vault.get("auth/approle/role/ci").unwrap()["policies"],
        json!("apps-read,default")
    );
    assert_eq!(
        vault.mount(BackendRole::Secret, "apps").unwrap().config.unwrap()["default_lease_ttl"],
        json!(3600)
    );
    assert!(
        vault
            .calls()
            .contains(&Call::Write(String::from("auth/approle/role/ci/custom-secret-id")))
    );
}

#[tokio::test]
async fn test_second_seed_changes_nothing() {
    let vault = MemoryVault::new();
    let ws = workspace();
    seed(&vault, &ws, manifest(), &ws.options()).await;
    vault.clear_calls();

    let report = seed(&vault, &ws, manifest(), &ws.options()).await;
    assert!(vault.calls().is_empty(), "{:?}", vault.calls());
    assert_eq!(report.total_changes(), 0);

    let env = ws.env();
    let options = ws.options();
    let mut ctx = context(manifest(), &options, &env);
    let reconciler = Reconciler::new(&vault, &env, &options);
    reconciler.fetch(&mut ctx).await.unwrap();
    let diff = reconciler.diff(&ctx).unwrap();
    assert!(!diff.has_changes(), "{diff}");
}

#[tokio::test]
async fn test_mount_replaced_in_one_run() {
    let vault = MemoryVault::new();
    vault.add_mount(BackendRole::Secret, "foo", "aws");
    let ws = workspace();
    let doc = json!({
        "mounts": [
            {"path": "foo", "type": "aws", "state": "absent"},
            {"path": "foo", "type": "kv"},
        ],
    });

    seed(&vault, &ws, doc, &ws.options()).await;

    assert_eq!(vault.mount(BackendRole::Secret, "foo").unwrap().kind, "kv");
    let calls = vault.calls();
    let unmount = calls
        .iter()
        .position(|c| *c == Call::Unmount(BackendRole::Secret, String::from("foo")))
        .unwrap();
    let mount = calls
        .iter()
        .position(|c| *c == Call::Mount(BackendRole::Secret, String::from("foo")))
        .unwrap();
    assert!(unmount < mount);
}

#[tokio::test]
async fn test_generated_secret_respects_overwrite() {
    let vault = MemoryVault::new();
    vault.put("secret/creds", json!({"user": "a", "pass": "b"}));
    let ws = workspace();
    let doc = json!({
        "secrets": [{"generated": {
            "mount": "secret",
            "path": "creds",
            "keys": [
                {"name": "user", "method": "words", "overwrite": false},
                {"name": "pass", "method": "words", "overwrite": true},
            ],
        }}],
    });

    let report = seed(&vault, &ws, doc, &ws.options()).await;

    let creds = vault.get("secret/creds").unwrap();
    assert_eq!(creds["user"], "a");
    assert_ne!(creds["pass"], "b");
    assert_eq!(report.changed, 1);
}

#[tokio::test]
async fn test_tags_limit_what_is_written() {
    let vault = MemoryVault::new();
    let ws = workspace();
    let options = SeedOptions {
        tags: vec![String::from("web")],
        ..ws.options()
    };

    seed(&vault, &ws, manifest(), &options).await;

    assert!(vault.get("secret/web").is_some());
    assert!(vault.get("apps/db").is_none());
    assert!(vault.get("sys/policies/acl/apps-read").is_none());
    assert!(vault.mount(BackendRole::Secret, "apps").is_none());
}

#[tokio::test]
async fn test_mount_only_stops_before_resources() {
    let vault = MemoryVault::new();
    let ws = workspace();
    let options = SeedOptions {
        mount_only: true,
        ..ws.options()
    };

    let report = seed(&vault, &ws, manifest(), &options).await;

    assert!(report.mount_only);
    assert!(vault.mount(BackendRole::Secret, "apps").is_some());
    assert!(vault.get("apps/db").is_none());
}

#[tokio::test]
async fn test_remove_unknown_prunes_undeclared_mounts() {
    let vault = MemoryVault::new();
    vault.add_mount(BackendRole::Secret, "legacy", "kv");
    let ws = workspace();
    let options = SeedOptions {
        remove_unknown: true,
        ..ws.options()
    };

    let report = seed(&vault, &ws, manifest(), &options).await;

    assert_eq!(report.pruned, vec!["legacy"]);
    assert!(vault.mount(BackendRole::Secret, "legacy").is_none());
    assert!(vault.mount(BackendRole::Secret, "secret").is_some());
    assert!(vault.mount(BackendRole::Secret, "cubbyhole").is_some());
    assert!(vault.mount(BackendRole::Secret, "sys").is_some());
}

#[tokio::test]
async fn test_absent_secret_is_deleted() {
    let vault = MemoryVault::new();
    vault.put("secret/old", json!({"k": "v"}));
    let ws = workspace();
    let doc = json!({
        "secrets": [
            {"var_file": "db.yml", "mount": "secret", "path": "old", "state": "absent"},
            {"var_file": "db.yml", "mount": "secret", "path": "db"},
        ],
    });

    let report = seed(&vault, &ws, doc, &ws.options()).await;

    assert_eq!(report.deleted, 1);
    assert!(vault.get("secret/old").is_none());
    assert!(report.unmounted.is_empty());
    assert!(vault.mount(BackendRole::Secret, "secret").is_some());
}

#[tokio::test]
async fn test_mount_left_with_absent_secrets_is_unmounted() {
    let vault = MemoryVault::new();
    vault.add_mount(BackendRole::Secret, "old", "kv");
    vault.put("old/db", json!({"k": "v"}));
    let ws = workspace();
    let doc = json!({
        "secrets": [{"var_file": "db.yml", "mount": "old", "path": "db", "state": "absent"}],
    });

    let report = seed(&vault, &ws, doc, &ws.options()).await;

    assert_eq!(report.deleted, 1);
    assert_eq!(report.unmounted, vec!["old"]);
    assert!(report.pruned.is_empty());
    assert!(vault.mount(BackendRole::Secret, "old").is_none());
    assert!(vault.mount(BackendRole::Secret, "secret").is_some());
}

#[tokio::test]
async fn test_bare_absent_policy_is_deleted() {
    let vault = MemoryVault::new();
    vault.put("sys/policies/acl/old", json!({"policy": "path \"x\" {}"}));
    let ws = workspace();
    let doc = json!({"policies": [{"name": "old", "state": "absent"}]});

    let report = seed(&vault, &ws, doc, &ws.options()).await;

    assert_eq!(report.deleted, 1);
    assert!(vault.get("sys/policies/acl/old").is_none());
    assert!(
        vault
            .calls()
            .contains(&Call::Delete(String::from("sys/policies/acl/old")))
    );
}

#[tokio::test]
async fn test_bare_absent_approle_is_deleted() {
    let vault = MemoryVault::new();
    vault.add_mount(BackendRole::Auth, "approle", "approle");
    vault.put("auth/approle/role/ci", json!({"policies": ["default"]}));
    let ws = workspace();
    let doc = json!({
        "approles": [
            {"name": "ci", "state": "absent"},
            {"name": "deploy", "policies": ["default"]},
        ],
    });

    let report = seed(&vault, &ws, doc, &ws.options()).await;

    assert_eq!(report.deleted, 1);
    assert!(vault.get("auth/approle/role/ci").is_none());
    assert!(vault.get("auth/approle/role/deploy").is_some());
    assert!(vault.mount(BackendRole::Auth, "approle").is_some());
}

#[tokio::test]
async fn test_cubbyhole_writes_use_the_original_token() {
    let vault = MemoryVault::new();
    let ws = workspace();
    let doc = json!({
        "secrets": [
            {"var_file": "db.yml", "mount": "cubbyhole", "path": "db"},
            {"var_file": "db.yml", "mount": "secret", "path": "db"},
        ],
    });

    seed(&vault, &ws, doc, &ws.options()).await;

    assert_eq!(
        vault.get("cubbyhole/db"),
        Some(json!({"user": "app", "password": "hunter2"}))
    );
    assert_eq!(
        vault.token_of(&Call::Write(String::from("cubbyhole/db"))).as_deref(),
        Some("s.original")
    );
    assert_eq!(
        vault.token_of(&Call::Write(String::from("secret/db"))).as_deref(),
        Some("s.working")
    );
    assert_eq!(vault.token(), "s.working");
}

#[tokio::test]
async fn test_failed_cubbyhole_write_restores_the_token() {
    let vault = MemoryVault::new();
    vault.fail_writes("cubbyhole/db");
    let ws = workspace();
    let options = ws.options();
    let env = ws.env();
    let doc = json!({
        "secrets": [{"var_file": "db.yml", "mount": "cubbyhole", "path": "db"}],
    });

    let mut ctx = context(doc, &options, &env);
    let err = Reconciler::new(&vault, &env, &options)
        .seed(&mut ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, SeedError::Vault(_)), "{err:?}");
    assert_eq!(
        vault.token_of(&Call::Write(String::from("cubbyhole/db"))).as_deref(),
        Some("s.original")
    );
    assert_eq!(vault.token(), "s.working");
}

#[tokio::test]
async fn test_kv_v2_secret_round_trip() {
    let vault = MemoryVault::new();
    vault.add_mount_with_options("kv2", "kv", json!({"version": "2"}));
    let ws = workspace();
    let present = json!({
        "secrets": [
            {"var_file": "db.yml", "mount": "kv2", "path": "db"},
            {"var_file": "db.yml", "mount": "kv2", "path": "keep"},
        ],
    });

    let report = seed(&vault, &ws, present.clone(), &ws.options()).await;
    assert_eq!(report.added, 2);
    assert_eq!(
        vault.get("kv2/data/db"),
        Some(json!({"data": {"user": "app", "password": "hunter2"}}))
    );

    vault.clear_calls();
    let report = seed(&vault, &ws, present, &ws.options()).await;
    assert!(vault.calls().is_empty(), "{:?}", vault.calls());
    assert_eq!(report.total_changes(), 0);

    let doc = json!({
        "secrets": [
            {"var_file": "db.yml", "mount": "kv2", "path": "db", "state": "absent"},
            {"var_file": "db.yml", "mount": "kv2", "path": "keep"},
        ],
    });
    let report = seed(&vault, &ws, doc, &ws.options()).await;
    assert_eq!(report.deleted, 1);
    assert!(
        vault
            .calls()
            .contains(&Call::Delete(String::from("kv2/metadata/db")))
    );
    assert!(vault.get("kv2/data/db").is_none());
    assert!(vault.mount(BackendRole::Secret, "kv2").is_some());
}

#[tokio::test]
async fn test_undeclared_missing_mount_is_rejected() {
    let vault = MemoryVault::new();
    let ws = workspace();
    let options = ws.options();
    let env = ws.env();
    let doc = json!({
        "secrets": [{"var_file": "db.yml", "mount": "nowhere", "path": "db"}],
    });

    let mut ctx = context(doc, &options, &env);
    let err = Reconciler::new(&vault, &env, &options)
        .seed(&mut ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, SeedError::Manifest(ManifestError::Data { .. })));
    assert!(vault.calls().is_empty());
}

#[tokio::test]
async fn test_missing_secret_file_aborts_before_writing() {
    let vault = MemoryVault::new();
    let ws = workspace();
    let options = ws.options();
    let env = ws.env();
    let doc = json!({
        "policies": [{"name": "apps-read", "file": "apps-read.hcl"}],
        "secrets": [{"var_file": "missing.yml", "mount": "secret", "path": "x"}],
    });

    let mut ctx = context(doc, &options, &env);
    let err = Reconciler::new(&vault, &env, &options)
        .seed(&mut ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, SeedError::Manifest(ManifestError::File { .. })));
    assert!(vault.calls().is_empty());
}

#[tokio::test]
async fn test_description_change_is_a_conflict() {
    let vault = MemoryVault::new();
    let ws = workspace();
    let options = ws.options();
    let env = ws.env();
    seed(
        &vault,
        &ws,
        json!({"mounts": [{"path": "apps", "description": "old"}]}),
        &options,
    )
    .await;

    let doc = json!({"mounts": [{"path": "apps", "description": "new"}]});
    let mut ctx = context(doc.clone(), &options, &env);
    let reconciler = Reconciler::new(&vault, &env, &options);
    reconciler.fetch(&mut ctx).await.unwrap();
    let diff = reconciler.diff(&ctx).unwrap();
    assert_eq!(diff.conflicts().len(), 1);

    let mut ctx = context(doc, &options, &env);
    let err = reconciler.seed(&mut ctx).await.unwrap_err();
    assert!(matches!(
        err,
        SeedError::Constraint(ConstraintError::DescriptionImmutable { .. })
    ));
}

mock! {
    pub Vault {}

    #[async_trait]
    impl VaultApi for Vault {
        async fn read(&self, path: &str) -> Result<Option<Value>>;
        async fn write(&self, path: &str, payload: &Value) -> Result<Option<Value>>;
        async fn delete(&self, path: &str) -> Result<()>;
        async fn list_mounts(&self, role: BackendRole) -> Result<BTreeMap<String, MountInfo>>;
        async fn enable_mount(&self, role: BackendRole, request: &MountRequest) -> Result<()>;
        async fn disable_mount(&self, role: BackendRole, path: &str) -> Result<()>;
        async fn renew_lease(&self, lease_id: &str, increment: u64) -> Result<u64>;
        fn token(&self) -> String;
        fn set_token(&self, token: &str);
        fn original_token(&self) -> String;
    }
}

#[tokio::test]
async fn test_permission_denied_stops_the_run() {
    let ws = workspace();
    let options = ws.options();
    let env = ws.env();
    let doc = json!({
        "policies": [
            {"name": "apps-read", "file": "apps-read.hcl"},
            {"name": "apps-write", "file": "apps-read.hcl"},
        ],
    });

    let mut vault = MockVault::new();
    vault.expect_read().returning(|_| Ok(None));
    vault.expect_write().times(1).returning(|path, _| {
        Err(VaultError::PermissionDenied {
            path: path.to_string(),
        }
        .into())
    });

    let mut ctx = context(doc, &options, &env);
    let err = Reconciler::new(&vault, &env, &options)
        .seed(&mut ctx)
        .await
        .unwrap_err();

    match err {
        SeedError::Constraint(ConstraintError::PermissionDenied { action, target }) => {
            assert_eq!(action, "writing");
            assert_eq!(target, "sys/policies/acl/apps-read");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_diff_reports_pending_rows() {
    let vault = MemoryVault::new();
    let ws = workspace();
    let options = ws.options();
    let env = ws.env();

    let mut ctx = context(manifest(), &options, &env);
    let reconciler = Reconciler::new(&vault, &env, &options);
    reconciler.fetch(&mut ctx).await.unwrap();
    let diff = reconciler.diff(&ctx).unwrap();

    assert!(diff.has_changes());
    let policy = diff.entries.iter().find(|e| e.kind == "Policy").unwrap();
    assert_eq!(policy.diff, DiffType::Add);
    let apps = diff
        .entries
        .iter()
        .find(|e| e.kind == "secret mount" && e.path == "apps")
        .unwrap();
    assert_eq!(apps.diff, DiffType::Add);
    assert!(vault.calls().is_empty());
}

#[tokio::test]
async fn test_mappings_are_not_read_without_their_mount() {
    let vault = MemoryVault::new();
    vault.put("auth/ldap/groups/ops", json!({"policies": "read"}));
    let ws = workspace();
    let options = ws.options();
    let env = ws.env();
    let doc = json!({"ldap_groups": [{"group": "ops", "policies": ["read"]}]});

    let reconciler = Reconciler::new(&vault, &env, &options);
    let mut ctx = context(doc.clone(), &options, &env);
    reconciler.fetch(&mut ctx).await.unwrap();
    let diff = reconciler.diff(&ctx).unwrap();
    let group = diff.entries.iter().find(|e| e.kind == "LDAP Group").unwrap();
    assert_eq!(group.diff, DiffType::Add);

    vault.add_mount(BackendRole::Auth, "ldap", "ldap");
    let mut ctx = context(doc, &options, &env);
    reconciler.fetch(&mut ctx).await.unwrap();
    let diff = reconciler.diff(&ctx).unwrap();
    let group = diff.entries.iter().find(|e| e.kind == "LDAP Group").unwrap();
    assert_eq!(group.diff, DiffType::Noop);
}
