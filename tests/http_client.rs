//! HTTP client behaviour against a mocked Vault API.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vaultseed::error::{ConstraintError, SeedError, VaultError};
use vaultseed::model::{Backend, BackendSpec};
use vaultseed::vault::{BackendRole, HttpVaultClient, VaultApi, renew_once};

async fn client() -> (MockServer, HttpVaultClient) {
    let server = MockServer::start().await;
    let client = HttpVaultClient::new(&server.uri(), "s.test", false).unwrap();
    (server, client)
}

#[tokio::test]
async fn test_read_sends_token_and_returns_body() {
    let (server, client) = client().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/db"))
        .and(header("X-Vault-Token", "s.test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"user": "app"}})))
        .expect(1)
        .mount(&server)
        .await;

    let body = client.read("secret/db").await.unwrap().unwrap();
    assert_eq!(body["data"]["user"], "app");
}

#[tokio::test]
async fn test_missing_path_reads_as_none() {
    let (server, client) = client().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
        .mount(&server)
        .await;

    assert!(client.read("secret/missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_forbidden_is_permission_denied() {
    let (server, client) = client().await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/policies/acl/admin"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"errors": ["permission denied"]})),
        )
        .mount(&server)
        .await;

    let err = client
        .write("sys/policies/acl/admin", &json!({"policy": ""}))
        .await
        .unwrap_err();
    assert!(err.is_permission_denied());
}

#[tokio::test]
async fn test_api_errors_carry_vault_messages() {
    let (server, client) = client().await;
    Mock::given(method("GET"))
        .and(path("/v1/nowhere/foo"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"errors": ["no handler for route 'nowhere/foo'"]})),
        )
        .mount(&server)
        .await;

    let err = client.read("nowhere/foo").await.unwrap_err();
    assert!(err.is_unsupported_path());
    match err {
        SeedError::Vault(VaultError::Api { status, .. }) => assert_eq!(status, 404),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_list_mounts_strips_trailing_slash() {
    let (server, client) = client().await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/mounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "r1",
            "data": {
                "secret/": {"type": "kv", "options": {"version": "2"}},
                "sys/": {"type": "system"},
            },
        })))
        .mount(&server)
        .await;

    let mounts = client.list_mounts(BackendRole::Secret).await.unwrap();
    assert_eq!(mounts.keys().collect::<Vec<_>>(), vec!["secret", "sys"]);
    assert_eq!(mounts["secret"].kv_version(), 2);
}

#[tokio::test]
async fn test_backend_mounts_through_sys_auth() {
    let (server, client) = client().await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token/": {"type": "token"},
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/auth/approle"))
        .and(body_json(json!({"type": "approle"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut backend = Backend::from_spec(&BackendSpec::auth("approle", "approle").governing(), true);
    let listing = client.list_mounts(BackendRole::Auth).await.unwrap();
    backend.fetch(&client, &listing).await.unwrap();
    assert!(!backend.exists());
    backend.sync(&client).await.unwrap();
}

#[tokio::test]
async fn test_existing_mount_becomes_conflict() {
    let (server, client) = client().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/mounts/foo/bar"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"errors": ["existing mount at foo/"]})),
        )
        .mount(&server)
        .await;

    let backend = Backend::from_spec(&BackendSpec::secret("foo/bar", "kv").governing(), true);
    let err = backend.sync(&client).await.unwrap_err();
    match err {
        SeedError::Constraint(ConstraintError::MountConflict { path, existing }) => {
            assert_eq!(path, "foo/bar");
            assert_eq!(existing, "foo");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_short_lease_renewal_is_rejected() {
    let (server, client) = client().await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/leases/renew"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lease_id": "aws/creds/ci/abc",
            "lease_duration": 60,
        })))
        .mount(&server)
        .await;

    let err = renew_once(&client, "aws/creds/ci/abc", 3600).await.unwrap_err();
    assert!(matches!(err, SeedError::Vault(VaultError::LeaseTooShort { .. })));
}
