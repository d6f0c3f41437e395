//! Tests for the Azure Key Vault provider.

use super::*;
use crate::credential::{Credential, CredentialError, MockCredentialProvider};
use chrono::{Duration, Utc};
use wiremock::matchers::{header, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn token_source() -> Arc<dyn CredentialProvider> {
    let mut mock = MockCredentialProvider::new();
    mock.expect_name().return_const("test");
    mock.expect_resolve()
        .returning(|| Ok(Credential::new("vault-token", Utc::now() + Duration::hours(1))));
    Arc::new(mock)
}

fn provider_for(server: &MockServer) -> AzureKeyVaultProvider {
    let config = KeyVaultConfiguration {
        vault_url: server.uri(),
        ..KeyVaultConfiguration::default()
    };
    AzureKeyVaultProvider::new(config, token_source()).unwrap()
}

fn name(value: &str) -> SecretName {
    SecretName::new(value).unwrap()
}

fn secret_bundle(secret: &str, value: &str) -> serde_json::Value {
    serde_json::json!({
        "value": value,
        "id": format!("https://demo-vault.vault.azure.net/secrets/{}/0123abcd", secret),
        "attributes": {
            "enabled": true,
            "created": 1_700_000_000,
            "updated": 1_700_000_000,
            "recoveryLevel": "Recoverable+Purgeable"
        },
        "tags": {}
    })
}

async fn mount_secret(server: &MockServer, secret: &str, value: &str, calls: u64) {
    Mock::given(method("GET"))
        .and(path_regex(format!("^/secrets/{}/?$", secret)))
        .and(header("Authorization", "Bearer vault-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(secret_bundle(secret, value)))
        .expect(calls)
        .mount(server)
        .await;
}

async fn mount_status(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .respond_with(response)
        .mount(server)
        .await;
}

fn http_error(status: StatusCode) -> azure_core::Error {
    azure_core::Error::new(
        ErrorKind::HttpResponse {
            status,
            error_code: None,
        },
        "vault said no",
    )
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_empty_vault_url_is_rejected() {
    let result = AzureKeyVaultProvider::new(KeyVaultConfiguration::default(), token_source());

    assert!(matches!(result, Err(KeyVaultError::Configuration { .. })));
}

#[test]
fn test_malformed_vault_url_is_rejected() {
    let config = KeyVaultConfiguration {
        vault_url: "not a url".to_string(),
        ..KeyVaultConfiguration::default()
    };

    let result = AzureKeyVaultProvider::new(config, token_source());

    assert!(matches!(result, Err(KeyVaultError::Configuration { .. })));
}

#[test]
fn test_debug_names_vault_and_credential() {
    let config = KeyVaultConfiguration::for_vault(&crate::key_vault::VaultName::new("demo-vault").unwrap());
    let provider = AzureKeyVaultProvider::new(config, token_source()).unwrap();

    let debug = format!("{:?}", provider);

    assert!(debug.contains("https://demo-vault.vault.azure.net"));
    assert!(debug.contains("test"));
    assert_eq!(provider.vault_url(), "https://demo-vault.vault.azure.net");
}

// ============================================================================
// Retrieval
// ============================================================================

#[tokio::test]
async fn test_get_secret_sends_bearer_token() {
    let server = MockServer::start().await;
    mount_secret(&server, "QueueName", "orders", 1).await;

    let provider = provider_for(&server);
    let value = provider.get_secret(&name("QueueName")).await.unwrap();

    assert_eq!(value.expose_secret(), "orders");
}

/// Every read reaches the vault
#[tokio::test]
async fn test_repeated_reads_are_not_cached() {
    let server = MockServer::start().await;
    mount_secret(&server, "QueueName", "orders", 2).await;

    let provider = provider_for(&server);
    provider.get_secret(&name("QueueName")).await.unwrap();
    provider.get_secret(&name("QueueName")).await.unwrap();
}

#[tokio::test]
async fn test_credential_failure_is_reported_without_a_request() {
    let server = MockServer::start().await;

    let mut credential = MockCredentialProvider::new();
    credential.expect_name().return_const("test");
    credential.expect_resolve().returning(|| {
        Err(CredentialError::Unavailable {
            credential: "test",
            message: "no identity".to_string(),
        })
    });

    let provider = AzureKeyVaultProvider::new(
        KeyVaultConfiguration {
            vault_url: server.uri(),
            ..KeyVaultConfiguration::default()
        },
        Arc::new(credential),
    )
    .unwrap();

    let result = provider.get_secret(&name("QueueName")).await;

    assert!(matches!(result, Err(KeyVaultError::AuthenticationFailed { .. })));
    assert!(server.received_requests().await.unwrap().is_empty());
}

// ============================================================================
// Error Mapping
// ============================================================================

#[tokio::test]
async fn test_not_found_maps_to_secret_not_found() {
    let server = MockServer::start().await;
    mount_status(
        &server,
        ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": { "code": "SecretNotFound", "message": "A secret with (name/id) QueueName was not found" }
        })),
    )
    .await;

    let result = provider_for(&server).get_secret(&name("QueueName")).await;

    assert!(matches!(
        result,
        Err(KeyVaultError::SecretNotFound { name }) if name.as_str() == "QueueName"
    ));
}

#[tokio::test]
async fn test_forbidden_maps_to_access_denied() {
    let server = MockServer::start().await;
    mount_status(
        &server,
        ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": { "code": "Forbidden", "message": "caller lacks secrets/get" }
        })),
    )
    .await;

    let result = provider_for(&server).get_secret(&name("QueueName")).await;

    match result {
        Err(error @ KeyVaultError::AccessDenied { .. }) => {
            assert!(error.is_permission_error());
        }
        other => panic!("Expected AccessDenied, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unauthorized_maps_to_authentication_failed() {
    let server = MockServer::start().await;
    mount_status(&server, ResponseTemplate::new(401)).await;

    let result = provider_for(&server).get_secret(&name("QueueName")).await;

    assert!(matches!(result, Err(KeyVaultError::AuthenticationFailed { .. })));
}

#[tokio::test]
async fn test_slow_vault_times_out() {
    let server = MockServer::start().await;
    mount_status(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(secret_bundle("QueueName", "orders"))
            .set_delay(std::time::Duration::from_secs(5)),
    )
    .await;

    let provider = AzureKeyVaultProvider::new(
        KeyVaultConfiguration {
            vault_url: server.uri(),
            request_timeout_seconds: 1,
        },
        token_source(),
    )
    .unwrap();

    let result = provider.get_secret(&name("QueueName")).await;

    assert!(matches!(
        result,
        Err(KeyVaultError::Timeout { timeout_seconds: 1 })
    ));
}

/// Statuses the SDK retries are classified without a server round trip
#[test]
fn test_retried_statuses_are_transient() {
    let secret = name("QueueName");

    let throttled = map_azure_error(&secret, http_error(StatusCode::TooManyRequests));
    assert!(matches!(
        throttled,
        KeyVaultError::RateLimitExceeded {
            retry_after_seconds: DEFAULT_RETRY_AFTER_SECONDS
        }
    ));
    assert!(throttled.is_transient());

    let unavailable = map_azure_error(&secret, http_error(StatusCode::ServiceUnavailable));
    assert!(matches!(unavailable, KeyVaultError::ServiceUnavailable { .. }));
    assert!(unavailable.is_transient());

    let io = map_azure_error(
        &secret,
        azure_core::Error::new(ErrorKind::Io, "connection refused"),
    );
    assert!(matches!(io, KeyVaultError::ServiceUnavailable { .. }));
}

#[test]
fn test_unexpected_status_is_internal() {
    let error = map_azure_error(&name("QueueName"), http_error(StatusCode::Conflict));

    match error {
        KeyVaultError::Internal { message } => assert!(message.contains("Conflict")),
        other => panic!("Expected Internal, got {:?}", other),
    }
}
