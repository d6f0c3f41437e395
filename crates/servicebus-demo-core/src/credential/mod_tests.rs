//! Tests for shared credential types.

use super::*;

#[test]
fn test_credential_debug_is_redacted() {
    let credential = Credential::new("eyJ0eXAi.secret", Utc::now());
    let debug_output = format!("{:?}", credential);

    assert!(!debug_output.contains("eyJ0eXAi"));
    assert!(debug_output.contains("[REDACTED]"));
}

#[test]
fn test_credential_exposes_token_and_expiry() {
    let expires_on = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let credential = Credential::new("abc", expires_on);

    assert_eq!(credential.token(), "abc");
    assert_eq!(credential.expires_on(), expires_on);
}

#[test]
fn test_error_messages_name_the_source() {
    let error = CredentialError::Unavailable {
        credential: "azure_identity",
        message: "no identity".to_string(),
    };

    assert_eq!(error.to_string(), "azure_identity is unavailable: no identity");
}
