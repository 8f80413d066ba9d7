//! Database credential lookup.
//!
//! The SQL generator resolves its credentials through the [`SecretLookup`]
//! trait so the secret store can be swapped in tests. The live
//! implementation, [`AwsSecretLookup`], reads AWS Secrets Manager and is
//! compiled in with the `aws-secrets` feature.

use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

/// Username used when the secret blob does not carry one.
pub const DEFAULT_DB_USERNAME: &str = "postgres";

/// Errors that can occur while resolving a secret.
#[derive(Debug, Error)]
pub enum SecretError {
    /// Secret not found
    #[error("Secret '{name}' not found")]
    NotFound { name: String },

    /// Provider operation failed
    #[error("Provider '{provider}' operation failed: {message}")]
    ProviderError { provider: String, message: String },

    /// The secret string is not a JSON credential blob.
    #[error("Secret is not a valid credential blob: {0}")]
    Malformed(String),

    /// The blob has no usable password.
    #[error("Secret has no password")]
    MissingPassword,
}

/// Result type for secret operations.
pub type SecretResult<T> = Result<T, SecretError>;

/// Source of raw secret strings.
#[async_trait]
pub trait SecretLookup: Send + Sync {
    /// Fetch the secret string stored under `secret_ref`.
    async fn secret_string(&self, secret_ref: &str) -> SecretResult<String>;
}

/// Username/password pair for the database.
///
/// `Debug` never prints the password.
#[derive(Clone)]
pub struct DatabaseCredentials {
    pub username: String,
    password: SecretString,
}

impl DatabaseCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Expose the password for handing to the driver. Never log it.
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Parse a JSON blob of the form `{"username": "...", "password": "..."}`.
    pub fn from_json(blob: &str) -> SecretResult<Self> {
        #[derive(Deserialize)]
        struct Blob {
            username: Option<String>,
            password: Option<String>,
        }

        let parsed: Blob =
            serde_json::from_str(blob).map_err(|e| SecretError::Malformed(e.to_string()))?;
        let password = parsed
            .password
            .filter(|p| !p.is_empty())
            .ok_or(SecretError::MissingPassword)?;
        let username = parsed
            .username
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_USERNAME.to_string());
        Ok(Self::new(username, password))
    }
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Look up `secret_ref` and parse the result into credentials.
pub async fn resolve_credentials(
    lookup: &dyn SecretLookup,
    secret_ref: &str,
) -> SecretResult<DatabaseCredentials> {
    let blob = lookup.secret_string(secret_ref).await?;
    DatabaseCredentials::from_json(&blob)
}

#[cfg(feature = "aws-secrets")]
pub use aws::AwsSecretLookup;

#[cfg(feature = "aws-secrets")]
mod aws {
    use super::{SecretError, SecretLookup, SecretResult};
    use async_trait::async_trait;
    use tokio::sync::OnceCell;

    /// AWS Secrets Manager backed [`SecretLookup`].
    ///
    /// The SDK client is built on first use.
    pub struct AwsSecretLookup {
        region: Option<String>,
        client: OnceCell<aws_sdk_secretsmanager::Client>,
    }

    impl AwsSecretLookup {
        pub fn new(region: Option<String>) -> Self {
            Self {
                region,
                client: OnceCell::new(),
            }
        }

        async fn client(&self) -> &aws_sdk_secretsmanager::Client {
            self.client
                .get_or_init(|| async {
                    let mut loader =
                        aws_config::defaults(aws_config::BehaviorVersion::latest());
                    if let Some(region) = &self.region {
                        loader = loader.region(aws_config::Region::new(region.clone()));
                    }
                    aws_sdk_secretsmanager::Client::new(&loader.load().await)
                })
                .await
        }
    }

    #[async_trait]
    impl SecretLookup for AwsSecretLookup {
        async fn secret_string(&self, secret_ref: &str) -> SecretResult<String> {
            let output = self
                .client()
                .await
                .get_secret_value()
                .secret_id(secret_ref)
                .send()
                .await
                .map_err(|e| SecretError::ProviderError {
                    provider: "aws".to_string(),
                    message: aws_sdk_secretsmanager::error::DisplayErrorContext(&e).to_string(),
                })?;
            output
                .secret_string()
                .map(str::to_string)
                .ok_or_else(|| SecretError::NotFound {
                    name: secret_ref.to_string(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticLookup(HashMap<String, String>);

    #[async_trait]
    impl SecretLookup for StaticLookup {
        async fn secret_string(&self, secret_ref: &str) -> SecretResult<String> {
            self.0
                .get(secret_ref)
                .cloned()
                .ok_or_else(|| SecretError::NotFound {
                    name: secret_ref.to_string(),
                })
        }
    }

    #[test]
    fn test_from_json_full_blob() {
        let creds = DatabaseCredentials::from_json(r#"{"username":"app","password":"s3cr3t"}"#)
            .unwrap();
        assert_eq!(creds.username, "app");
        assert_eq!(creds.password(), "s3cr3t");
    }

    #[test]
    fn test_from_json_defaults_username() {
        let creds = DatabaseCredentials::from_json(r#"{"password":"pw"}"#).unwrap();
        assert_eq!(creds.username, DEFAULT_DB_USERNAME);
    }

    #[test]
    fn test_from_json_requires_password() {
        let err = DatabaseCredentials::from_json(r#"{"username":"app"}"#).unwrap_err();
        assert!(matches!(err, SecretError::MissingPassword));

        let err = DatabaseCredentials::from_json(r#"{"username":"app","password":""}"#)
            .unwrap_err();
        assert!(matches!(err, SecretError::MissingPassword));
    }

    #[test]
    fn test_from_json_rejects_non_json() {
        let err = DatabaseCredentials::from_json("hunter2").unwrap_err();
        assert!(matches!(err, SecretError::Malformed(_)));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = DatabaseCredentials::new("app", "do-not-print");
        let debug = format!("{creds:?}");
        assert!(debug.contains("app"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("do-not-print"));
    }

    #[tokio::test]
    async fn test_resolve_credentials() {
        let lookup = StaticLookup(HashMap::from([(
            "db-secret".to_string(),
            r#"{"username":"svc","password":"pw"}"#.to_string(),
        )]));

        let creds = resolve_credentials(&lookup, "db-secret").await.unwrap();
        assert_eq!(creds.username, "svc");

        let err = resolve_credentials(&lookup, "other").await.unwrap_err();
        assert!(matches!(err, SecretError::NotFound { .. }));
    }
}
