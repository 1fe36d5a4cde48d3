//! Service-account credentials.
//!
//! The key file is parsed and validated here; exchanging it for an access
//! token is delegated to a [`TokenSource`].

use std::fmt;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::error::{GapiError, Result};
use crate::runtime::Runtime;

/// Environment variable read by [`EnvTokenSource`].
pub const ACCESS_TOKEN_ENV: &str = "GAPI_ACCESS_TOKEN";

/// Fields of a Google service-account JSON key file that we rely on.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("key_type", &self.key_type)
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn parse(contents: &str) -> Result<Self> {
        let key: ServiceAccountKey = serde_json::from_str(contents)
            .map_err(|e| GapiError::Credentials(format!("malformed key file: {}", e)))?;
        if key.key_type != "service_account" {
            return Err(GapiError::Credentials(format!(
                "expected a service_account key, got '{}'",
                key.key_type
            )));
        }
        if key.client_email.is_empty() {
            return Err(GapiError::Credentials(
                "key file has no client_email".to_string(),
            ));
        }
        Ok(key)
    }

    pub fn from_file<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        let contents = runtime.read_to_string(path).map_err(|e| {
            GapiError::Credentials(format!("cannot read key file {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
    }
}

/// Exchanges a service-account identity for a bearer token.
pub trait TokenSource: Send + Sync {
    fn token(&self, key: &ServiceAccountKey, scopes: &[&str], subject: Option<&str>) -> Result<String>;
}

/// Reads a ready-made token from `GAPI_ACCESS_TOKEN`.
pub struct EnvTokenSource<R: Runtime> {
    runtime: R,
}

impl<R: Runtime> EnvTokenSource<R> {
    pub fn new(runtime: R) -> Self {
        Self { runtime }
    }
}

impl<R: Runtime> TokenSource for EnvTokenSource<R> {
    fn token(&self, key: &ServiceAccountKey, _scopes: &[&str], subject: Option<&str>) -> Result<String> {
        let token = self.runtime.env_var(ACCESS_TOKEN_ENV).map_err(|_| {
            GapiError::Credentials(format!(
                "{} is not set (needed for {})",
                ACCESS_TOKEN_ENV, key.client_email
            ))
        })?;
        debug!(
            "Using {} for {}{}",
            ACCESS_TOKEN_ENV,
            key.client_email,
            subject.map(|s| format!(" on behalf of {}", s)).unwrap_or_default()
        );
        Ok(token)
    }
}

/// Hands out the same token every time.
pub struct StaticTokenSource(pub String);

impl TokenSource for StaticTokenSource {
    fn token(&self, _key: &ServiceAccountKey, _scopes: &[&str], _subject: Option<&str>) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// An authorized identity: key, scopes, optional delegated user and token.
#[derive(Clone)]
pub struct Credentials {
    pub key: ServiceAccountKey,
    pub scopes: Vec<String>,
    pub subject: Option<String>,
    access_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_email", &self.key.client_email)
            .field("scopes", &self.scopes)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    #[tracing::instrument(skip(key, source))]
    pub fn authorize(
        key: ServiceAccountKey,
        scopes: &[&str],
        subject: Option<&str>,
        source: &dyn TokenSource,
    ) -> Result<Self> {
        let access_token = source.token(&key, scopes, subject)?;
        if access_token.is_empty() {
            return Err(GapiError::Credentials("empty access token".to_string()));
        }
        Ok(Self {
            key,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            subject: subject.map(str::to_string),
            access_token,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}
