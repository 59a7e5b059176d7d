//! Backend endpoint configuration.
//!
//! The orchestration layer needs exactly two values to reach the hosted
//! backend: an absolute base URL and an API key. They normally come from
//! the process environment; explicit construction exists for tests and
//! multi-tenant embedding.

use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Environment variable holding the backend base URL.
pub const ENV_BASE_URL: &str = "WELLSPRING_URL";

/// Environment variable holding the backend API key.
pub const ENV_API_KEY: &str = "WELLSPRING_ANON_KEY";

/// Connection settings for the hosted backend.
///
/// Values are carried unvalidated; [`BackendConfig::validate`] runs when a
/// client handle is constructed, so a misconfigured process fails at the
/// first `get_client` call rather than at startup.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    base_url: String,
    api_key: String,
}

impl BackendConfig {
    /// Create a configuration from explicit values.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Read configuration from the process environment.
    ///
    /// Fails with [`RequestError::Configuration`] when either variable is
    /// absent. Value validation is still deferred to [`Self::validate`].
    pub fn from_env() -> Result<Self, RequestError> {
        let base_url = env::var(ENV_BASE_URL)
            .map_err(|_| RequestError::configuration(ENV_BASE_URL, "environment variable not set"))?;
        let api_key = env::var(ENV_API_KEY)
            .map_err(|_| RequestError::configuration(ENV_API_KEY, "environment variable not set"))?;
        Ok(Self::new(base_url, api_key))
    }

    /// Check that both values are present and the URL is absolute.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.api_key.trim().is_empty() {
            return Err(RequestError::configuration("api_key", "must not be empty"));
        }
        validate_base_url(&self.base_url)
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The backend API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

// Keep the API key out of logs and panics.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Require an absolute `http://` or `https://` URL with a non-empty host.
fn validate_base_url(url: &str) -> Result<(), RequestError> {
    if url.trim().is_empty() {
        return Err(RequestError::configuration("base_url", "must not be empty"));
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            RequestError::configuration(
                "base_url",
                format!("not an absolute http(s) URL: {url}"),
            )
        })?;

    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(RequestError::configuration(
            "base_url",
            format!("missing host: {url}"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn accepts_absolute_urls() {
        let config = BackendConfig::new("https://project.wellspring.dev", "anon-key");
        assert!(config.validate().is_ok());

        let config = BackendConfig::new("http://localhost:54321/rest/v1", "anon-key");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_relative_or_empty_urls() {
        for url in ["", "   ", "project.wellspring.dev", "ftp://host", "https://"] {
            let config = BackendConfig::new(url, "anon-key");
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, RequestError::Configuration { ref field, .. } if field == "base_url"),
                "expected configuration error for {url:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn rejects_empty_api_key() {
        let config = BackendConfig::new("https://project.wellspring.dev", "  ");
        assert!(matches!(
            config.validate().unwrap_err(),
            RequestError::Configuration { ref field, .. } if field == "api_key"
        ));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = BackendConfig::new("https://project.wellspring.dev", "secret-key");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    #[serial]
    fn from_env_requires_both_variables() {
        env::remove_var(ENV_BASE_URL);
        env::remove_var(ENV_API_KEY);
        assert!(matches!(
            BackendConfig::from_env().unwrap_err(),
            RequestError::Configuration { ref field, .. } if field == ENV_BASE_URL
        ));

        env::set_var(ENV_BASE_URL, "https://project.wellspring.dev");
        assert!(matches!(
            BackendConfig::from_env().unwrap_err(),
            RequestError::Configuration { ref field, .. } if field == ENV_API_KEY
        ));

        env::set_var(ENV_API_KEY, "anon-key");
        let config = BackendConfig::from_env().unwrap();
        assert_eq!(config.base_url(), "https://project.wellspring.dev");

        env::remove_var(ENV_BASE_URL);
        env::remove_var(ENV_API_KEY);
    }
}
