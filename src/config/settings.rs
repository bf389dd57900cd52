//! Connection settings for the control-plane API.
//!
//! Settings come from the environment (optionally seeded from a `.env`
//! file), matching how the platform's other tooling is configured.

use std::path::Path;
use tracing::{debug, info};

use crate::error::{ConfigError, FerroError, Result};

/// Environment variable holding the control-plane base URL.
pub const ENV_API_URL: &str = "FERRO_API_URL";

/// Environment variable holding the API token.
pub const ENV_API_TOKEN: &str = "FERRO_API_TOKEN";

/// Environment variable overriding the request timeout, in seconds.
pub const ENV_REQUEST_TIMEOUT: &str = "FERRO_REQUEST_TIMEOUT";

/// Connection settings for the control plane.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the control-plane API.
    pub api_url: String,
    /// Bearer token for authentication.
    pub token: Option<String>,
    /// Request timeout override in seconds.
    pub request_timeout_secs: Option<u64>,
}

impl Settings {
    /// Creates settings for an explicit endpoint.
    #[must_use]
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: None,
            request_timeout_secs: None,
        }
    }

    /// Sets the API token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Builds settings from the environment.
    ///
    /// Command-line overrides take precedence over environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint is configured.
    pub fn from_env(url_override: Option<&str>, token_override: Option<&str>) -> Result<Self> {
        let api_url = url_override
            .map(String::from)
            .or_else(|| std::env::var(ENV_API_URL).ok())
            .ok_or(FerroError::Config(ConfigError::MissingEnvVar {
                name: String::from(ENV_API_URL),
            }))?;

        let token = token_override
            .map(String::from)
            .or_else(|| std::env::var(ENV_API_TOKEN).ok());

        let request_timeout_secs = std::env::var(ENV_REQUEST_TIMEOUT)
            .ok()
            .and_then(|s| s.parse().ok());

        debug!("Control plane endpoint: {api_url}");
        Ok(Self {
            api_url,
            token,
            request_timeout_secs,
        })
    }
}

/// Loads a `.env` file from the given directory if present.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be loaded.
pub fn load_dotenv(base_dir: &Path) -> Result<()> {
    let env_path = base_dir.join(".env");

    if env_path.exists() {
        info!("Loading environment from: {}", env_path.display());
        dotenvy::from_path(&env_path).map_err(|e| {
            FerroError::Config(ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })
        })?;
    } else {
        debug!(".env file not found at: {}", env_path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_environment() {
        let settings =
            Settings::from_env(Some("http://api.ferro.local"), Some("cli-token")).unwrap();
        assert_eq!(settings.api_url, "http://api.ferro.local");
        assert_eq!(settings.token.as_deref(), Some("cli-token"));
    }

    #[test]
    fn test_builder_style() {
        let settings = Settings::new("http://localhost:5000").with_token("abc");
        assert_eq!(settings.api_url, "http://localhost:5000");
        assert_eq!(settings.token.as_deref(), Some("abc"));
        assert!(settings.request_timeout_secs.is_none());
    }
}
