//! Client half of the asynchronous build protocol.
//!
//! The caller generates the `build_id` exactly once and then resubmits the
//! same request on a fixed interval until the server answers `ready=true`
//! or the retry budget runs out.

use reqwest::Method;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::ApiClient;
use crate::error::{BuildError, FerroError, Result};

use super::coordinator::{BuildParams, BuildRequest, BuildResult};

/// URL path of the build endpoint.
const BUILD_PATH: &str = "/api/v1/build";

/// Default number of poll attempts.
const DEFAULT_RETRIES: u32 = 60;

/// Default interval between polls in seconds.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Client for requesting asynchronous image builds.
#[derive(Debug, Clone)]
pub struct BuildClient {
    api: ApiClient,
    retries: u32,
    poll_interval: Duration,
}

impl BuildClient {
    /// Creates a build client with default polling behavior.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self {
            api,
            retries: DEFAULT_RETRIES,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    /// Sets the number of poll attempts.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the interval between polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Requests a build and blocks until its result is available.
    ///
    /// The idempotency key is generated once here; every poll resubmits the
    /// identical request, so the server runs at most one build for it.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::BuildFailed`] if the build finished with an
    /// error, or [`BuildError::ResultUnavailable`] if the retry budget ran
    /// out before the server reported a terminal result.
    pub async fn request_build(&self, params: BuildParams) -> Result<BuildResult> {
        let build_id = Uuid::new_v4();
        debug!("Requesting build {build_id}");
        self.poll_build(build_id, params).await
    }

    /// Polls an already-submitted build to completion.
    ///
    /// # Errors
    ///
    /// See [`BuildClient::request_build`].
    pub async fn poll_build(&self, build_id: Uuid, params: BuildParams) -> Result<BuildResult> {
        let request = BuildRequest { build_id, params };
        let body = serde_json::to_value(&request)
            .map_err(|e| FerroError::internal(format!("Failed to encode build request: {e}")))?;

        for attempt in 1..=self.retries {
            match self
                .api
                .query::<BuildResult>(Method::PUT, BUILD_PATH, Some(&body))
                .await
            {
                Ok(result) if result.ready => {
                    if let Some(error) = result.error {
                        return Err(FerroError::Build(BuildError::BuildFailed {
                            build_id: build_id.to_string(),
                            message: error,
                        }));
                    }
                    return Ok(result);
                }
                Ok(_) => {
                    debug!("Still waiting to finish build {build_id} (attempt {attempt})");
                }
                Err(e) if matches!(e, FerroError::Api(_)) => {
                    // The builder endpoint may be restarting; keep polling.
                    warn!("Build poll {attempt} for {build_id} failed: {e}");
                }
                Err(e) => return Err(e),
            }

            if attempt < self.retries {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(FerroError::Build(BuildError::ResultUnavailable {
            build_id: build_id.to_string(),
            attempts: self.retries,
        }))
    }
}
