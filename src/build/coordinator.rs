//! Server half of the asynchronous build protocol.
//!
//! Builds are long-running; callers submit once and poll with the same
//! `build_id`. The coordinator keeps a `build_id -> entry` map so a repeated
//! submit never schedules duplicate work, and runs the actual builds on a
//! semaphore-bounded worker pool. The map has concurrent writers (worker
//! completion) and readers (poll requests) and is therefore mutex-guarded.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Parameters of one image build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildParams {
    /// Name of the model being packaged.
    pub model_name: String,
    /// Version of the model being packaged.
    pub model_version: String,
    /// Tag for the resulting image; the builder derives one if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    /// Whether to push the image to the registry after building.
    #[serde(default)]
    pub push_to_registry: bool,
}

/// Wire body of a build submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    /// Caller-generated idempotency key.
    pub build_id: Uuid,
    /// Build parameters.
    pub params: BuildParams,
}

/// Current outcome of a build, as returned to pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    /// True once the build reached a terminal state.
    pub ready: bool,
    /// Identifier of the built image on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    /// Error text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildResult {
    /// A build that is still running.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            ready: false,
            image_name: None,
            error: None,
        }
    }

    /// A successfully finished build.
    #[must_use]
    pub fn success(image_name: impl Into<String>) -> Self {
        Self {
            ready: true,
            image_name: Some(image_name.into()),
            error: None,
        }
    }

    /// A finished build that failed.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ready: true,
            image_name: None,
            error: Some(error.into()),
        }
    }

    /// Returns true if the build finished without an error.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.ready && self.error.is_none()
    }
}

/// The actual image-building work, pluggable for the worker pool.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Builds an image and returns its identifier.
    async fn build(&self, params: &BuildParams) -> Result<String>;
}

/// State of one submitted build.
#[derive(Debug, Clone)]
enum BuildEntry {
    /// Scheduled or running on the pool.
    Running,
    /// Terminal, with the time it finished (drives eviction).
    Finished {
        result: BuildResult,
        finished_at: DateTime<Utc>,
    },
}

/// Coordinator owning the worker pool and the result map.
pub struct BuildCoordinator {
    builder: Arc<dyn ImageBuilder>,
    entries: Arc<Mutex<HashMap<Uuid, BuildEntry>>>,
    permits: Arc<Semaphore>,
}

impl BuildCoordinator {
    /// Creates a coordinator running at most `max_workers` builds at once.
    #[must_use]
    pub fn new(builder: Arc<dyn ImageBuilder>, max_workers: usize) -> Self {
        Self {
            builder,
            entries: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Submits a build, idempotently.
    ///
    /// The first submit for a `build_id` schedules work and answers
    /// `ready=false`; every further submit with the same id answers the
    /// current state without scheduling anything.
    pub fn submit(&self, build_id: Uuid, params: BuildParams) -> BuildResult {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = entries.get(&build_id) {
            return match entry {
                BuildEntry::Running => {
                    debug!("Build {build_id} still in progress");
                    BuildResult::pending()
                }
                BuildEntry::Finished { result, .. } => {
                    debug!("Build {build_id} already finished");
                    result.clone()
                }
            };
        }

        entries.insert(build_id, BuildEntry::Running);
        drop(entries);

        info!(
            "Scheduling build {build_id} for {}:{}",
            params.model_name, params.model_version
        );

        let builder = Arc::clone(&self.builder);
        let entries = Arc::clone(&self.entries);
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Build pool is shut down, abandoning build {build_id}");
                    return;
                }
            };

            let result = match builder.build(&params).await {
                Ok(image_name) => {
                    info!("Build {build_id} produced image {image_name}");
                    BuildResult::success(image_name)
                }
                Err(e) => {
                    warn!("Build {build_id} failed: {e}");
                    BuildResult::failure(e.to_string())
                }
            };

            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(
                    build_id,
                    BuildEntry::Finished {
                        result,
                        finished_at: Utc::now(),
                    },
                );
        });

        BuildResult::pending()
    }

    /// Removes finished entries older than `ttl`, returning how many were
    /// evicted. Running builds are never evicted.
    ///
    /// Without periodic eviction the map grows for the process lifetime;
    /// callers hosting the coordinator are expected to sweep it.
    pub fn evict_finished(&self, ttl: ChronoDuration) -> usize {
        let cutoff = Utc::now() - ttl;
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let before = entries.len();
        entries.retain(|_, entry| match entry {
            BuildEntry::Running => true,
            BuildEntry::Finished { finished_at, .. } => *finished_at > cutoff,
        });
        let evicted = before - entries.len();

        if evicted > 0 {
            debug!("Evicted {evicted} finished build results");
        }
        evicted
    }

    /// Number of tracked builds (running and finished).
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for BuildCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCoordinator")
            .field("tracked", &self.tracked())
            .finish_non_exhaustive()
    }
}
