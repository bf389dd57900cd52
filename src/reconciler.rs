//! Batch reconciliation of desired resources against the control plane.
//!
//! This module implements the apply/remove engine: it diffs a declarative
//! batch against remote state (by existence) and performs the minimal set of
//! create/edit/delete calls, isolating failures per resource so one bad
//! declaration never aborts the batch.

use tracing::{debug, info, warn};

use crate::api::{ApiClient, ClientRegistry, ResourceChange};
use crate::config::ResourceBatch;
use crate::error::ApplyError;

/// Result of applying one batch.
///
/// Built incrementally while the batch is processed and returned once; the
/// caller decides what partial failure means (the CLI exits non-zero when
/// `errors` is non-empty).
#[derive(Debug, Default)]
pub struct ApplyResult {
    /// Resources that were created.
    pub created: Vec<ResourceChange>,
    /// Resources that already existed and were edited.
    pub changed: Vec<ResourceChange>,
    /// Resources that were deleted.
    pub removed: Vec<ResourceChange>,
    /// Per-resource failures, in input order.
    pub errors: Vec<ApplyError>,
}

impl ApplyResult {
    /// Returns true if every resource in the batch was processed cleanly.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of resources accounted for in this result.
    #[must_use]
    pub fn total(&self) -> usize {
        self.created.len() + self.changed.len() + self.removed.len() + self.errors.len()
    }
}

impl std::fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Created: {}", self.created.len())?;
        writeln!(f, "Changed: {}", self.changed.len())?;
        writeln!(f, "Removed: {}", self.removed.len())?;

        if !self.errors.is_empty() {
            writeln!(f, "Errors:")?;
            for error in &self.errors {
                writeln!(f, "  - {error}")?;
            }
        }

        Ok(())
    }
}

/// Which result bucket a successful operation lands in.
enum Bucket {
    Created,
    Changed,
    Removed,
}

/// Reconciler for declarative resource batches.
pub struct Reconciler {
    /// Per-kind client registry.
    registry: ClientRegistry,
}

impl Reconciler {
    /// Creates a reconciler over an explicit client registry.
    #[must_use]
    pub const fn new(registry: ClientRegistry) -> Self {
        Self { registry }
    }

    /// Creates a reconciler covering every resource kind on the given API
    /// client.
    #[must_use]
    pub fn from_api(api: &ApiClient) -> Self {
        Self::new(ClientRegistry::for_all_kinds(api))
    }

    /// Applies a batch of desired resources.
    ///
    /// Resources are processed strictly in input order; there is no
    /// cross-resource atomicity. With `is_removal` set, existing resources
    /// are deleted and absent ones are skipped silently; otherwise existing
    /// resources are edited and absent ones created.
    ///
    /// Re-running the same non-removal batch against unchanged remote state
    /// is idempotent: every prior create becomes an edit.
    pub async fn apply(&self, batch: &ResourceBatch, is_removal: bool) -> ApplyResult {
        let mut result = ApplyResult::default();

        for (idx, change) in batch.changes.iter().enumerate() {
            debug!("Processing resource #{} {change}", idx + 1);

            let Some(client) = self.registry.resolve(change.kind()) else {
                warn!("No client registered for kind {}", change.kind());
                result.errors.push(ApplyError::ClientUnavailable {
                    kind: change.kind(),
                    name: change.name().to_string(),
                });
                continue;
            };

            // Existence check; only a 404 means "absent".
            let exists = match client.get(change.name()).await {
                Ok(_) => true,
                Err(e) if e.is_not_found() => false,
                Err(e) => {
                    result.errors.push(ApplyError::StatusCheckFailed {
                        kind: change.kind(),
                        name: change.name().to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let outcome = if is_removal {
                if exists {
                    info!("Removing #{} {change}", idx + 1);
                    client
                        .delete(change.name())
                        .await
                        .map(|_| Some(Bucket::Removed))
                        .map_err(|e| ("delete", e))
                } else {
                    // Removing something already absent is not an error.
                    debug!("Skipping removal of absent resource {change}");
                    Ok(None)
                }
            } else if exists {
                info!("Editing #{} {change}", idx + 1);
                client
                    .edit(change)
                    .await
                    .map(|_| Some(Bucket::Changed))
                    .map_err(|e| ("edit", e))
            } else {
                info!("Creating #{} {change}", idx + 1);
                client
                    .create(change)
                    .await
                    .map(|_| Some(Bucket::Created))
                    .map_err(|e| ("create", e))
            };

            match outcome {
                Ok(Some(Bucket::Created)) => result.created.push(change.clone()),
                Ok(Some(Bucket::Changed)) => result.changed.push(change.clone()),
                Ok(Some(Bucket::Removed)) => result.removed.push(change.clone()),
                Ok(None) => {}
                Err((operation, e)) => {
                    result.errors.push(ApplyError::MutationFailed {
                        operation: operation.to_string(),
                        kind: change.kind(),
                        name: change.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Batch finished: {} created, {} changed, {} removed, {} errors",
            result.created.len(),
            result.changed.len(),
            result.removed.len(),
            result.errors.len()
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockResourceApi, ResourceKind};
    use crate::error::{ApiError, FerroError};
    use std::sync::Arc;

    fn change(kind: ResourceKind, name: &str) -> ResourceChange {
        ResourceChange::new(kind, name, serde_json::json!({"spec": name}))
    }

    fn batch(changes: Vec<ResourceChange>) -> ResourceBatch {
        ResourceBatch { changes }
    }

    fn not_found() -> FerroError {
        FerroError::Api(ApiError::request_failed(404, "not found"))
    }

    /// Mock where `existing` names are present and all mutations succeed.
    fn happy_client(existing: &[&str]) -> MockResourceApi {
        let existing: Vec<String> = existing.iter().map(ToString::to_string).collect();
        let mut mock = MockResourceApi::new();
        mock.expect_get().returning(move |name| {
            if existing.iter().any(|e| e == name) {
                Ok(serde_json::json!({"name": name}))
            } else {
                Err(not_found())
            }
        });
        mock.expect_create().returning(|_| Ok(String::from("created")));
        mock.expect_edit().returning(|_| Ok(String::from("edited")));
        mock.expect_delete().returning(|_| Ok(String::from("deleted")));
        mock
    }

    #[tokio::test]
    async fn test_create_new_and_edit_existing() {
        let registry = ClientRegistry::empty().with_client(
            ResourceKind::Connection,
            Arc::new(happy_client(&["conn-b"])),
        );
        let reconciler = Reconciler::new(registry);

        let input = batch(vec![
            change(ResourceKind::Connection, "conn-a"),
            change(ResourceKind::Connection, "conn-b"),
        ]);
        let result = reconciler.apply(&input, false).await;

        assert_eq!(result.created.len(), 1);
        assert_eq!(result.created[0].name(), "conn-a");
        assert_eq!(result.changed.len(), 1);
        assert_eq!(result.changed[0].name(), "conn-b");
        assert!(result.removed.is_empty());
        assert!(result.errors.is_empty());
        assert_eq!(result.total(), 2);
    }

    #[tokio::test]
    async fn test_second_apply_turns_creates_into_edits() {
        // First apply against empty remote state.
        let registry = ClientRegistry::empty()
            .with_client(ResourceKind::ModelRoute, Arc::new(happy_client(&[])));
        let input = batch(vec![change(ResourceKind::ModelRoute, "alpha")]);
        let first = Reconciler::new(registry).apply(&input, false).await;
        assert_eq!(first.created.len(), 1);

        // Second apply: the resource now exists remotely.
        let registry = ClientRegistry::empty()
            .with_client(ResourceKind::ModelRoute, Arc::new(happy_client(&["alpha"])));
        let second = Reconciler::new(registry).apply(&input, false).await;

        assert!(second.created.is_empty());
        assert_eq!(second.changed.len(), 1);
        assert!(second.errors.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_later_items_processed() {
        let mut mock = MockResourceApi::new();
        mock.expect_get().returning(|_| Err(not_found()));
        mock.expect_create().returning(|change| {
            if change.name() == "bad" {
                Err(FerroError::Api(ApiError::request_failed(409, "conflict")))
            } else {
                Ok(String::from("created"))
            }
        });

        let registry =
            ClientRegistry::empty().with_client(ResourceKind::ModelTraining, Arc::new(mock));
        let reconciler = Reconciler::new(registry);

        let input = batch(vec![
            change(ResourceKind::ModelTraining, "good-one"),
            change(ResourceKind::ModelTraining, "bad"),
            change(ResourceKind::ModelTraining, "good-two"),
        ]);
        let result = reconciler.apply(&input, false).await;

        assert_eq!(result.created.len(), 2);
        assert_eq!(result.created[1].name(), "good-two");
        assert_eq!(result.errors.len(), 1);
        let (kind, name) = result.errors[0].identity();
        assert_eq!(kind, ResourceKind::ModelTraining);
        assert_eq!(name, "bad");
        // Conservation holds with no silent skips.
        assert_eq!(result.total(), 3);
    }

    #[tokio::test]
    async fn test_removal_of_existing_and_absent() {
        let registry = ClientRegistry::empty()
            .with_client(ResourceKind::ModelRoute, Arc::new(happy_client(&["route-x"])));
        let reconciler = Reconciler::new(registry);

        let result = reconciler
            .apply(&batch(vec![change(ResourceKind::ModelRoute, "route-x")]), true)
            .await;
        assert_eq!(result.removed.len(), 1);
        assert!(result.errors.is_empty());

        // Absent resource: every bucket stays empty, no error.
        let result = reconciler
            .apply(&batch(vec![change(ResourceKind::ModelRoute, "route-y")]), true)
            .await;
        assert!(result.removed.is_empty());
        assert!(result.errors.is_empty());
        assert_eq!(result.total(), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_kind_is_per_resource_error() {
        let registry = ClientRegistry::empty()
            .with_client(ResourceKind::Connection, Arc::new(happy_client(&[])));
        let reconciler = Reconciler::new(registry);

        let input = batch(vec![
            change(ResourceKind::ModelPackaging, "no-client"),
            change(ResourceKind::Connection, "conn-a"),
        ]);
        let result = reconciler.apply(&input, false).await;

        assert_eq!(result.errors.len(), 1);
        assert!(matches!(
            result.errors[0],
            ApplyError::ClientUnavailable { .. }
        ));
        // The batch continued past the unresolvable kind.
        assert_eq!(result.created.len(), 1);
    }

    #[tokio::test]
    async fn test_non_404_status_check_failure_moves_on() {
        let mut mock = MockResourceApi::new();
        mock.expect_get()
            .returning(|_| Err(FerroError::Api(ApiError::request_failed(503, "unavailable"))));

        let registry =
            ClientRegistry::empty().with_client(ResourceKind::Connection, Arc::new(mock));
        let result = Reconciler::new(registry)
            .apply(&batch(vec![change(ResourceKind::Connection, "conn-a")]), false)
            .await;

        assert!(matches!(
            result.errors[0],
            ApplyError::StatusCheckFailed { .. }
        ));
        assert!(result.created.is_empty());
    }
}
