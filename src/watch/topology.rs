//! Live enclave topology derived from the service watch stream.
//!
//! An enclave is a named deployment group. Its services carry labels: a
//! `component` label marks a control-plane component (the gateway is the
//! group's existence marker), a model identity label pair marks a model
//! endpoint. This module folds the service watch stream into a
//! `group name -> Enclave` map and emits group-level events.

use reqwest::Method;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::error::Result;

use super::stream::{WatchEvent, WatchEventType, WatchStream, Watcher};

/// Label carrying the owning enclave name.
pub const LABEL_ENCLAVE: &str = "ferro.io/enclave";

/// Label carrying a control-plane component name.
pub const LABEL_COMPONENT: &str = "ferro.io/component";

/// Label carrying a model endpoint's model id.
pub const LABEL_MODEL_ID: &str = "ferro.io/model-id";

/// Label carrying a model endpoint's model version.
pub const LABEL_MODEL_VERSION: &str = "ferro.io/model-version";

/// The component whose service marks enclave existence.
pub const COMPONENT_GATEWAY: &str = "gateway";

/// Collection streamed for topology.
const SERVICE_COLLECTION: &str = "service";

/// A named deployment group and its discovered endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclave {
    /// Enclave name.
    pub name: String,
    /// Control-plane component name to address.
    pub control_plane_endpoints: HashMap<String, String>,
    /// Model key (`id/version`) to address.
    pub model_endpoints: HashMap<String, String>,
}

impl Enclave {
    /// Creates an empty enclave.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl std::fmt::Display for Enclave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} components, {} models)",
            self.name,
            self.control_plane_endpoints.len(),
            self.model_endpoints.len()
        )
    }
}

/// A group-level topology event.
#[derive(Debug, Clone)]
pub struct EnclaveEvent {
    /// What happened to the group.
    pub event_type: WatchEventType,
    /// Snapshot of the group after the change.
    pub enclave: Enclave,
}

/// How a watched service participates in topology.
#[derive(Debug)]
enum ServiceRole {
    /// Control-plane component.
    Component(String),
    /// Model endpoint, keyed by `id/version`.
    Model(String),
}

/// A service document reduced to what topology needs.
#[derive(Debug)]
struct ServiceInfo {
    enclave: String,
    role: ServiceRole,
    address: String,
}

impl ServiceInfo {
    /// Classifies a raw service document; `None` when it carries no
    /// topology-relevant labels.
    fn classify(object: &Value) -> Option<Self> {
        let labels = object.pointer("/metadata/labels")?;
        let enclave = labels.get(LABEL_ENCLAVE)?.as_str()?.to_string();
        let address = object
            .pointer("/spec/address")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if let Some(component) = labels.get(LABEL_COMPONENT).and_then(Value::as_str) {
            return Some(Self {
                enclave,
                role: ServiceRole::Component(component.to_string()),
                address,
            });
        }

        if let Some(model_id) = labels.get(LABEL_MODEL_ID).and_then(Value::as_str) {
            let version = labels
                .get(LABEL_MODEL_VERSION)
                .and_then(Value::as_str)
                .unwrap_or("latest");
            return Some(Self {
                enclave,
                role: ServiceRole::Model(format!("{model_id}/{version}")),
                address,
            });
        }

        None
    }
}

/// Tracker producing group-level events from the service watch.
#[derive(Debug, Clone)]
pub struct TopologyTracker {
    api: ApiClient,
}

impl TopologyTracker {
    /// Creates a tracker over the given API client.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Starts watching groups, optionally restricted to the named ones.
    #[must_use]
    pub fn watch_groups(&self, group_filter: Option<Vec<String>>) -> GroupWatch {
        let allowed: Option<HashSet<String>> = group_filter.map(HashSet::from_iter);
        let selector = allowed.clone();

        let stream = Watcher::new(self.api.clone(), SERVICE_COLLECTION)
            .with_filter(move |object| {
                let Some(group) = object
                    .pointer("/metadata/labels")
                    .and_then(|labels| labels.get(LABEL_ENCLAVE))
                    .and_then(Value::as_str)
                else {
                    return false;
                };
                selector.as_ref().is_none_or(|names| names.contains(group))
            })
            .events::<Value>();

        GroupWatch::over(stream, self.api.clone(), allowed)
    }
}

/// Consumer of group-level topology events.
pub struct GroupWatch {
    stream: WatchStream<Value>,
    api: ApiClient,
    allowed: Option<HashSet<String>>,
    enclaves: HashMap<String, Enclave>,
    /// Model endpoints seen before their group's gateway marker, replayed
    /// once the marker arrives. Keyed per group by model key, so the buffer
    /// is bounded by the number of distinct models.
    pending_models: HashMap<String, HashMap<String, String>>,
    /// Same holding area for non-gateway components.
    pending_components: HashMap<String, HashMap<String, String>>,
    ready: VecDeque<EnclaveEvent>,
}

impl GroupWatch {
    /// Builds a group watch over an already-running service stream.
    pub(crate) fn over(
        stream: WatchStream<Value>,
        api: ApiClient,
        allowed: Option<HashSet<String>>,
    ) -> Self {
        Self {
            stream,
            api,
            allowed,
            enclaves: HashMap::new(),
            pending_models: HashMap::new(),
            pending_components: HashMap::new(),
            ready: VecDeque::new(),
        }
    }

    /// Next group event, or `None` once the underlying watch has ended.
    pub async fn next(&mut self) -> Option<EnclaveEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }

            let event = self.stream.next().await?;
            self.handle(event).await;
        }
    }

    /// Snapshot of a currently-known enclave.
    #[must_use]
    pub fn enclave(&self, name: &str) -> Option<&Enclave> {
        self.enclaves.get(name)
    }

    /// Folds one service event into the topology map.
    async fn handle(&mut self, event: WatchEvent<Value>) {
        let Some(service) = ServiceInfo::classify(&event.object) else {
            debug!("Ignoring service event without topology labels");
            return;
        };

        if let Some(allowed) = &self.allowed
            && !allowed.contains(&service.enclave)
        {
            return;
        }

        match service.role {
            ServiceRole::Component(component) if component == COMPONENT_GATEWAY => {
                self.handle_gateway(event.event_type, &service.enclave, service.address)
                    .await;
            }
            ServiceRole::Component(component) => {
                self.handle_component(
                    event.event_type,
                    &service.enclave,
                    component,
                    service.address,
                );
            }
            ServiceRole::Model(key) => {
                self.handle_model(event.event_type, &service.enclave, key, service.address);
            }
        }
    }

    /// Gateway marker events drive enclave lifecycle.
    async fn handle_gateway(&mut self, event_type: WatchEventType, group: &str, address: String) {
        match event_type {
            WatchEventType::Added if !self.enclaves.contains_key(group) => {
                info!("Discovered enclave '{group}'");
                let mut enclave = Enclave::new(group);
                enclave
                    .control_plane_endpoints
                    .insert(COMPONENT_GATEWAY.to_string(), address);

                // Fill in whatever already exists before the watch caught up.
                match self.list_group_services(group).await {
                    Ok(services) => {
                        for service in services {
                            match service.role {
                                ServiceRole::Component(component) => {
                                    enclave
                                        .control_plane_endpoints
                                        .insert(component, service.address);
                                }
                                ServiceRole::Model(key) => {
                                    enclave.model_endpoints.insert(key, service.address);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Failed to list services of enclave '{group}': {e}");
                    }
                }

                // Replay events that arrived before the marker.
                if let Some(models) = self.pending_models.remove(group) {
                    enclave.model_endpoints.extend(models);
                }
                if let Some(components) = self.pending_components.remove(group) {
                    enclave.control_plane_endpoints.extend(components);
                }

                self.enclaves.insert(group.to_string(), enclave.clone());
                self.emit(WatchEventType::Added, enclave);
            }
            WatchEventType::Added | WatchEventType::Modified => {
                if let Some(enclave) = self.enclaves.get_mut(group) {
                    enclave
                        .control_plane_endpoints
                        .insert(COMPONENT_GATEWAY.to_string(), address);
                    let snapshot = enclave.clone();
                    self.emit(WatchEventType::Modified, snapshot);
                }
            }
            WatchEventType::Deleted => {
                if let Some(enclave) = self.enclaves.remove(group) {
                    info!("Enclave '{group}' went away");
                    self.emit(WatchEventType::Deleted, enclave);
                }
            }
        }
    }

    /// Non-gateway component events modify the owning enclave.
    fn handle_component(
        &mut self,
        event_type: WatchEventType,
        group: &str,
        component: String,
        address: String,
    ) {
        if let Some(enclave) = self.enclaves.get_mut(group) {
            match event_type {
                WatchEventType::Added | WatchEventType::Modified => {
                    enclave.control_plane_endpoints.insert(component, address);
                }
                WatchEventType::Deleted => {
                    enclave.control_plane_endpoints.remove(&component);
                }
            }
            let snapshot = enclave.clone();
            self.emit(WatchEventType::Modified, snapshot);
        } else {
            match event_type {
                WatchEventType::Added | WatchEventType::Modified => {
                    self.pending_components
                        .entry(group.to_string())
                        .or_default()
                        .insert(component, address);
                }
                WatchEventType::Deleted => {
                    if let Some(pending) = self.pending_components.get_mut(group) {
                        pending.remove(&component);
                    }
                }
            }
        }
    }

    /// Model endpoint events modify the owning enclave.
    fn handle_model(
        &mut self,
        event_type: WatchEventType,
        group: &str,
        key: String,
        address: String,
    ) {
        if let Some(enclave) = self.enclaves.get_mut(group) {
            match event_type {
                WatchEventType::Added | WatchEventType::Modified => {
                    enclave.model_endpoints.insert(key, address);
                }
                WatchEventType::Deleted => {
                    enclave.model_endpoints.remove(&key);
                }
            }
            let snapshot = enclave.clone();
            self.emit(WatchEventType::Modified, snapshot);
        } else {
            // The group's marker has not arrived yet; park the endpoint.
            debug!("Buffering model endpoint '{key}' for unknown enclave '{group}'");
            match event_type {
                WatchEventType::Added | WatchEventType::Modified => {
                    self.pending_models
                        .entry(group.to_string())
                        .or_default()
                        .insert(key, address);
                }
                WatchEventType::Deleted => {
                    if let Some(pending) = self.pending_models.get_mut(group) {
                        pending.remove(&key);
                    }
                }
            }
        }
    }

    fn emit(&mut self, event_type: WatchEventType, enclave: Enclave) {
        self.ready.push_back(EnclaveEvent {
            event_type,
            enclave,
        });
    }

    /// Full listing of one group's services, classified.
    async fn list_group_services(&self, group: &str) -> Result<Vec<ServiceInfo>> {
        let path = format!("/api/v1/{SERVICE_COLLECTION}?{LABEL_ENCLAVE}={group}");
        let documents: Vec<Value> = self.api.query(Method::GET, &path, None).await?;

        Ok(documents
            .iter()
            .filter_map(ServiceInfo::classify)
            .filter(|s| s.enclave == group)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> ApiClient {
        let settings = Settings {
            api_url: server.uri(),
            token: None,
            request_timeout_secs: Some(5),
        };
        ApiClient::new(&settings).unwrap()
    }

    fn service(
        name: &str,
        group: &str,
        extra_labels: &[(&str, &str)],
        address: &str,
        version: &str,
    ) -> Value {
        let mut labels = serde_json::json!({ LABEL_ENCLAVE: group });
        for (key, value) in extra_labels {
            labels[*key] = serde_json::json!(value);
        }
        serde_json::json!({
            "metadata": {"name": name, "resourceVersion": version, "labels": labels},
            "spec": {"address": address},
        })
    }

    fn event(event_type: WatchEventType, object: Value) -> WatchEvent<Value> {
        let resource_version = object
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        WatchEvent {
            event_type,
            object,
            resource_version,
        }
    }

    async fn group_watch_with_events(
        server: &MockServer,
        events: Vec<WatchEvent<Value>>,
    ) -> GroupWatch {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for e in events {
            tx.send(e).await.unwrap();
        }
        drop(tx);
        GroupWatch::over(WatchStream::from_receiver(rx), api_for(server), None)
    }

    async fn mount_empty_listing(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/v1/service"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_gateway_added_creates_enclave_from_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/service"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                service("metrics", "team-a", &[(LABEL_COMPONENT, "metrics")], "10.0.0.2:9090", "1"),
                service(
                    "clf-v1",
                    "team-a",
                    &[(LABEL_MODEL_ID, "classifier"), (LABEL_MODEL_VERSION, "1.0")],
                    "10.0.0.3:5000",
                    "2",
                ),
            ])))
            .mount(&server)
            .await;

        let mut watch = group_watch_with_events(
            &server,
            vec![event(
                WatchEventType::Added,
                service("gw", "team-a", &[(LABEL_COMPONENT, "gateway")], "10.0.0.1:80", "3"),
            )],
        )
        .await;

        let added = watch.next().await.unwrap();
        assert_eq!(added.event_type, WatchEventType::Added);
        assert_eq!(added.enclave.name, "team-a");
        assert_eq!(
            added.enclave.control_plane_endpoints.get("gateway"),
            Some(&String::from("10.0.0.1:80"))
        );
        assert_eq!(
            added.enclave.control_plane_endpoints.get("metrics"),
            Some(&String::from("10.0.0.2:9090"))
        );
        assert_eq!(
            added.enclave.model_endpoints.get("classifier/1.0"),
            Some(&String::from("10.0.0.3:5000"))
        );

        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_model_endpoint_updates_emit_modified() {
        let server = MockServer::start().await;
        mount_empty_listing(&server).await;

        let mut watch = group_watch_with_events(
            &server,
            vec![
                event(
                    WatchEventType::Added,
                    service("gw", "team-a", &[(LABEL_COMPONENT, "gateway")], "10.0.0.1:80", "1"),
                ),
                event(
                    WatchEventType::Added,
                    service(
                        "clf-v2",
                        "team-a",
                        &[(LABEL_MODEL_ID, "classifier"), (LABEL_MODEL_VERSION, "2.0")],
                        "10.0.0.4:5000",
                        "2",
                    ),
                ),
                event(
                    WatchEventType::Deleted,
                    service(
                        "clf-v2",
                        "team-a",
                        &[(LABEL_MODEL_ID, "classifier"), (LABEL_MODEL_VERSION, "2.0")],
                        "10.0.0.4:5000",
                        "3",
                    ),
                ),
            ],
        )
        .await;

        let added = watch.next().await.unwrap();
        assert_eq!(added.event_type, WatchEventType::Added);

        let modified = watch.next().await.unwrap();
        assert_eq!(modified.event_type, WatchEventType::Modified);
        assert!(modified.enclave.model_endpoints.contains_key("classifier/2.0"));

        let removed = watch.next().await.unwrap();
        assert_eq!(removed.event_type, WatchEventType::Modified);
        assert!(removed.enclave.model_endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_gateway_deleted_destroys_enclave() {
        let server = MockServer::start().await;
        mount_empty_listing(&server).await;

        let gw = |version: &str| {
            service("gw", "team-a", &[(LABEL_COMPONENT, "gateway")], "10.0.0.1:80", version)
        };
        let mut watch = group_watch_with_events(
            &server,
            vec![
                event(WatchEventType::Added, gw("1")),
                event(WatchEventType::Deleted, gw("2")),
            ],
        )
        .await;

        assert_eq!(watch.next().await.unwrap().event_type, WatchEventType::Added);
        let deleted = watch.next().await.unwrap();
        assert_eq!(deleted.event_type, WatchEventType::Deleted);
        assert!(watch.enclave("team-a").is_none());
    }

    #[tokio::test]
    async fn test_orphan_model_endpoint_is_buffered_until_marker() {
        let server = MockServer::start().await;
        mount_empty_listing(&server).await;

        let mut watch = group_watch_with_events(
            &server,
            vec![
                // Model endpoint arrives before its group's marker.
                event(
                    WatchEventType::Added,
                    service(
                        "early",
                        "team-b",
                        &[(LABEL_MODEL_ID, "ranker"), (LABEL_MODEL_VERSION, "0.1")],
                        "10.0.1.5:5000",
                        "1",
                    ),
                ),
                event(
                    WatchEventType::Added,
                    service("gw", "team-b", &[(LABEL_COMPONENT, "gateway")], "10.0.1.1:80", "2"),
                ),
            ],
        )
        .await;

        // No event is emitted for the orphan; the first emission is the
        // Added carrying the replayed endpoint.
        let added = watch.next().await.unwrap();
        assert_eq!(added.event_type, WatchEventType::Added);
        assert_eq!(
            added.enclave.model_endpoints.get("ranker/0.1"),
            Some(&String::from("10.0.1.5:5000"))
        );
    }
}
