//! Control-plane API access.
//!
//! This module provides the HTTP client for the Ferro control plane and the
//! typed per-collection resource clients built on top of it.

mod client;
mod resource;
mod types;

pub use client::ApiClient;
pub use resource::{ClientRegistry, ResourceApi, ResourceChange, ResourceClient, ResourceKind};
pub use types::{Ack, OperationState, OperationStatus};

#[cfg(test)]
pub use resource::MockResourceApi;
