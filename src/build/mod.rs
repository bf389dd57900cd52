//! Asynchronous image builds: the submit-once/poll-many protocol.
//!
//! [`coordinator`] is the server half (bounded worker pool plus the
//! idempotent result map); [`client`] is the caller half that generates the
//! build id and polls until the result is available.

mod client;
mod coordinator;

pub use client::BuildClient;
pub use coordinator::{BuildCoordinator, BuildParams, BuildRequest, BuildResult, ImageBuilder};
