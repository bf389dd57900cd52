// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![cfg_attr(test, allow(missing_docs))] // Generated test mocks carry no docs

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::redundant_clone)]     // Useless clones warning

// ============================================================================
// Crate Documentation
// ============================================================================

//! # ferroctl
//!
//! A declarative control-plane client for the Ferro ML deployment platform.
//!
//! ## Overview
//!
//! ferroctl keeps a declaratively-specified desired state in sync with the
//! remote orchestration API and bridges synchronous callers with
//! asynchronous, long-running backend operations:
//!
//! - Apply/remove batches of resources with per-item failure isolation
//! - Wait on trainings, route activations and deployments with a bounded
//!   poll loop
//! - Consume the cluster's streaming watch feed across transient network
//!   failures, resuming at the last seen cursor
//! - Derive live enclave topology (components and model endpoints) from
//!   label-tagged services
//! - Speak the idempotent submit-once/poll-many protocol for asynchronous
//!   image builds
//!
//! ## Architecture
//!
//! The remote control plane is the only source of truth. Reconciliation
//! diffs the desired batch against it by existence:
//!
//! 1. **Desired state**: declared in a YAML/JSON resource file
//! 2. **Observed state**: fetched per resource from the control plane
//! 3. **Reconciler**: creates, edits or deletes to converge them
//!
//! ## Modules
//!
//! - [`config`]: settings and resource file parsing
//! - [`api`]: control-plane HTTP client and typed resource collections
//! - [`reconciler`]: batch apply/remove engine
//! - [`wait`]: bounded waiting for remote operations
//! - [`watch`]: resilient watch streams and enclave topology
//! - [`build`]: asynchronous image build protocol
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```yaml
//! kind: ModelTraining
//! name: recognizer-train
//! spec:
//!   toolchain: python
//!   entrypoint: train.py
//! ---
//! kind: ModelDeployment
//! name: recognizer
//! spec:
//!   image: registry.local/recognizer:latest
//!   replicas: 2
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod api;
pub mod build;
pub mod cli;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod wait;
pub mod watch;

// ============================================================================
// Re-exports
// ============================================================================

pub use api::{ApiClient, ClientRegistry, ResourceApi, ResourceChange, ResourceClient, ResourceKind};
pub use build::{BuildClient, BuildCoordinator, BuildParams, BuildResult, ImageBuilder};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{BatchParser, ResourceBatch, Settings};
pub use error::{FerroError, Result};
pub use reconciler::{ApplyResult, Reconciler};
pub use wait::{OperationWaiter, TerminalStates, WaitConfig};
pub use watch::{Enclave, TopologyTracker, WatchEvent, WatchEventType, WatchStream, Watcher};
