//! Watch streams and derived cluster topology.
//!
//! [`stream`] provides the resilient, reconnecting consumption of the
//! control plane's streaming watch endpoint; [`topology`] builds live
//! enclave topology on top of it.

mod stream;
mod topology;

pub use stream::{WatchEvent, WatchEventType, WatchStream, Watcher};
pub use topology::{Enclave, EnclaveEvent, GroupWatch, TopologyTracker};

pub use topology::{
    COMPONENT_GATEWAY, LABEL_COMPONENT, LABEL_ENCLAVE, LABEL_MODEL_ID, LABEL_MODEL_VERSION,
};
