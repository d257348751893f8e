//! Protocol-driven entity discovery.
//!
//! Devices announce themselves with a JSON config payload on a
//! well-known topic layout; this crate parses those announcements into
//! store entities and routes subsequent state and availability
//! messages to them.

pub mod config;
pub mod error;
pub mod processor;
pub mod registry;

pub use config::{Component, DeviceInfo, DiscoveryConfig};
pub use error::{DiscoveryError, DiscoveryResult};
pub use processor::{DiscoveryProcessor, DEFAULT_DISCOVERY_PREFIX};
pub use registry::TopicSubscriptionRegistry;
