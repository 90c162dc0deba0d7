//! High-level API
//!
//! This module provides the serving side of the bootstrap protocol: a
//! [`Node`] that accepts connections, advertises endpoints and answers
//! PeerSessions, plus its configuration and events.

pub mod config;
pub mod config_file;
pub mod events;
pub mod node;

// Re-export main types for convenience
pub use config::{AdvertisePolicy, NodeConfig, DEFAULT_MAX_CONNECTIONS};
pub use config_file::{config_exists, load_config, save_config, NodeConfigFile};
pub use events::{Event, EventCallback, EventHandlers, SubscriptionHandle};
pub use node::{Node, NodeBuilder, NodeState};
