pub mod capabilities;
pub mod command;
pub mod config;

pub use capabilities::{CapabilityProbe, Capabilities, FixedCapabilityProbe, GlusterCapabilityProbe};
pub use config::{ArchiveStoreConfig, DEFAULT_CONFIG_PATH};
