//! OpenArchive I/O pipeline core.
//!
//! This crate is a thin umbrella re-exporting the public surface of the
//! workspace member crates, the same way the teacher's root crate sits
//! above its `pbs-*` members.

pub use oarch_config as config;
pub use oarch_driver as driver;
pub use oarch_iopx as iopx;
pub use oarch_types as types;
