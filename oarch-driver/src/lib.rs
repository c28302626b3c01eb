pub mod archive_driver;
pub mod errconv;
pub mod volume_driver;
pub mod xattr;

pub use archive_driver::{InMemoryArchiveDriver, MemoryStreamBackend};
pub use volume_driver::LocalVolumeDriver;
