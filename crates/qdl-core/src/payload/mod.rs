//! Payload handling module.
//!
//! Provides the loader image served during the handshake and chunking
//! for streamed program data.

pub mod chunks;
pub mod loader;

pub use chunks::ChunkState;
pub use loader::{LoaderImage, LoaderImageError, ServedRanges};
