//! Key-value store backends.
//!
//! Provides:
//! - `MemoryStore` - process-memory backend (feature: memory)
//! - `FileStore` - JSON-file persistent backend (feature: file)

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "file")]
pub use file::FileStore;
