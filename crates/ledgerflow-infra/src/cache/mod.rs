//! Status cache implementations.

pub mod memory;

pub use memory::MemoryStatusCache;
