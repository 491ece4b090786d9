pub mod backend;

pub use backend::{MemoryLockBackend, MemoryLockStrategy};
