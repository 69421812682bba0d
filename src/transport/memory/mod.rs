mod adapter;

pub use adapter::{create_memory_adapter, MemoryAdapter};
