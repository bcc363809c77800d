pub mod memory;
pub mod provider;

pub use memory::{MemoryContentStore, MemoryContentStoreError};
pub use provider::{ContentStore, ContentStoreError};
