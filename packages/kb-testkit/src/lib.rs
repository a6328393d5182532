mod database;
mod error;
mod memory;

pub use database::{TestDatabase, env_dsn, env_qdrant_url};
pub use error::{Error, Result};
pub use memory::{MemoryFileStore, MemoryMetadataStore, MemoryVectorStore};
