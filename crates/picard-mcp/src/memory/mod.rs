//! Memory Store and Query Engine.

pub mod query;
pub mod service;
pub mod store;

pub use query::{QueryEngine, cosine_similarity};
pub use service::MemoryService;
pub use store::{InMemoryMemoryStore, MemoryRepository, RecordQuery};
