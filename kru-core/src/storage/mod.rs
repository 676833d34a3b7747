//! Conversation persistence
//!
//! A `PersistenceStore` maps the live conversation, the saved snapshot list
//! and the schema version onto three string keys of a `KeyValueStore`
//! backend. Two backends are provided:
//!
//! - `MemoryStore` - in-process map with an optional byte quota
//! - `FileStore` - one JSON file per key under a data directory

mod fs;
mod ids;
mod memory;
mod store;
mod traits;

pub use fs::FileStore;
pub use ids::SnapshotId;
pub use memory::MemoryStore;
pub use store::{
    LIVE_CONVERSATION_KEY, PersistenceStore, SAVED_CONVERSATIONS_KEY, SCHEMA_VERSION,
    SCHEMA_VERSION_KEY,
};
pub use traits::KeyValueStore;
