//! Conversation core for kru
//!
//! This crate provides:
//! - **Data model**: `Message`, `Conversation`, `SavedConversation`
//! - **Session**: `ChatSession` streams replies into the live conversation
//! - **Collaborator**: `RemoteSession` seam with a `ModelCollaborator` over `llm::ChatModel`
//! - **Storage**: `PersistenceStore` with `MemoryStore` and `FileStore` backends
//!
//! # Example
//!
//! ```ignore
//! use kru_core::{ChatSession, FileStore, ModelCollaborator, PersistenceStore};
//!
//! let store = Arc::new(PersistenceStore::open(FileStore::new(dir)));
//! let session = ChatSession::open(Arc::new(ModelCollaborator::new(model)), store);
//! let mut reply = session.submit("What is a noun?", None).await?;
//! while let Some(fragment) = reply.next().await {
//!     print!("{}", fragment?);
//! }
//! ```
pub mod collaborator;
pub mod conversation;
pub mod error;
pub mod session;
pub mod storage;

pub use collaborator::{
    Attachment, Collaborator, ModelCollaborator, OutgoingMessage, RemoteSession, TextStream,
};
pub use conversation::{Conversation, Message, MessageRole, SavedConversation};
pub use error::{SessionError, StoreError};
pub use session::{ChatSession, ResponseStream};
pub use storage::{FileStore, KeyValueStore, MemoryStore, PersistenceStore, SnapshotId};
