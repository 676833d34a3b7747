//! Conversation persistence over a key-value backend

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::ids::SnapshotId;
use super::traits::KeyValueStore;
use crate::StoreError;
use crate::conversation::{Conversation, SavedConversation};

pub const LIVE_CONVERSATION_KEY: &str = "kru.chat-history";
pub const SAVED_CONVERSATIONS_KEY: &str = "kru.saved-chats";
pub const SCHEMA_VERSION_KEY: &str = "kru.schema-version";
pub const SCHEMA_VERSION: u32 = 1;

/// Typed access to the live conversation and the saved snapshot list
///
/// Every mutating operation serializes its full result first and then issues
/// exactly one backend write, so a failed write never leaves a partial value.
/// Unreadable stored values are logged and treated as absent.
#[derive(Debug)]
pub struct PersistenceStore<S: KeyValueStore> {
    backend: S,
}

impl<S: KeyValueStore> PersistenceStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    /// Wrap `backend` and stamp or check its schema version
    pub fn open(backend: S) -> Self {
        let store = Self::new(backend);
        store.migrate();
        store
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn schema_version(&self) -> Option<u32> {
        self.backend
            .get(SCHEMA_VERSION_KEY)
            .ok()
            .flatten()
            .and_then(|raw| raw.trim().parse().ok())
    }

    fn migrate(&self) {
        let stored = match self.backend.get(SCHEMA_VERSION_KEY) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "could not read schema version");
                return;
            }
        };

        match stored.as_deref().map(|raw| raw.trim().parse::<u32>()) {
            Some(Ok(version)) if version == SCHEMA_VERSION => {}
            Some(Ok(version)) if version > SCHEMA_VERSION => {
                warn!(
                    version,
                    supported = SCHEMA_VERSION,
                    "stored data was written by a newer version; reading it as-is"
                );
            }
            other => {
                if let Some(Err(_)) = other {
                    warn!("unreadable schema version, restamping");
                }
                match self
                    .backend
                    .set(SCHEMA_VERSION_KEY, &SCHEMA_VERSION.to_string())
                {
                    Ok(()) => info!(version = SCHEMA_VERSION, "stamped schema version"),
                    Err(e) => warn!(error = %e, "could not stamp schema version"),
                }
            }
        }
    }

    /// Read and decode `key`; backend errors propagate, corrupt data is `None`
    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable stored value");
                Ok(None)
            }
        }
    }

    fn read_saved(&self) -> Result<Vec<SavedConversation>, StoreError> {
        Ok(self
            .read_json(SAVED_CONVERSATIONS_KEY)?
            .unwrap_or_default())
    }

    fn write_saved(&self, saved: &[SavedConversation]) -> Result<(), StoreError> {
        let json = serde_json::to_string(saved)?;
        self.backend.set(SAVED_CONVERSATIONS_KEY, &json)
    }

    /// The persisted live conversation, or an empty one
    pub fn load_live_conversation(&self) -> Conversation {
        match self.read_json(LIVE_CONVERSATION_KEY) {
            Ok(conversation) => conversation.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "could not read live conversation");
                Conversation::new()
            }
        }
    }

    /// Persist the live conversation; an empty one removes the stored entry
    pub fn save_live_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        if conversation.is_empty() {
            return self.backend.remove(LIVE_CONVERSATION_KEY);
        }
        let json = serde_json::to_string(conversation)?;
        self.backend.set(LIVE_CONVERSATION_KEY, &json)
    }

    /// Saved snapshots, newest first
    pub fn list_saved_conversations(&self) -> Vec<SavedConversation> {
        self.read_saved().unwrap_or_else(|e| {
            warn!(error = %e, "could not read saved conversations");
            Vec::new()
        })
    }

    pub fn get_snapshot(&self, id: &SnapshotId) -> Option<SavedConversation> {
        self.list_saved_conversations()
            .into_iter()
            .find(|saved| &saved.id == id)
    }

    /// Save a named copy of `conversation` at the head of the snapshot list
    pub fn save_snapshot(
        &self,
        name: &str,
        conversation: &Conversation,
    ) -> Result<SavedConversation, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::BlankName);
        }
        if conversation.is_empty() {
            return Err(StoreError::EmptyConversation);
        }

        let snapshot = SavedConversation {
            id: SnapshotId::new(),
            name: name.to_string(),
            created_at: Utc::now(),
            messages: conversation.messages().to_vec(),
        };

        let mut saved = self.read_saved()?;
        saved.insert(0, snapshot.clone());
        self.write_saved(&saved)?;

        info!(id = %snapshot.id, name, "saved conversation snapshot");
        Ok(snapshot)
    }

    /// Remove a snapshot; an unknown id is a no-op and writes nothing
    pub fn delete_snapshot(&self, id: &SnapshotId) -> Result<(), StoreError> {
        let mut saved = self.read_saved()?;
        let before = saved.len();
        saved.retain(|snapshot| &snapshot.id != id);
        if saved.len() == before {
            debug!(%id, "no snapshot to delete");
            return Ok(());
        }
        self.write_saved(&saved)?;
        info!(%id, "deleted conversation snapshot");
        Ok(())
    }

    /// Overwrite the live conversation with a snapshot's messages
    pub fn load_snapshot_into_live(&self, id: &SnapshotId) -> Result<Conversation, StoreError> {
        let snapshot = self
            .read_saved()?
            .into_iter()
            .find(|saved| &saved.id == id)
            .ok_or_else(|| StoreError::SnapshotNotFound(id.clone()))?;

        let conversation = snapshot.to_conversation();
        self.save_live_conversation(&conversation)?;
        info!(%id, messages = conversation.len(), "loaded snapshot into live conversation");
        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Message;
    use crate::storage::{FileStore, MemoryStore};
    use std::sync::Arc;

    fn sample() -> Conversation {
        Conversation::from_messages(vec![Message::user("Hi"), Message::model("Hello!")])
    }

    #[test]
    fn test_open_stamps_schema_version() {
        let backend = Arc::new(MemoryStore::new());
        let store = PersistenceStore::open(Arc::clone(&backend));
        assert_eq!(store.schema_version(), Some(SCHEMA_VERSION));
        assert_eq!(backend.get(SCHEMA_VERSION_KEY).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_open_keeps_newer_schema_version() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(SCHEMA_VERSION_KEY, "7").unwrap();
        backend
            .set(LIVE_CONVERSATION_KEY, r#"[{"role":"user","text":"x"}]"#)
            .unwrap();

        let store = PersistenceStore::open(Arc::clone(&backend));
        assert_eq!(store.schema_version(), Some(7));
        assert_eq!(store.load_live_conversation().len(), 1);
    }

    #[test]
    fn test_live_conversation_roundtrip_and_clear() {
        let backend = Arc::new(MemoryStore::new());
        let store = PersistenceStore::new(Arc::clone(&backend));
        assert!(store.load_live_conversation().is_empty());

        store.save_live_conversation(&sample()).unwrap();
        assert_eq!(store.load_live_conversation(), sample());

        store.save_live_conversation(&Conversation::new()).unwrap();
        assert!(!backend.contains_key(LIVE_CONVERSATION_KEY));
    }

    fn multibyte() -> Conversation {
        Conversation::from_messages(vec![
            Message::user("สวัสดีครับ แปลว่าอะไร"),
            Message::model("It means hello 👋 (你好, こんにちは). Nul: \0 end, accents: é ñ ü"),
        ])
    }

    fn assert_multibyte_roundtrip<S: KeyValueStore>(store: &PersistenceStore<S>) {
        store.save_live_conversation(&multibyte()).unwrap();
        assert_eq!(store.load_live_conversation(), multibyte());

        let snapshot = store.save_snapshot("บทเรียน 🌏", &multibyte()).unwrap();
        let found = store.get_snapshot(&snapshot.id).unwrap();
        assert_eq!(found.name, "บทเรียน 🌏");
        assert_eq!(found.to_conversation(), multibyte());
    }

    #[test]
    fn test_multibyte_text_roundtrip_in_memory() {
        assert_multibyte_roundtrip(&PersistenceStore::open(MemoryStore::new()));
    }

    #[test]
    fn test_multibyte_text_roundtrip_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_multibyte_roundtrip(&PersistenceStore::open(FileStore::new(dir.path())));

        let reopened = PersistenceStore::open(FileStore::new(dir.path()));
        assert_eq!(reopened.load_live_conversation(), multibyte());
    }

    #[test]
    fn test_corrupt_values_read_as_empty() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(LIVE_CONVERSATION_KEY, "{not json").unwrap();
        backend.set(SAVED_CONVERSATIONS_KEY, "42").unwrap();

        let store = PersistenceStore::new(Arc::clone(&backend));
        assert!(store.load_live_conversation().is_empty());
        assert!(store.list_saved_conversations().is_empty());
    }

    #[test]
    fn test_save_snapshot_prepends() {
        let store = PersistenceStore::new(MemoryStore::new());
        let first = store.save_snapshot("First", &sample()).unwrap();
        let second = store.save_snapshot("  Second  ", &sample()).unwrap();

        let saved = store.list_saved_conversations();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].id, second.id);
        assert_eq!(saved[0].name, "Second");
        assert_eq!(saved[1].id, first.id);
        assert_eq!(saved[1].messages, sample().into_messages());
    }

    #[test]
    fn test_save_snapshot_validation() {
        let store = PersistenceStore::new(MemoryStore::new());
        assert_eq!(
            store.save_snapshot("   ", &sample()).unwrap_err(),
            StoreError::BlankName
        );
        assert_eq!(
            store.save_snapshot("Empty", &Conversation::new()).unwrap_err(),
            StoreError::EmptyConversation
        );
        assert!(store.list_saved_conversations().is_empty());
    }

    #[test]
    fn test_snapshot_is_independent_of_live_conversation() {
        let store = PersistenceStore::new(MemoryStore::new());
        let mut live = sample();
        let snapshot = store.save_snapshot("Lesson", &live).unwrap();

        live.push(Message::user("more"));
        store.save_live_conversation(&live).unwrap();

        assert_eq!(store.get_snapshot(&snapshot.id).unwrap().messages.len(), 2);
    }

    #[test]
    fn test_delete_unknown_snapshot_writes_nothing() {
        let backend = Arc::new(MemoryStore::new());
        let store = PersistenceStore::new(Arc::clone(&backend));

        store.delete_snapshot(&SnapshotId::from("missing")).unwrap();
        assert!(!backend.contains_key(SAVED_CONVERSATIONS_KEY));

        let kept = store.save_snapshot("Keep", &sample()).unwrap();
        let gone = store.save_snapshot("Drop", &sample()).unwrap();
        let stored = backend.get(SAVED_CONVERSATIONS_KEY).unwrap();

        store.delete_snapshot(&SnapshotId::from("nonexistent-id")).unwrap();
        assert_eq!(store.list_saved_conversations().len(), 2);
        assert_eq!(backend.get(SAVED_CONVERSATIONS_KEY).unwrap(), stored);

        store.delete_snapshot(&gone.id).unwrap();

        let saved = store.list_saved_conversations();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, kept.id);
    }

    #[test]
    fn test_load_snapshot_into_live() {
        let store = PersistenceStore::new(MemoryStore::new());
        let snapshot = store.save_snapshot("Lesson", &sample()).unwrap();
        store
            .save_live_conversation(&Conversation::from_messages(vec![Message::user("other")]))
            .unwrap();

        let loaded = store.load_snapshot_into_live(&snapshot.id).unwrap();
        assert_eq!(loaded, sample());
        assert_eq!(store.load_live_conversation(), sample());

        let missing = SnapshotId::from("missing");
        assert_eq!(
            store.load_snapshot_into_live(&missing).unwrap_err(),
            StoreError::SnapshotNotFound(missing)
        );
    }

    #[test]
    fn test_quota_failure_keeps_previous_snapshots() {
        let store = PersistenceStore::new(MemoryStore::with_quota(400));
        store.save_snapshot("Small", &sample()).unwrap();

        let big = Conversation::from_messages(vec![Message::user("x".repeat(500))]);
        let err = store.save_snapshot("Big", &big).unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));

        let saved = store.list_saved_conversations();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].name, "Small");
    }

    #[test]
    fn test_file_backend_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let store = PersistenceStore::open(FileStore::new(dir.path()));
            store.save_live_conversation(&sample()).unwrap();
            store.save_snapshot("Lesson", &sample()).unwrap();
        }

        let store = PersistenceStore::open(FileStore::new(dir.path()));
        assert_eq!(store.load_live_conversation(), sample());
        assert_eq!(store.list_saved_conversations()[0].name, "Lesson");
        assert_eq!(store.schema_version(), Some(SCHEMA_VERSION));
    }
}
