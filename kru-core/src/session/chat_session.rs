use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stream::ResponseStream;
use crate::collaborator::{Attachment, Collaborator, OutgoingMessage, RemoteSession};
use crate::conversation::{Conversation, Message, SavedConversation};
use crate::storage::{KeyValueStore, PersistenceStore, SnapshotId};
use crate::{SessionError, StoreError};

type RemoteHandle = Arc<AsyncMutex<Box<dyn RemoteSession>>>;

/// The submission whose reply is currently streaming
struct ActiveSubmission {
    id: u64,
    token: CancellationToken,
    /// Index of the model message receiving fragments
    open_index: usize,
}

struct SessionState {
    conversation: Conversation,
    remote: Option<RemoteHandle>,
    active: Option<ActiveSubmission>,
    next_submission_id: u64,
    persistence_error: Option<StoreError>,
}

impl SessionState {
    fn open_index(&self, id: u64) -> Option<usize> {
        self.active
            .as_ref()
            .filter(|active| active.id == id)
            .map(|active| active.open_index)
    }

    /// Cancel the active submission. Partial reply text is kept; a model
    /// message that received nothing is removed.
    fn release_active(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        active.token.cancel();
        let untouched = self
            .conversation
            .messages()
            .get(active.open_index)
            .is_some_and(|message| message.text.is_empty());
        if untouched {
            self.conversation.remove(active.open_index);
        }
        debug!(submission = active.id, "released active submission");
        true
    }
}

/// State shared between a session and its response streams
pub(crate) struct Shared<S: KeyValueStore> {
    state: Mutex<SessionState>,
    store: Arc<PersistenceStore<S>>,
}

impl<S: KeyValueStore> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &mut SessionState) {
        if let Err(e) = self.store.save_live_conversation(&state.conversation) {
            warn!(error = %e, "failed to persist conversation, continuing in memory");
            state.persistence_error = Some(e);
        }
    }

    /// Append a fragment to submission `id`'s model message.
    ///
    /// Returns false if the submission is no longer active.
    pub(crate) fn append(&self, id: u64, fragment: &str) -> bool {
        let mut state = self.lock();
        let Some(index) = state.open_index(id) else {
            return false;
        };
        if let Some(message) = state.conversation.message_mut(index) {
            message.text.push_str(fragment);
        }
        self.persist(&mut state);
        true
    }

    /// Close submission `id` after its reply completed
    pub(crate) fn complete(&self, id: u64) {
        let mut state = self.lock();
        if state.open_index(id).is_some() {
            state.active = None;
            debug!(submission = id, "reply complete");
        }
    }

    /// Roll back submission `id` after a collaborator failure, dropping its
    /// model message along with any partial text.
    ///
    /// Returns false if the submission had already been superseded.
    pub(crate) fn fail(&self, id: u64) -> bool {
        let mut state = self.lock();
        let Some(index) = state.open_index(id) else {
            return false;
        };
        state.conversation.remove(index);
        state.active = None;
        self.persist(&mut state);
        true
    }

    /// Give up on submission `id` without a collaborator failure
    pub(crate) fn abandon(&self, id: u64) {
        let mut state = self.lock();
        if state.open_index(id).is_some() && state.release_active() {
            self.persist(&mut state);
        }
    }
}

/// Abandons a submission if `submit` is dropped before its reply opens
struct OpeningGuard<'a, S: KeyValueStore> {
    shared: &'a Shared<S>,
    id: u64,
    armed: bool,
}

impl<S: KeyValueStore> Drop for OpeningGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.abandon(self.id);
        }
    }
}

/// A tutoring conversation with a remote collaborator
///
/// All methods take `&self`; a `ResponseStream` stays valid while the
/// session is reset or cleared, it just stops yielding.
pub struct ChatSession<S: KeyValueStore> {
    collaborator: Arc<dyn Collaborator>,
    shared: Arc<Shared<S>>,
}

impl<S: KeyValueStore> ChatSession<S> {
    /// Open a session, restoring the persisted live conversation
    pub fn open(collaborator: Arc<dyn Collaborator>, store: Arc<PersistenceStore<S>>) -> Self {
        let conversation = store.load_live_conversation();
        info!(messages = conversation.len(), "restored live conversation");

        let state = SessionState {
            conversation,
            remote: None,
            active: None,
            next_submission_id: 0,
            persistence_error: None,
        };
        Self {
            collaborator,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                store,
            }),
        }
    }

    pub fn store(&self) -> &Arc<PersistenceStore<S>> {
        &self.shared.store
    }

    pub fn conversation(&self) -> Conversation {
        self.shared.lock().conversation.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock().conversation.messages().to_vec()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().conversation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a reply is streaming
    pub fn is_streaming(&self) -> bool {
        self.shared.lock().active.is_some()
    }

    pub fn has_remote_session(&self) -> bool {
        self.shared.lock().remote.is_some()
    }

    /// The most recent persistence failure, if any, clearing it
    pub fn take_persistence_error(&self) -> Option<StoreError> {
        self.shared.lock().persistence_error.take()
    }

    /// Send a user turn and start streaming the reply.
    ///
    /// The user message and an empty model message are appended before the
    /// collaborator is contacted. If the collaborator rejects the turn the
    /// model message is removed and the user message stays.
    pub async fn submit(
        &self,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<ResponseStream<S>, SessionError> {
        if text.trim().is_empty() && attachment.is_none() {
            return Err(SessionError::EmptySubmission);
        }

        let (id, token, remote) = {
            let mut state = self.shared.lock();
            if state.active.is_some() {
                return Err(SessionError::SubmissionInProgress);
            }

            let remote = match state.remote.clone() {
                Some(remote) => remote,
                None => {
                    let history = state.conversation.messages();
                    debug!(seeded = history.len(), "opening remote session");
                    let remote: RemoteHandle =
                        Arc::new(AsyncMutex::new(self.collaborator.open_session(history)));
                    state.remote = Some(Arc::clone(&remote));
                    remote
                }
            };

            state.conversation.push(Message::user(text));
            state.conversation.push(Message::model(""));

            let id = state.next_submission_id;
            state.next_submission_id += 1;
            let token = CancellationToken::new();
            let open_index = state.conversation.len() - 1;
            state.active = Some(ActiveSubmission {
                id,
                token: token.clone(),
                open_index,
            });
            self.shared.persist(&mut state);
            (id, token, remote)
        };
        let mut guard = OpeningGuard {
            shared: &self.shared,
            id,
            armed: true,
        };

        let trimmed = text.trim();
        let message = OutgoingMessage {
            text: if trimmed.is_empty() { " ".to_string() } else { trimmed.to_string() },
            attachment,
        };
        debug!(submission = id, has_attachment = message.attachment.is_some(), "sending turn");

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SessionError::Cancelled),
            opened = async { remote.lock().await.send(message).await } => opened,
        };

        match opened {
            Ok(fragments) => {
                guard.armed = false;
                Ok(ResponseStream::new(
                    Arc::clone(&self.shared),
                    id,
                    token,
                    fragments,
                ))
            }
            Err(e) => {
                warn!(submission = id, error = %e, "collaborator rejected turn");
                if self.shared.fail(id) {
                    Err(SessionError::Collaborator(e))
                } else {
                    Err(SessionError::Cancelled)
                }
            }
        }
    }

    /// Stop the streaming reply, if any. Returns whether one was active.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.lock();
        let released = state.release_active();
        if released {
            self.shared.persist(&mut state);
        }
        released
    }

    /// Drop the remote session; the next submission opens a fresh one
    /// seeded with the visible history. The history itself is kept.
    pub fn reset(&self) {
        let mut state = self.shared.lock();
        if state.release_active() {
            self.shared.persist(&mut state);
        }
        state.remote = None;
        info!(messages = state.conversation.len(), "remote session reset");
    }

    /// Empty the conversation and drop the remote session
    pub fn clear(&self) {
        let mut state = self.shared.lock();
        state.release_active();
        state.conversation.clear();
        state.remote = None;
        self.shared.persist(&mut state);
        info!("conversation cleared");
    }

    /// Save a named copy of the current conversation
    pub fn save_snapshot(&self, name: &str) -> Result<SavedConversation, SessionError> {
        let conversation = self.conversation();
        Ok(self.shared.store.save_snapshot(name, &conversation)?)
    }

    pub fn saved_conversations(&self) -> Vec<SavedConversation> {
        self.shared.store.list_saved_conversations()
    }

    pub fn delete_snapshot(&self, id: &SnapshotId) -> Result<(), SessionError> {
        Ok(self.shared.store.delete_snapshot(id)?)
    }

    /// Replace the conversation with a saved snapshot and reset the remote
    /// session so the next turn is seeded with the loaded history.
    pub fn load_snapshot(&self, id: &SnapshotId) -> Result<(), SessionError> {
        let mut state = self.shared.lock();
        let conversation = match self.shared.store.load_snapshot_into_live(id) {
            Ok(conversation) => conversation,
            Err(StoreError::SnapshotNotFound(id)) => {
                return Err(StoreError::SnapshotNotFound(id).into());
            }
            Err(e) => {
                // The snapshot may still be readable even if the live write failed
                let Some(snapshot) = self.shared.store.get_snapshot(id) else {
                    return Err(e.into());
                };
                warn!(error = %e, "loaded snapshot without persisting it");
                state.persistence_error = Some(e);
                snapshot.to_conversation()
            }
        };

        state.release_active();
        state.conversation = conversation;
        state.remote = None;
        info!(%id, messages = state.conversation.len(), "snapshot loaded");
        Ok(())
    }
}
