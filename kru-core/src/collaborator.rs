//! The remote side of a conversation
//!
//! A `Collaborator` opens `RemoteSession`s: stateful handles that remember
//! the turns exchanged through them and stream back the model's reply.
//! `ModelCollaborator` implements this over any `llm::ChatModel`.

use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::stream::{self, Stream, StreamExt};
use llm::{ChatMessage, ChatModel, ChatPayload, ChatRequest, ChatStream, LlmError};
use tracing::debug;

use crate::conversation::Message;

/// Stream of reply text fragments, in arrival order
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// A file sent alongside a message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
}

impl Attachment {
    pub fn new(data: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
            file_name: None,
        }
    }

    /// Read a file, guessing its media type from the extension
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self {
            data,
            mime_type,
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

/// One user turn as sent to the collaborator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    pub fn to_payload(&self) -> ChatPayload {
        match &self.attachment {
            Some(attachment) => ChatPayload::with_attachment(
                self.text.clone(),
                attachment.to_base64(),
                attachment.mime_type.clone(),
            ),
            None => ChatPayload::text(self.text.clone()),
        }
    }
}

#[async_trait]
pub trait RemoteSession: Send {
    /// Send one user turn and stream the reply.
    ///
    /// An `Err` return means nothing was accepted. Failures after that arrive
    /// as `Err` items on the stream.
    async fn send(&mut self, message: OutgoingMessage) -> Result<TextStream, LlmError>;
}

pub trait Collaborator: Send + Sync {
    /// Open a remote session that already knows `history`
    fn open_session(&self, history: &[Message]) -> Box<dyn RemoteSession>;
}

/// Collaborator backed by a chat model
pub struct ModelCollaborator {
    model: Arc<dyn ChatModel + Send + Sync>,
    system_instruction: Option<String>,
}

impl ModelCollaborator {
    pub fn new(model: Arc<dyn ChatModel + Send + Sync>) -> Self {
        Self {
            model,
            system_instruction: None,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }
}

impl Collaborator for ModelCollaborator {
    fn open_session(&self, history: &[Message]) -> Box<dyn RemoteSession> {
        let seeded: Vec<ChatMessage> = history
            .iter()
            .filter(|message| !message.text.trim().is_empty())
            .map(ChatMessage::from)
            .collect();
        debug!(model = self.model.name(), seeded = seeded.len(), "opening model session");

        Box::new(ModelSession {
            model: Arc::clone(&self.model),
            system: self
                .system_instruction
                .as_ref()
                .map(|text| ChatMessage::system(ChatPayload::text(text.clone()))),
            history: Arc::new(Mutex::new(seeded)),
        })
    }
}

struct ModelSession {
    model: Arc<dyn ChatModel + Send + Sync>,
    system: Option<ChatMessage>,
    history: Arc<Mutex<Vec<ChatMessage>>>,
}

#[async_trait]
impl RemoteSession for ModelSession {
    async fn send(&mut self, message: OutgoingMessage) -> Result<TextStream, LlmError> {
        let user = ChatMessage::user(message.to_payload());
        let request = {
            let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            ChatRequest::new(
                self.system
                    .iter()
                    .chain(history.iter())
                    .chain(std::iter::once(&user)),
            )
        };

        let chunks = self.model.stream_chat(&request).await?;
        Ok(record_turn(chunks, Arc::clone(&self.history), user))
    }
}

/// Forward reply text and append the exchange to `history` once the reply
/// completes. A failed or abandoned reply leaves `history` untouched.
fn record_turn(
    chunks: ChatStream,
    history: Arc<Mutex<Vec<ChatMessage>>>,
    user: ChatMessage,
) -> TextStream {
    struct Turn {
        chunks: ChatStream,
        history: Arc<Mutex<Vec<ChatMessage>>>,
        user: ChatMessage,
        reply: String,
    }

    let turn = Turn {
        chunks,
        history,
        user,
        reply: String::new(),
    };

    Box::pin(stream::unfold(Some(turn), |turn| async move {
        let mut turn = turn?;
        loop {
            match turn.chunks.next().await {
                Some(Ok(chunk)) => {
                    let text = chunk.get_text();
                    if text.is_empty() {
                        continue;
                    }
                    turn.reply.push_str(&text);
                    return Some((Ok(text), Some(turn)));
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    let mut history = turn.history.lock().unwrap_or_else(PoisonError::into_inner);
                    history.push(turn.user);
                    history.push(ChatMessage::assistant(ChatPayload::text(turn.reply)));
                    return None;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::{ChatChunk, Role};
    use std::collections::VecDeque;

    /// Replays scripted replies and records every request it receives
    struct ScriptedModel {
        replies: Mutex<VecDeque<Vec<Result<&'static str, LlmError>>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Vec<Result<&'static str, LlmError>>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<ChatMessage, LlmError> {
            Err(LlmError::Unknown("not scripted".into()))
        }

        async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Network("no reply scripted".into()))?;
            let chunks = reply
                .into_iter()
                .map(|item| item.map(|text| ChatChunk::assistant(ChatPayload::text(text))));
            Ok(Box::pin(stream::iter(chunks.collect::<Vec<_>>())))
        }
    }

    async fn collect(stream: TextStream) -> Vec<Result<String, LlmError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_seeds_history_and_records_completed_turns() {
        let model = ScriptedModel::new(vec![vec![Ok("Hi"), Ok(""), Ok(" there")], vec![Ok("ok")]]);
        let collaborator = ModelCollaborator::new(model.clone());
        let mut session = collaborator.open_session(&[
            Message::user("earlier"),
            Message::model(""),
            Message::model("reply"),
        ]);

        let fragments = collect(session.send(OutgoingMessage::text("Hello")).await.unwrap()).await;
        assert_eq!(fragments, vec![Ok("Hi".to_string()), Ok(" there".to_string())]);

        collect(session.send(OutgoingMessage::text("Again")).await.unwrap()).await;

        let requests = model.requests();
        // Empty seed messages are skipped
        assert_eq!(requests[0].messages().len(), 3);
        assert_eq!(requests[0].messages()[0].get_text(), "earlier");
        assert_eq!(requests[0].messages()[2].get_text(), "Hello");

        let second = requests[1].messages();
        assert_eq!(second.len(), 5);
        assert_eq!(second[3].role, Role::Assistant);
        assert_eq!(second[3].get_text(), "Hi there");
        assert_eq!(second[4].get_text(), "Again");
    }

    #[tokio::test]
    async fn test_failed_turn_is_not_recorded() {
        let model = ScriptedModel::new(vec![
            vec![Ok("part"), Err(LlmError::Network("reset".into()))],
            vec![Ok("fine")],
        ]);
        let collaborator = ModelCollaborator::new(model.clone());
        let mut session = collaborator.open_session(&[]);

        let items = collect(session.send(OutgoingMessage::text("one")).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());

        collect(session.send(OutgoingMessage::text("two")).await.unwrap()).await;
        let requests = model.requests();
        assert_eq!(requests[1].messages().len(), 1);
        assert_eq!(requests[1].messages()[0].get_text(), "two");
    }

    #[tokio::test]
    async fn test_open_failure_is_returned() {
        let model = ScriptedModel::new(vec![]);
        let collaborator = ModelCollaborator::new(model);
        let mut session = collaborator.open_session(&[]);
        let err = session.send(OutgoingMessage::text("hi")).await.err().unwrap();
        assert_eq!(err.kind(), llm::ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_system_instruction_leads_request() {
        let model = ScriptedModel::new(vec![vec![Ok("ok")]]);
        let collaborator =
            ModelCollaborator::new(model.clone()).with_system_instruction("Be a tutor");
        let mut session = collaborator.open_session(&[Message::user("seed")]);
        collect(session.send(OutgoingMessage::text("hi")).await.unwrap()).await;

        let request = &model.requests()[0];
        assert_eq!(request.messages()[0].role, Role::System);
        assert_eq!(request.messages()[0].get_text(), "Be a tutor");
        assert_eq!(request.messages().len(), 3);
    }

    #[test]
    fn test_attachment_payload() {
        let message = OutgoingMessage {
            text: "What is this?".into(),
            attachment: Some(Attachment::new(b"hello".to_vec(), "image/png")),
        };
        let payload = message.to_payload();
        assert_eq!(payload.get_text(), "What is this?");
        assert_eq!(payload.get_inline_data(), vec![("aGVsbG8=", "image/png")]);
    }

    #[test]
    fn test_attachment_from_path_guesses_mime() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let attachment = Attachment::from_path(&path).unwrap();
        assert_eq!(attachment.mime_type, "application/pdf");
        assert_eq!(attachment.file_name.as_deref(), Some("notes.pdf"));
        assert_eq!(attachment.data, b"%PDF");
    }
}
