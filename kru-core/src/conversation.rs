//! Conversation data model
//!
//! `Message` and `Conversation` serialize to the same JSON shape the browser
//! client keeps in local storage: `[{"role":"user","text":"..."}, ...]`.

use chrono::{DateTime, Utc};
use llm::{ChatMessage, ChatPayload};
use serde::{Deserialize, Serialize};

use crate::storage::SnapshotId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub text: String,
}

impl Message {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Model, text)
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        let payload = ChatPayload::text(message.text.clone());
        match message.role {
            MessageRole::User => ChatMessage::user(payload),
            MessageRole::Model => ChatMessage::assistant(payload),
        }
    }
}

/// Ordered message history of one chat
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn user_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_user()).count()
    }

    pub(crate) fn message_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.messages.get_mut(index)
    }

    pub(crate) fn remove(&mut self, index: usize) -> Option<Message> {
        (index < self.messages.len()).then(|| self.messages.remove(index))
    }

    /// Render as a Markdown transcript, one `##` section per message.
    pub fn to_markdown(&self) -> String {
        self.messages
            .iter()
            .map(|message| {
                let heading = match message.role {
                    MessageRole::User => "## User",
                    MessageRole::Model => "## AI Model",
                };
                format!("{}\n{}\n", heading, message.text)
            })
            .collect::<Vec<_>>()
            .join("\n---\n\n")
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self::from_messages(messages)
    }
}

/// A named copy of a conversation, independent of the live one
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedConversation {
    pub id: SnapshotId,
    pub name: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl SavedConversation {
    pub fn to_conversation(&self) -> Conversation {
        Conversation::from_messages(self.messages.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_json_shape() {
        let conversation = Conversation::from_messages(vec![
            Message::user("Hello"),
            Message::model("Hi there"),
        ]);
        let json = serde_json::to_string(&conversation).unwrap();
        assert_eq!(
            json,
            r#"[{"role":"user","text":"Hello"},{"role":"model","text":"Hi there"}]"#
        );
    }

    #[test]
    fn test_saved_conversation_uses_created_at_key() {
        let saved = SavedConversation {
            id: SnapshotId::from("abc"),
            name: "Lesson 1".into(),
            created_at: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            messages: vec![Message::user("Hi")],
        };
        let json = serde_json::to_value(&saved).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["createdAt"], "2026-01-02T03:04:05Z");
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_markdown_export() {
        let conversation = Conversation::from_messages(vec![
            Message::user("What is 2+2?"),
            Message::model("4"),
        ]);
        assert_eq!(
            conversation.to_markdown(),
            "## User\nWhat is 2+2?\n\n---\n\n## AI Model\n4\n"
        );
        assert_eq!(Conversation::new().to_markdown(), "");
    }

    #[test]
    fn test_remove_out_of_range_is_none() {
        let mut conversation = Conversation::from_messages(vec![Message::user("a")]);
        assert!(conversation.remove(3).is_none());
        assert_eq!(conversation.remove(0), Some(Message::user("a")));
        assert!(conversation.is_empty());
    }

    #[test]
    fn test_into_chat_message() {
        let chat: ChatMessage = (&Message::model("ok")).into();
        assert_eq!(chat.role, llm::Role::Assistant);
        assert_eq!(chat.get_text(), "ok");
    }
}
