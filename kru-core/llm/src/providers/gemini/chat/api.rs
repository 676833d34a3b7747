use serde::{Deserialize, Serialize};

use crate::error::{ApiErrorBody, is_policy_reason};
use crate::{ChatChunk, ChatMessage, ChatPayload, ChatRequest, LlmError};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ModelDefinition {
    pub(crate) name: String,

    pub(crate) display_name: Option<String>,

    pub(crate) supported_generation_methods: Option<Vec<String>>,
}

impl From<ModelDefinition> for crate::ModelDefinition {
    fn from(model: ModelDefinition) -> Self {
        let mut capabilities = Vec::new();

        for method in model.supported_generation_methods.iter().flatten() {
            let capability = match method.as_str() {
                "generateContent" => crate::ModelCapability::Text,
                "embedContent" => crate::ModelCapability::Embedding,
                _ => continue,
            };
            if !capabilities.contains(&capability) {
                capabilities.push(capability);
            }
        }

        let id = model
            .name
            .strip_prefix("models/")
            .map(str::to_string)
            .unwrap_or(model.name);

        match model.display_name {
            Some(display_name) => {
                crate::ModelDefinition::with_display_name(id, display_name, capabilities)
            }
            None => crate::ModelDefinition::new(id, capabilities),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListModelsResponse {
    #[serde(default)]
    pub(crate) models: Vec<ModelDefinition>,

    /// Present while more pages remain; empty or absent on the last one
    pub(crate) next_page_token: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// System messages have no Gemini role; they travel in `systemInstruction`.
    fn from_api(role: crate::Role) -> Option<Self> {
        match role {
            crate::Role::User => Some(Role::User),
            crate::Role::Assistant => Some(Role::Model),
            crate::Role::System => None,
        }
    }
}

impl From<Role> for crate::Role {
    fn from(value: Role) -> Self {
        match value {
            Role::User => crate::Role::User,
            Role::Model => crate::Role::Assistant,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    pub(crate) mime_type: String,
    pub(crate) data: String, // base64-encoded
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) inline_data: Option<InlineData>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) thought: Option<bool>,

    #[serde(flatten)]
    pub(crate) extra: serde_json::Map<String, serde_json::Value>,
}

impl Part {
    pub fn new_text(text: impl Into<String>) -> Self {
        Part {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn new_inline(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Part {
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
            ..Default::default()
        }
    }

    /// Thought summaries are not part of the visible answer
    fn into_block(self) -> Option<crate::ContentBlock> {
        if self.thought == Some(true) {
            return None;
        }
        if let Some(text) = self.text {
            return Some(crate::ContentBlock::Text { text });
        }
        self.inline_data
            .map(|inline| crate::ContentBlock::InlineData {
                data: inline.data,
                mime_type: inline.mime_type,
            })
    }
}

impl From<&crate::ContentBlock> for Part {
    fn from(block: &crate::ContentBlock) -> Self {
        match block {
            crate::ContentBlock::Text { text } => Part::new_text(text.clone()),
            crate::ContentBlock::InlineData { data, mime_type } => {
                Part::new_inline(data.clone(), mime_type.clone())
            }
        }
    }
}

// Gemini representation of messages.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) role: Option<Role>,

    #[serde(default)]
    pub(crate) parts: Vec<Part>,
}

impl Content {
    fn into_payload(self) -> ChatPayload {
        ChatPayload::new(self.parts.into_iter().filter_map(Part::into_block).collect())
    }
}

impl From<&ChatMessage> for Option<Content> {
    fn from(msg: &ChatMessage) -> Self {
        Role::from_api(msg.role).map(|role| Content {
            role: Some(role),
            parts: msg.payload.content.iter().map(Part::from).collect(),
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest {
    pub(crate) contents: Vec<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) system_instruction: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) generation_config: Option<serde_json::Value>,
}

impl From<&ChatRequest> for GenerateContentRequest {
    fn from(request: &ChatRequest) -> Self {
        let system_parts: Vec<Part> = request
            .messages
            .iter()
            .filter(|m| m.role == crate::Role::System)
            .flat_map(|m| m.payload.content.iter().map(Part::from))
            .collect();

        let contents = request
            .messages
            .iter()
            .filter_map(Option::<Content>::from)
            .collect();

        GenerateContentRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then(|| Content {
                role: None,
                parts: system_parts,
            }),
            generation_config: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    pub(crate) content: Option<Content>,

    pub(crate) finish_reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    pub(crate) block_reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<Candidate>,

    pub(crate) prompt_feedback: Option<PromptFeedback>,

    /// Present when the stream is cut short by a server-side error
    pub(crate) error: Option<ApiErrorBody>,
}

impl GenerateContentResponse {
    /// Translate one response (or streamed event) into a chunk, surfacing
    /// errors and safety blocks through the shared taxonomy.
    pub(crate) fn into_chunk(self) -> Result<ChatChunk, LlmError> {
        if let Some(error) = self.error {
            return Err(LlmError::from_api_error(error));
        }
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(LlmError::ContentPolicy(format!("Prompt was blocked ({})", reason)));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Ok(ChatChunk::assistant(ChatPayload::default()));
        };
        if let Some(reason) = candidate.finish_reason.as_deref().filter(|r| is_policy_reason(r)) {
            return Err(LlmError::ContentPolicy(format!("Response was blocked ({})", reason)));
        }

        let payload = candidate.content.map(Content::into_payload).unwrap_or_default();
        Ok(ChatChunk::assistant(payload))
    }
}
