use crate::client::Client;
use crate::{ChatModel, LlmError, ModelCapability, ModelProvider};
use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use tracing::{debug, warn};

use super::chat::GeminiChatModel;
use super::chat::api::ListModelsResponse;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

const API_VERSION: &str = "v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";
const MAX_MODEL_PAGES: usize = 20;

#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    models_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: &str) -> Result<Self, LlmError> {
        Self::with_base_url(DEFAULT_GEMINI_BASE_URL, api_key)
    }

    /// Provider against a custom base URL (proxy, test server).
    /// The API version path is appended automatically.
    pub fn with_base_url(base_url: &str, api_key: &str) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::Validation("Gemini API key is not set".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut key = HeaderValue::from_str(api_key.trim()).map_err(|_| {
            LlmError::Validation("Gemini API key contains invalid characters".to_string())
        })?;
        key.set_sensitive(true);
        headers.insert(HeaderName::from_static(API_KEY_HEADER), key);

        Ok(GeminiProvider {
            client: Client::with_headers(headers)?,
            models_url: format!("{}/{}/models", base_url.trim_end_matches('/'), API_VERSION),
        })
    }

    /// URL of one page of the model listing
    fn models_page_url(&self, page_token: Option<&str>) -> Result<Url, LlmError> {
        let mut url = Url::parse(&self.models_url)
            .map_err(|e| LlmError::Validation(format!("Invalid Gemini base URL: {}", e)))?;
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }
        Ok(url)
    }

    pub fn chat_model(&self, model_name: &str) -> GeminiChatModel {
        let model_name = model_name.strip_prefix("models/").unwrap_or(model_name);
        GeminiChatModel::new(
            self.client.clone(),
            self.models_url.clone(),
            model_name.to_string(),
        )
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn list_models(&self) -> Result<Vec<crate::ModelDefinition>, LlmError> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        for page in 1..=MAX_MODEL_PAGES {
            let url = self.models_page_url(page_token.as_deref())?;
            let response: ListModelsResponse = self.client.get(url).await?;
            debug!(page, count = response.models.len(), "fetched model page");

            models.extend(
                response
                    .models
                    .into_iter()
                    .map(crate::ModelDefinition::from)
                    .filter(|m| m.has_capability(&ModelCapability::Text)),
            );

            page_token = response.next_page_token.filter(|token| !token.is_empty());
            if page_token.is_none() {
                return Ok(models);
            }
        }

        warn!(pages = MAX_MODEL_PAGES, "model listing truncated");
        Ok(models)
    }

    fn create_chat_model(&self, model_name: &str) -> Option<Arc<dyn ChatModel + Send + Sync>> {
        Some(Arc::new(self.chat_model(model_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_api_key_is_rejected() {
        let err = GeminiProvider::new("  ").err().unwrap();
        assert!(matches!(err, LlmError::Validation(_)));
    }

    #[test]
    fn test_invalid_header_characters_are_rejected() {
        let err = GeminiProvider::new("bad\nkey").err().unwrap();
        assert!(matches!(err, LlmError::Validation(_)));
    }

    #[test]
    fn test_chat_model_strips_models_prefix() {
        let provider = GeminiProvider::with_base_url("http://localhost:1234/", "k").unwrap();
        assert_eq!(provider.chat_model("models/gemini-2.5-flash").name(), "gemini-2.5-flash");
        assert_eq!(provider.models_url, "http://localhost:1234/v1beta/models");
    }

    #[test]
    fn test_models_page_url() {
        let provider = GeminiProvider::with_base_url("http://localhost:1234", "k").unwrap();
        assert_eq!(
            provider.models_page_url(None).unwrap().as_str(),
            "http://localhost:1234/v1beta/models"
        );
        assert_eq!(
            provider.models_page_url(Some("a+b/c=")).unwrap().as_str(),
            "http://localhost:1234/v1beta/models?pageToken=a%2Bb%2Fc%3D"
        );
    }
}
