use super::api::{GenerateContentRequest, GenerateContentResponse};
use crate::client::Client;
use crate::traffic_log;
use crate::{ChatMessage, ChatModel, ChatRequest, ChatStream, LlmError};
use async_trait::async_trait;
use futures::StreamExt;

pub struct GeminiChatModel {
    client: Client,
    base_url: String,
    model_name: String,
}

impl GeminiChatModel {
    pub fn new(client: Client, base_url: String, model_name: String) -> Self {
        GeminiChatModel {
            client,
            base_url,
            model_name,
        }
    }
}

#[async_trait]
impl ChatModel for GeminiChatModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model_name);

        let api_request = GenerateContentRequest::from(request);
        traffic_log::log_request(&self.model_name, &api_request);

        let result = self
            .client
            .post::<_, _, GenerateContentResponse>(url, &api_request)
            .await
            .and_then(|response| {
                traffic_log::log_response(&self.model_name, &response);
                response.into_chunk().map(ChatMessage::from)
            });

        if let Err(e) = &result {
            traffic_log::log_error(&self.model_name, &e.to_string());
        }
        result
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream, LlmError> {
        let url = format!(
            "{}/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model_name
        );

        let api_request = GenerateContentRequest::from(request);
        traffic_log::log_stream_start(&self.model_name, &api_request);

        let streamed_response = self
            .client
            .post_stream(url, &api_request, |line: &str| line.strip_prefix("data:").map(str::trim_start))
            .await
            .inspect_err(|e| traffic_log::log_error(&self.model_name, &e.to_string()))?;

        let model_name = self.model_name.clone();
        Ok(Box::pin(streamed_response.map(move |event| {
            event
                .and_then(GenerateContentResponse::into_chunk)
                .inspect_err(|e| traffic_log::log_error(&model_name, &e.to_string()))
        })))
    }
}
