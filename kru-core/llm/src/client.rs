use futures::stream::Stream;
use futures::{
    StreamExt,
    stream::{self},
};
use reqwest::header::HeaderMap;
use serde::{Serialize, de::DeserializeOwned};
use std::{fmt::Debug, pin::Pin};
use tracing::{Level, event, instrument};

use crate::LlmError;

#[derive(Clone)]
pub struct Client {
    client: reqwest::Client,
}

pub type BoxedStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Splits a byte stream into complete `\n`-terminated lines.
///
/// Bytes are buffered undecoded so multi-byte UTF-8 sequences split across
/// network chunks are reassembled before decoding.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.pending[start..end]);
            lines.push(line.trim_end_matches('\r').to_string());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }
}

impl Client {
    pub fn new() -> Self {
        Client {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_headers(headers: HeaderMap) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| LlmError::Validation(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Client { client })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        event!(Level::DEBUG, status = status.as_u16(), body = %body, "request failed");
        Err(LlmError::from_status(status.as_u16(), &body))
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn get<U, T>(&self, url: U) -> Result<T, LlmError>
    where
        U: reqwest::IntoUrl + Debug,
        T: DeserializeOwned,
    {
        let response = Self::check(self.client.get(url).send().await?).await?;
        let text = response.text().await?;
        event!(Level::TRACE, response = text);

        Ok(serde_json::from_str::<T>(&text)?)
    }

    #[instrument(level = "trace", skip(self, request))]
    pub async fn post<U, S, T>(&self, url: U, request: &S) -> Result<T, LlmError>
    where
        U: reqwest::IntoUrl + Debug,
        S: Serialize + Sized,
        T: DeserializeOwned,
    {
        let response = Self::check(self.client.post(url).json(request).send().await?).await?;
        let text = response.text().await?;
        event!(Level::TRACE, response = text);

        Ok(serde_json::from_str::<T>(&text)?)
    }

    /// POST and decode a line-delimited event stream.
    ///
    /// `process` selects the payload of each line (e.g. strips `data: `) and
    /// returns None for lines to skip. Transport errors and undecodable
    /// payloads are yielded as `Err` items in stream order.
    #[instrument(level = "trace", skip(self, request, process))]
    pub async fn post_stream<U, S, F, T>(
        &self,
        url: U,
        request: &S,
        process: F,
    ) -> Result<BoxedStream<Result<T, LlmError>>, LlmError>
    where
        U: reqwest::IntoUrl + Debug,
        S: Serialize + Sized,
        T: DeserializeOwned + Send + 'static,
        F: Fn(&str) -> Option<&str> + 'static + Send,
    {
        let response = Self::check(self.client.post(url).json(request).send().await?).await?;

        let buffered_stream = response
            .bytes_stream()
            .scan(LineBuffer::default(), move |buffer, chunk| {
                let items: Vec<Result<T, LlmError>> = match chunk {
                    Ok(bytes) => buffer
                        .push(&bytes)
                        .iter()
                        .filter_map(|line| process(line))
                        .filter(|payload| !payload.trim().is_empty())
                        .map(|payload| serde_json::from_str::<T>(payload).map_err(LlmError::from))
                        .collect(),
                    Err(e) => {
                        event!(Level::WARN, error = %e, "error reading stream chunk");
                        vec![Err(LlmError::Network(e.to_string()))]
                    }
                };
                futures::future::ready(Some(items))
            });

        Ok(Box::pin(buffered_stream.flat_map(stream::iter)))
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_lines() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(b"data: {\"id\":1}\ndata: {\"id\":2}\n");
        assert_eq!(lines, vec!["data: {\"id\":1}", "data: {\"id\":2}"]);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: {\"id\":1,\"te").is_empty());
        let lines = buffer.push(b"xt\":\"hello\"}\ndata: {\"id\":2");
        assert_eq!(lines, vec!["data: {\"id\":1,\"text\":\"hello\"}"]);
        let lines = buffer.push(b",\"text\":\"world\"}\n");
        assert_eq!(lines, vec!["data: {\"id\":2,\"text\":\"world\"}"]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        // "สวัสดี" in UTF-8, split in the middle of the first character
        let text = "data: สวัสดี\n".as_bytes();
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(&text[..7]).is_empty());
        let lines = buffer.push(&text[7..]);
        assert_eq!(lines, vec!["data: สวัสดี"]);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(b"data: a\r\n\r\ndata: b\n");
        assert_eq!(lines, vec!["data: a", "", "data: b"]);
    }
}
