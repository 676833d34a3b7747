//! Traffic logging for model API calls
//!
//! Appends request/response summaries to kru.log. Content is truncated so
//! chat text and attachments do not end up in logs verbatim.

use config::PathManager;
use std::io::Write;

const MAX_CONTENT_LOG_CHARS: usize = 200;

fn truncate_for_log(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}... ({} chars total)", truncated, char_count)
    }
}

fn summarize(value: &impl serde::Serialize) -> String {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "<serialization error>".to_string());
    truncate_for_log(&json, MAX_CONTENT_LOG_CHARS)
}

pub fn log_request(model: &str, request: &impl serde::Serialize) {
    log_traffic("REQUEST", &format!("[{}] {}", model, summarize(request)));
}

pub fn log_response(model: &str, response: &impl serde::Serialize) {
    log_traffic("RESPONSE", &format!("[{}] {}", model, summarize(response)));
}

pub fn log_error(model: &str, error: &str) {
    log_traffic("ERROR", &format!("[{}] {}", model, error));
}

pub fn log_stream_start(model: &str, request: &impl serde::Serialize) {
    log_traffic("STREAM_START", &format!("[{}] {}", model, summarize(request)));
}

fn log_traffic(event_type: &str, message: &str) {
    tracing::trace!(target: "kru::traffic", event_type, "{}", message);

    let Some(log_path) = PathManager::log_file_path() else {
        return;
    };
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] [TRAFFIC] [LLM] [{}] {}", timestamp, event_type, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let thai = "ก".repeat(10);
        assert_eq!(truncate_for_log(&thai, 10), thai);
        assert_eq!(truncate_for_log(&thai, 3), "กกก... (10 chars total)");
    }
}
