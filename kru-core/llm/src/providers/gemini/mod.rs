pub(crate) mod chat;
mod provider;

pub use chat::GeminiChatModel;
pub use provider::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL, GeminiProvider};
