pub(crate) mod gemini;

pub use gemini::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL, GeminiChatModel, GeminiProvider};
