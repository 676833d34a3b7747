pub mod crypto;
pub mod paths;
pub mod settings;

pub use paths::PathManager;
pub use settings::Settings;

/// Environment variable holding the Gemini API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Load environment variables from .env files.
/// Reads ./.env (project directory) and then ~/.env (home directory).
/// dotenv never overrides a variable that is already set, so the process
/// environment wins over the project file, which wins over the home file.
/// Call this before parsing CLI args to ensure env vars are available.
pub fn load_env_file() {
    dotenv::dotenv().ok();

    if let Some(home) = dirs::home_dir() {
        dotenv::from_path(home.join(".env")).ok();
    }
}
