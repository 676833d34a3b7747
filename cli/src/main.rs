mod commands;
mod logging;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap_derive::Parser;
use config::{GEMINI_API_KEY_ENV, PathManager, Settings, load_env_file};
use futures::StreamExt;
use kru_core::{
    Attachment, ChatSession, FileStore, KeyValueStore, MemoryStore, ModelCollaborator,
    PersistenceStore, SessionError,
};
use llm::providers::DEFAULT_GEMINI_BASE_URL;
use llm::{ChatModel, DEFAULT_GEMINI_MODEL, ErrorKind, GeminiProvider, ModelProvider};
use tracing::{info, warn};

use commands::{Command, CommandResult, Pending};

#[derive(Parser, Debug)]
#[command(name = "kru", author, version, about = "Terminal tutor chat backed by Gemini", long_about = None)]
struct Args {
    /// Gemini model name
    #[arg(long, env = "KRU_MODEL")]
    model: Option<String>,

    /// Custom base URL for the Gemini API (e.g., for proxy)
    #[arg(long, env = "GEMINI_BASE_URL")]
    gemini_url: Option<String>,

    /// System instruction sent with every turn
    #[arg(long)]
    system: Option<String>,

    /// Directory for conversations, settings and logs
    #[arg(long, env = "KRU_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Keep conversations in memory only
    #[arg(long)]
    in_memory: bool,

    /// Mirror logs to stderr
    #[arg(long, short)]
    tracing: bool,

    /// Store an API key, encrypted, in the settings file
    #[arg(long, value_name = "KEY")]
    save_api_key: Option<String>,

    /// Print the text models available to this API key and exit
    #[arg(long)]
    list_models: bool,
}

fn open_backend(in_memory: bool) -> anyhow::Result<Box<dyn KeyValueStore>> {
    if in_memory {
        info!("using in-memory storage");
        return Ok(Box::new(MemoryStore::new()));
    }

    let store = FileStore::open_default().context("Could not determine a data directory")?;
    match store.cleanup_temp_files() {
        Ok(0) => {}
        Ok(cleaned) => info!(cleaned, "removed interrupted writes"),
        Err(e) => warn!(error = %e, "could not clean up temp files"),
    }
    info!(root = ?store.root(), "using file storage");
    Ok(Box::new(store))
}

fn describe(error: &SessionError) -> String {
    let SessionError::Collaborator(e) = error else {
        return error.to_string();
    };
    match e.kind() {
        ErrorKind::Quota => {
            "The tutor is busy or the quota is used up. Wait a moment and try again.".to_string()
        }
        ErrorKind::ContentPolicy => {
            "That request or its answer was blocked by the safety filters.".to_string()
        }
        ErrorKind::Network => format!("Could not reach the tutor: {}", e.message()),
        ErrorKind::Validation => format!("The request was rejected: {}", e.message()),
        ErrorKind::Unknown => format!("Something went wrong: {}", e.message()),
    }
}

/// Send one turn and print the reply as it streams. Ctrl+C stops the reply.
async fn chat_streaming<S: KeyValueStore>(
    session: &ChatSession<S>,
    text: &str,
    attachment: Option<Attachment>,
) -> Result<(), SessionError> {
    let mut reply = tokio::select! {
        reply = session.submit(text, attachment) => reply?,
        _ = tokio::signal::ctrl_c() => return Err(SessionError::Cancelled),
    };

    let mut stdout = io::stdout();
    loop {
        tokio::select! {
            fragment = reply.next() => match fragment {
                Some(Ok(fragment)) => {
                    print!("{}", fragment);
                    let _ = stdout.flush();
                }
                Some(Err(e)) => {
                    println!();
                    return Err(e);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                reply.cancel();
                print!(" [stopped]");
            }
        }
    }
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_file();
    let args = Args::parse();

    if let Some(dir) = &args.data_dir {
        PathManager::set_data_dir(dir.clone());
    }
    logging::init_logging(args.tracing);
    if let Err(e) = PathManager::ensure_dirs_exist() {
        warn!(error = %e, "could not create data directories");
    }

    let mut settings = Settings::load();
    if let Some(key) = &args.save_api_key {
        settings.set_api_key(key)?;
        settings.save()?;
        println!("API key saved.");
    }
    let api_key = settings.resolve_api_key().with_context(|| {
        format!(
            "No Gemini API key found. Set {} or run with --save-api-key <KEY>.",
            GEMINI_API_KEY_ENV
        )
    })?;

    let base_url = args
        .gemini_url
        .or_else(|| settings.gemini_base_url.clone())
        .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string());
    let model_name = args
        .model
        .or_else(|| settings.default_model.clone())
        .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());

    let provider = GeminiProvider::with_base_url(&base_url, &api_key)?;
    if args.list_models {
        for model in provider.list_models().await? {
            println!("{:<40} {}", model.id, model.name());
        }
        return Ok(());
    }

    let model: Arc<dyn ChatModel + Send + Sync> = Arc::new(provider.chat_model(&model_name));
    let mut collaborator = ModelCollaborator::new(model);
    if let Some(instruction) = args.system.or_else(|| settings.system_instruction.clone()) {
        collaborator = collaborator.with_system_instruction(instruction);
    }
    info!(model = collaborator.model_name(), base_url = %base_url, "starting chat");

    let store = Arc::new(PersistenceStore::open(open_backend(args.in_memory)?));
    let session = ChatSession::open(Arc::new(collaborator), store);

    println!();
    println!("kru • {}", model_name);
    println!("Type /help for commands, Ctrl+D or /quit to exit.");
    println!();
    if !session.is_empty() {
        commands::print_transcript(&session);
        println!();
    }

    let mut pending = Pending::default();
    let mut lines = io::stdin().lines();

    loop {
        if pending.attachment.is_some() {
            print!("[+file] ");
        }
        print!("> ");
        io::stdout().flush()?;

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
            None => {
                println!();
                println!("Goodbye!");
                break;
            }
        };

        let input = line.trim();

        if input.starts_with('/') {
            match Command::parse(input) {
                Ok(cmd) => match cmd.execute(&session, &mut pending, &mut lines) {
                    CommandResult::Exit => break,
                    CommandResult::Continue => continue,
                },
                Err(err) => {
                    println!("{}", err);
                    println!();
                    continue;
                }
            }
        }

        if input.is_empty() && pending.attachment.is_none() {
            continue;
        }

        let attachment = pending.attachment.take();
        if let Err(e) = chat_streaming(&session, &line, attachment).await {
            eprintln!("{}", describe(&e));
        }
        if let Some(e) = session.take_persistence_error() {
            eprintln!("Warning: the conversation could not be saved ({}).", e);
        }

        println!();
    }

    info!(messages = session.len(), "chat ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::LlmError;

    #[test]
    fn test_describe_maps_error_kinds() {
        let quota = SessionError::Collaborator(LlmError::Quota("429".into()));
        assert!(describe(&quota).contains("quota"));

        let blocked = SessionError::Collaborator(LlmError::ContentPolicy("SAFETY".into()));
        assert!(describe(&blocked).contains("safety filters"));

        assert_eq!(
            describe(&SessionError::SubmissionInProgress),
            "A response is still streaming"
        );
    }
}
