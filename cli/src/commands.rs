//! Slash command parsing and handling

use std::io::{self, Write};
use std::path::PathBuf;

use kru_core::{Attachment, ChatSession, KeyValueStore, SnapshotId};

pub enum Command {
    Quit,
    Help,
    Clear,
    Reset,
    Attach(PathBuf),
    Save(String),
    List,
    Load(SnapshotId),
    Delete(SnapshotId),
    Export(PathBuf),
}

pub enum CommandResult {
    Continue,
    Exit,
}

/// CLI state that outlives a single command
#[derive(Default)]
pub struct Pending {
    /// Attached file, sent with the next message
    pub attachment: Option<Attachment>,
}

impl Command {
    pub fn parse(input: &str) -> Result<Self, String> {
        let Some(body) = input.strip_prefix('/') else {
            return Err("Not a command".to_string());
        };

        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };

        let required = |usage: &str| {
            if rest.is_empty() {
                Err(format!("Usage: {}", usage))
            } else {
                Ok(rest.to_string())
            }
        };

        match name {
            "quit" | "exit" => Ok(Command::Quit),
            "help" => Ok(Command::Help),
            "clear" => Ok(Command::Clear),
            "reset" => Ok(Command::Reset),
            "attach" => required("/attach <path>").map(|p| Command::Attach(PathBuf::from(p))),
            "save" => required("/save <name>").map(Command::Save),
            "list" => Ok(Command::List),
            "load" => required("/load <id>").map(|id| Command::Load(SnapshotId::from(id))),
            "delete" => required("/delete <id>").map(|id| Command::Delete(SnapshotId::from(id))),
            "export" => required("/export <path>").map(|p| Command::Export(PathBuf::from(p))),
            "" => Err("Empty command".to_string()),
            _ => Err(format!(
                "Unknown command: /{}. Type /help for available commands.",
                name
            )),
        }
    }

    /// Run the command. Follow-up answers (such as the `/load` confirmation)
    /// are read from `lines`, the same source the REPL reads input from.
    pub fn execute<S, L>(
        self,
        session: &ChatSession<S>,
        pending: &mut Pending,
        lines: &mut L,
    ) -> CommandResult
    where
        S: KeyValueStore,
        L: Iterator<Item = io::Result<String>>,
    {
        match self {
            Command::Quit => {
                println!("Goodbye!");
                return CommandResult::Exit;
            }
            Command::Help => print_help(),
            Command::Clear => {
                session.clear();
                pending.attachment = None;
                println!("Conversation cleared.");
            }
            Command::Reset => {
                session.reset();
                println!("Started a fresh model session. History is kept on screen and will be resent.");
            }
            Command::Attach(path) => match Attachment::from_path(&path) {
                Ok(attachment) => {
                    println!(
                        "Attached {} ({}, {} bytes). It will be sent with your next message.",
                        path.display(),
                        attachment.mime_type,
                        attachment.data.len()
                    );
                    pending.attachment = Some(attachment);
                }
                Err(e) => eprintln!("Could not read {}: {}", path.display(), e),
            },
            Command::Save(name) => match session.save_snapshot(&name) {
                Ok(saved) => println!("Saved \"{}\" as {}", saved.name, saved.id),
                Err(e) => eprintln!("Could not save: {}", e),
            },
            Command::List => {
                let saved = session.saved_conversations();
                if saved.is_empty() {
                    println!("No saved conversations.");
                }
                for snapshot in saved {
                    println!(
                        "  {}  {}  {} ({} messages)",
                        snapshot.id,
                        snapshot.created_at.format("%Y-%m-%d %H:%M"),
                        snapshot.name,
                        snapshot.messages.len()
                    );
                }
            }
            Command::Load(id) => {
                if !session.is_empty() && !confirm("Replace the current conversation?", lines) {
                    println!("Load cancelled.");
                } else {
                    match session.load_snapshot(&id) {
                        Ok(()) => {
                            println!("Loaded {} messages.", session.len());
                            print_transcript(session);
                        }
                        Err(e) => eprintln!("Could not load: {}", e),
                    }
                }
            }
            Command::Delete(id) => match session.delete_snapshot(&id) {
                Ok(()) => println!("Deleted {}", id),
                Err(e) => eprintln!("Could not delete: {}", e),
            },
            Command::Export(path) => {
                let markdown = session.conversation().to_markdown();
                match std::fs::write(&path, markdown) {
                    Ok(()) => println!("Exported transcript to {}", path.display()),
                    Err(e) => eprintln!("Could not write {}: {}", path.display(), e),
                }
            }
        }
        println!();
        CommandResult::Continue
    }
}

pub fn print_transcript<S: KeyValueStore>(session: &ChatSession<S>) {
    for message in session.messages() {
        let speaker = if message.is_user() { "You" } else { "Tutor" };
        println!("{}: {}", speaker, message.text);
    }
}

fn confirm<L>(question: &str, lines: &mut L) -> bool
where
    L: Iterator<Item = io::Result<String>>,
{
    print!("{} [y/N] ", question);
    if io::stdout().flush().is_err() {
        return false;
    }
    match lines.next() {
        Some(Ok(answer)) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Some(Err(_)) | None => false,
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  /quit, /exit           - Exit the chat");
    println!("  /clear                 - Clear the conversation");
    println!("  /reset                 - Start a fresh model session, keeping history");
    println!("  /attach <path>         - Attach a file to the next message");
    println!("  /save <name>           - Save the conversation");
    println!("  /list                  - List saved conversations");
    println!("  /load <id>             - Load a saved conversation");
    println!("  /delete <id>           - Delete a saved conversation");
    println!("  /export <path>         - Write the conversation as Markdown");
    println!("  /help                  - Show this help message");
    println!("  Ctrl+C                 - Stop the current reply");
    println!("  Ctrl+D                 - Exit the chat");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert!(matches!(Command::parse("/quit"), Ok(Command::Quit)));
        assert!(matches!(Command::parse("/exit"), Ok(Command::Quit)));
        assert!(matches!(Command::parse("/list"), Ok(Command::List)));
        assert!(
            matches!(Command::parse("/save  Lesson one "), Ok(Command::Save(name)) if name == "Lesson one")
        );
        assert!(
            matches!(Command::parse("/load abc-123"), Ok(Command::Load(id)) if id.as_str() == "abc-123")
        );
        assert!(
            matches!(Command::parse("/attach ./notes.pdf"), Ok(Command::Attach(p)) if p == PathBuf::from("./notes.pdf"))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Command::parse("/save").err().unwrap(), "Usage: /save <name>");
        assert_eq!(Command::parse("/").err().unwrap(), "Empty command");
        assert!(Command::parse("/bogus").err().unwrap().starts_with("Unknown command"));
        assert!(Command::parse("hello").is_err());
    }

    #[test]
    fn test_confirm_reads_answer_from_line_source() {
        use std::io::{BufRead, Cursor};

        let mut lines = Cursor::new("y\n/quit\n").lines();
        assert!(confirm("Replace?", &mut lines));
        // Only the answer is consumed; the next REPL line is still there.
        assert_eq!(lines.next().unwrap().unwrap(), "/quit");

        let mut lines = Cursor::new("  YES \n").lines();
        assert!(confirm("Replace?", &mut lines));
    }

    #[test]
    fn test_confirm_defaults_to_no() {
        use std::io::{BufRead, Cursor};

        for input in ["n\n", "\n", "maybe\n", ""] {
            let mut lines = Cursor::new(input).lines();
            assert!(!confirm("Replace?", &mut lines), "input {:?}", input);
        }

        let mut failing = std::iter::once(Err(io::Error::other("closed")));
        assert!(!confirm("Replace?", &mut failing));
    }
}
