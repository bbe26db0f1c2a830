//! Special commands parser for interactive chat mode
//!
//! Special commands let the user manage the conversation instead of asking
//! the tutor something:
//! - Start a fresh session
//! - List and reopen stored sessions
//! - Display help information
//! - Exit
//!
//! Commands are prefixed with `/` and are case-insensitive.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Leave the current session and start a new one
    NewSession,

    /// List stored sessions
    History,

    /// Switch to a stored session by id
    Resume(String),

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command; send the input to the tutor
    None,
}

/// Parse a user input string into a special command
///
/// `exit` and `quit` work without the slash.
///
/// # Errors
///
/// Returns `CommandError::UnknownCommand` for unrecognized `/` input and
/// `CommandError::MissingArgument` for `/resume` without an id.
///
/// # Examples
///
/// ```
/// use mathchat::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/NEW").unwrap(), SpecialCommand::NewSession);
/// assert_eq!(
///     parse_special_command("/resume 1700000000000").unwrap(),
///     SpecialCommand::Resume("1700000000000".to_string())
/// );
/// assert_eq!(parse_special_command("what is 2+2").unwrap(), SpecialCommand::None);
/// assert!(parse_special_command("/foo").is_err());
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') && lower != "exit" && lower != "quit" {
        return Ok(SpecialCommand::None);
    }

    match lower.as_str() {
        "/new" => Ok(SpecialCommand::NewSession),
        "/history" | "/sessions" => Ok(SpecialCommand::History),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/exit" | "/quit" | "exit" | "quit" => Ok(SpecialCommand::Exit),
        "/resume" => Err(CommandError::MissingArgument {
            command: "/resume".to_string(),
            usage: "/resume <ID>".to_string(),
        }),
        input if input.starts_with("/resume ") => {
            // Ids keep their original case.
            let id = trimmed["/resume ".len()..].trim();
            Ok(SpecialCommand::Resume(id.to_string()))
        }
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Print the interactive help text
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Chat Mode
===========================================

SESSIONS:
  /new            - Start a new conversation
  /history        - List stored conversations
  /resume <ID>    - Continue a stored conversation

OTHER:
  /help           - Show this help
  /exit, exit     - Leave chat mode

Anything else is sent to the tutor. Replies marked [offline] were produced
locally because the tutoring service could not be reached.
"#
    );
}
