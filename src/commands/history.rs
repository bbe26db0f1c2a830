use crate::cli::HistoryCommand;
use crate::config::Config;
use crate::error::{MathchatError, Result};
use crate::storage::{Role, Session, SessionStore};
use colored::Colorize;
use prettytable::{format, Table};
use std::io::{BufRead, Write};
use std::path::PathBuf;

const TITLE_COLUMN_CHARS: usize = 40;

/// Handle history commands against the configured store
pub fn handle_history(command: HistoryCommand, config: &Config) -> Result<()> {
    let store = config.storage.open_store()?;
    run_history(command, &store)
}

/// Handle history commands against `store`
pub fn run_history(command: HistoryCommand, store: &SessionStore) -> Result<()> {
    match command {
        HistoryCommand::List => print_sessions(&store.load(), None),
        HistoryCommand::Search { term } => print_sessions(&store.search(&term), Some(&term)),
        HistoryCommand::Show { id } => {
            let session = store
                .get(&id)
                .ok_or_else(|| MathchatError::Storage(format!("No session with id {}", id)))?;
            print_session(&session);
        }
        HistoryCommand::Delete { id } => {
            if store.get(&id).is_none() {
                println!("{}", format!("No session with id {}", id).yellow());
                return Ok(());
            }
            store.delete(&id)?;
            println!("{}", format!("Deleted conversation {}", id).green());
        }
        HistoryCommand::Clear { yes } => {
            let count = store.load().len();
            if !yes && !confirm(&format!("Delete all {} conversations?", count))? {
                println!("{}", "Aborted.".yellow());
                return Ok(());
            }
            store.clear()?;
            println!("{}", format!("Cleared {} conversations", count).green());
        }
        HistoryCommand::Export { output } => {
            let artifact = store.export()?;
            let path = output.unwrap_or_else(|| PathBuf::from(&artifact.file_name));
            std::fs::write(&path, &artifact.bytes).map_err(|e| {
                MathchatError::Storage(format!("Failed to write {}: {}", path.display(), e))
            })?;
            println!(
                "{}",
                format!("Exported history to {}", path.display()).green()
            );
        }
    }

    Ok(())
}

fn print_sessions(sessions: &[Session], term: Option<&str>) {
    if sessions.is_empty() {
        match term {
            Some(term) => println!(
                "{}",
                format!("No conversations match \"{}\".", term).yellow()
            ),
            None => println!("{}", "No conversation history found.".yellow()),
        }
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);

    // Most recently updated first.
    let mut ordered: Vec<&Session> = sessions.iter().collect();
    ordered.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    for session in ordered {
        let updated = session
            .updated_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string();

        table.add_row(prettytable::row![
            session.id.cyan(),
            truncate(&session.title, TITLE_COLUMN_CHARS),
            session.messages.len(),
            updated
        ]);
    }

    println!("\nConversation History:");
    table.printstd();
    println!();
    println!(
        "Use {} to resume a session.",
        "mathchat chat --resume <ID>".cyan()
    );
    println!();
}

fn print_session(session: &Session) {
    println!("\n{} {}", session.title.bold(), format!("({})", session.id).dimmed());
    println!(
        "{}",
        format!(
            "Created {}  Updated {}",
            session.created_at.format("%Y-%m-%d %H:%M"),
            session.updated_at.format("%Y-%m-%d %H:%M")
        )
        .dimmed()
    );

    for message in &session.messages {
        let label = match message.role {
            Role::User => "You".green().bold(),
            Role::Assistant => "Tutor".blue().bold(),
        };
        println!("\n{}:\n{}", label, message.content);
    }
    println!();
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars - 3).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
