/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `chat`    - Interactive tutoring session with live history sync
- `ask`     - One-shot question, nothing persisted
- `check`   - Connection diagnostics for the completion service
- `history` - Store inspection and maintenance

`serve` is handled by [`crate::server::serve`].
*/

use crate::conversation::error_note;
use crate::pipeline::Outcome;
use colored::Colorize;

// History management commands
pub mod history;

// Special commands parser for interactive chat
pub mod special_commands;

/// Print an outcome the way both chat and ask present it
fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Answered { text } => println!("\n{}\n", text),
        Outcome::Fallback { text } => println!("\n{} {}\n", "[offline]".yellow(), text),
        Outcome::Failed { .. } => {
            let note = error_note(outcome).unwrap_or_default();
            eprintln!("\n{}\n", note.red());
        }
    }
}

// Chat command handler
pub mod chat {
    //! Interactive chat mode
    //!
    //! A readline loop over one [`Conversation`], with a [`SyncWatcher`]
    //! announcing history changes made by other processes between turns.

    use super::print_outcome;
    use super::special_commands::{parse_special_command, print_help, SpecialCommand};
    use crate::config::Config;
    use crate::conversation::Conversation;
    use crate::error::{MathchatError, Result};
    use crate::pipeline::RequestPipeline;
    use crate::storage::{IdGenerator, Role, SessionStore};
    use crate::watcher::{SyncEvent, SyncWatcher};
    use colored::Colorize;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;
    use std::sync::Arc;
    use tokio::sync::{broadcast, watch};

    /// Run interactive chat mode
    ///
    /// # Errors
    ///
    /// Returns an error if the store or pipeline cannot be initialized, or
    /// if `resume` names a session that does not exist.
    pub async fn run_chat(config: Config, resume: Option<String>) -> Result<()> {
        let store = config.storage.open_store()?;
        let pipeline = RequestPipeline::from_config(&config.completion)?;
        let ids = Arc::new(IdGenerator::new());
        let greeting = config.chat.greeting.clone();

        let mut conversation = match resume {
            Some(id) => Conversation::resume(ids.clone(), find_session(&store, &id)?),
            None => Conversation::start(ids.clone(), greeting.as_deref()),
        };

        let watcher = SyncWatcher::new(store.clone(), config.sync.clone());
        let mut events = watcher.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher_handle = watcher.start(shutdown_rx)?;

        let mut rl = DefaultEditor::new()?;

        print_welcome_banner();
        print_transcript(&conversation);

        loop {
            apply_sync_events(&mut events, &mut conversation, &ids);

            match rl.readline(&"mathchat> ".cyan().to_string()) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(trimmed);

                    match parse_special_command(trimmed) {
                        Ok(SpecialCommand::Exit) => break,
                        Ok(SpecialCommand::Help) => {
                            print_help();
                            continue;
                        }
                        Ok(SpecialCommand::NewSession) => {
                            conversation = Conversation::start(ids.clone(), greeting.as_deref());
                            println!("{}", "Started a new conversation.".green());
                            print_transcript(&conversation);
                            continue;
                        }
                        Ok(SpecialCommand::History) => {
                            super::history::run_history(
                                crate::cli::HistoryCommand::List,
                                &store,
                            )?;
                            continue;
                        }
                        Ok(SpecialCommand::Resume(id)) => {
                            match find_session(&store, &id) {
                                Ok(session) => {
                                    conversation = Conversation::resume(ids.clone(), session);
                                    print_transcript(&conversation);
                                }
                                Err(e) => eprintln!("{}", e.to_string().red()),
                            }
                            continue;
                        }
                        Ok(SpecialCommand::None) => {}
                        Err(e) => {
                            eprintln!("{}", e.to_string().red());
                            continue;
                        }
                    }

                    match conversation.exchange(&pipeline, &store, trimmed).await {
                        Ok(outcome) => print_outcome(&outcome),
                        Err(e) => eprintln!("{}", format!("Error: {:#}", e).red()),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {:?}", err);
                    break;
                }
            }
        }

        let _ = shutdown_tx.send(true);
        if let Err(e) = watcher_handle.await {
            tracing::warn!("Sync watcher ended abnormally: {}", e);
        }

        println!("Goodbye!");
        Ok(())
    }

    fn find_session(store: &SessionStore, id: &str) -> Result<crate::storage::Session> {
        store
            .get(id)
            .ok_or_else(|| MathchatError::Storage(format!("No session with id {}", id)).into())
    }

    /// Announce reloads and pick up newer copies of the open session
    fn apply_sync_events(
        events: &mut broadcast::Receiver<SyncEvent>,
        conversation: &mut Conversation,
        ids: &Arc<IdGenerator>,
    ) {
        loop {
            let sessions = match events.try_recv() {
                Ok(SyncEvent::Reloaded { sessions, .. }) => sessions,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Skipped stale sync events");
                    continue;
                }
                Err(_) => return,
            };

            println!(
                "{}",
                format!(
                    "History changed in another window ({} conversations).",
                    sessions.len()
                )
                .dimmed()
            );

            let current_id = conversation.id().to_string();
            let current_updated = conversation.session().updated_at;
            let has_question = conversation
                .session()
                .messages
                .iter()
                .any(|m| m.role == Role::User);

            match sessions.into_iter().find(|s| s.id == current_id) {
                Some(updated) if updated.updated_at > current_updated => {
                    println!("{}", "This conversation was continued elsewhere:".dimmed());
                    *conversation = Conversation::resume(ids.clone(), updated);
                    print_transcript(conversation);
                }
                None if has_question => {
                    println!(
                        "{}",
                        "This conversation was deleted elsewhere; it will be saved again on your next message."
                            .yellow()
                    );
                }
                _ => {}
            }
        }
    }

    fn print_transcript(conversation: &Conversation) {
        for message in &conversation.session().messages {
            match message.role {
                Role::User => println!("{} {}", "You:".green().bold(), message.content),
                Role::Assistant => println!("{} {}", "Tutor:".blue().bold(), message.content),
            }
        }
    }

    fn print_welcome_banner() {
        println!(
            "\n{}\nType {} for commands, {} to leave.\n",
            "mathchat - graduate-exam math tutor".bold(),
            "/help".cyan(),
            "/exit".cyan()
        );
    }
}

// One-shot question handler
pub mod ask {
    use super::print_outcome;
    use crate::config::Config;
    use crate::error::{MathchatError, Result};
    use crate::pipeline::{validate_message, Outcome, RequestPipeline};

    /// Ask one question and print the reply
    ///
    /// # Errors
    ///
    /// Returns a validation error for blank input and an upstream error
    /// when the service answered with an error. Unreachable services are
    /// not errors: the offline reply is printed instead.
    pub async fn run_ask(config: &Config, message: &str) -> Result<()> {
        let question = validate_message(message)?;
        let pipeline = RequestPipeline::from_config(&config.completion)?;

        let outcome = pipeline.send(question).await;
        print_outcome(&outcome);

        match outcome {
            Outcome::Failed {
                status_code: Some(status),
                message,
            } => Err(MathchatError::Upstream { status, message }.into()),
            Outcome::Failed {
                status_code: None,
                message,
            } => Err(MathchatError::Transport(message).into()),
            _ => Ok(()),
        }
    }
}

// Connection diagnostics handler
pub mod check {
    use crate::config::Config;
    use crate::diagnostics::{check_connection, Connectivity};
    use crate::error::{MathchatError, Result};
    use colored::Colorize;
    use std::time::Duration;

    /// Probe the configured endpoint and print the verdict
    ///
    /// # Errors
    ///
    /// Fails unless the service is answering, so scripts can use the exit
    /// status.
    pub async fn run_check(config: &Config, timeout_secs: u64) -> Result<()> {
        let report = check_connection(&config.completion, Duration::from_secs(timeout_secs)).await?;

        println!("\n{}", "Connection check".bold());
        println!("  Endpoint:  {}", report.endpoint);
        println!(
            "  Proxy:     {}",
            report.proxy.as_deref().unwrap_or("none")
        );
        println!("  Deadline:  {}s", report.timeout.as_secs());

        let verdict = report.connectivity.to_string();
        let verdict = match &report.connectivity {
            Connectivity::Answering => verdict.green(),
            Connectivity::Unreachable { .. } => verdict.red(),
            _ => verdict.yellow(),
        };
        println!(
            "  Service:   {} after {} ms",
            verdict,
            report.elapsed.as_millis()
        );
        println!(
            "  Chat:      {}\n",
            report.connectivity.chat_replies()
        );

        match report.connectivity {
            Connectivity::Answering => Ok(()),
            Connectivity::Unreachable { reason, .. } => {
                if report.proxy.is_none() {
                    println!(
                        "{}",
                        "No proxy is configured; set completion.proxy or HTTPS_PROXY if the service is blocked on this network."
                            .dimmed()
                    );
                }
                Err(MathchatError::Transport(reason).into())
            }
            Connectivity::Rejected { status } => Err(MathchatError::Upstream {
                status,
                message: format!("Completion service returned status {}", status),
            }
            .into()),
            Connectivity::Unusable { reason } => Err(MathchatError::Transport(reason).into()),
        }
    }
}
