//! mathchat - graduate-exam math tutor library
//!
//! This library provides a resilient request pipeline to a chat-completion
//! service, a durable and searchable conversation history, and a watcher
//! that keeps several views of that history in agreement.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `pipeline`: Retrying completion requests with canned fallback replies
//! - `storage`: Session data model and the persisted session collection
//! - `watcher`: Cross-view change detection by notification and polling
//! - `conversation`: One chat turn from question to persisted session
//! - `diagnostics`: Reachability check for the completion service
//! - `server`: HTTP API
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use mathchat::config::Config;
//! use mathchat::conversation::Conversation;
//! use mathchat::pipeline::RequestPipeline;
//! use mathchat::storage::IdGenerator;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let store = config.storage.open_store()?;
//!     let pipeline = RequestPipeline::from_config(&config.completion)?;
//!
//!     let mut conversation = Conversation::start(Arc::new(IdGenerator::new()), None);
//!     let outcome = conversation
//!         .exchange(&pipeline, &store, "Prove that sqrt(2) is irrational")
//!         .await?;
//!     println!("{:?}", outcome.reply());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod watcher;

// Re-export commonly used types
pub use config::Config;
pub use conversation::Conversation;
pub use error::{MathchatError, Result};
pub use pipeline::{Outcome, RequestPipeline};
pub use storage::{ChatMessage, Role, Session, SessionStore};
pub use watcher::{SyncEvent, SyncWatcher};

#[cfg(test)]
pub mod test_utils;
