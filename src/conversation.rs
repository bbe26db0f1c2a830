//! One tutoring conversation: ask, record, persist
//!
//! A [`Conversation`] owns the in-memory session of the current chat. Each
//! exchange waits for the pipeline's outcome before touching the session, so
//! a turn is never persisted half-done.

use crate::error::Result;
use crate::pipeline::{validate_message, Outcome, RequestPipeline};
use crate::storage::{ChatMessage, IdGenerator, Session, SessionStore};
use std::sync::Arc;

/// Assistant text recorded when the service answered with an error
pub fn error_note(outcome: &Outcome) -> Option<String> {
    match outcome {
        Outcome::Failed {
            status_code: Some(status),
            ..
        } => Some(format!(
            "Sorry, the tutoring service returned an error (status {}). Please try again later.",
            status
        )),
        Outcome::Failed {
            status_code: None,
            message,
        } => Some(format!(
            "Sorry, the request could not be sent to the tutoring service: {}",
            message
        )),
        _ => None,
    }
}

/// The session being chatted in plus the id source for new messages
pub struct Conversation {
    session: Session,
    ids: Arc<IdGenerator>,
}

impl Conversation {
    /// Fresh session, optionally opened by an assistant greeting
    ///
    /// Nothing is persisted until the first exchange.
    pub fn start(ids: Arc<IdGenerator>, greeting: Option<&str>) -> Self {
        let mut session = Session::new(ids.next_id());
        if let Some(text) = greeting.filter(|g| !g.trim().is_empty()) {
            session.push(ChatMessage::assistant(ids.next_id(), text));
        }
        tracing::debug!(id = %session.id, "Started conversation");
        Self { session, ids }
    }

    /// Continue a stored session
    pub fn resume(ids: Arc<IdGenerator>, session: Session) -> Self {
        tracing::debug!(id = %session.id, messages = session.messages.len(), "Resumed conversation");
        Self { session, ids }
    }

    /// Current session state
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.session.id
    }

    /// Ask `text`, record both sides of the turn, and save the session
    ///
    /// The assistant side is the reply, the canned fallback, or an
    /// [`error_note`]. The outcome is returned for the caller to present.
    ///
    /// # Errors
    ///
    /// Returns a validation error for blank input, in which case the session
    /// is left untouched, and a storage error if saving fails.
    pub async fn exchange(
        &mut self,
        pipeline: &RequestPipeline,
        store: &SessionStore,
        text: &str,
    ) -> Result<Outcome> {
        let question = validate_message(text)?;
        let user = ChatMessage::user(self.ids.next_id(), question);

        let outcome = pipeline.send(question).await;

        let reply = match outcome.reply() {
            Some(reply) => reply.to_string(),
            None => error_note(&outcome).unwrap_or_default(),
        };
        let assistant = ChatMessage::assistant(self.ids.next_id(), reply);

        self.session.record_exchange(user, assistant);
        store.save(&self.session)?;

        tracing::info!(
            id = %self.session.id,
            messages = self.session.messages.len(),
            mock = outcome.is_mock(),
            "Recorded exchange"
        );

        Ok(outcome)
    }
}
