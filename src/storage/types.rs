//! Session and message records in their persisted wire shape

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title shown for a session until its first user message arrives
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Maximum number of characters kept from the first user message
pub const TITLE_MAX_CHARS: usize = 30;

/// Marker appended to truncated titles
pub const TITLE_ELLIPSIS: &str = "...";

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking questions
    User,
    /// The tutor (service reply, fallback, or error note)
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a stored conversation
///
/// Messages are immutable once created; sessions only ever append them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Time-based identifier, unique and increasing within a process
    pub id: String,
    /// Message text
    pub content: String,
    /// Author of the message
    pub role: Role,
    /// Creation instant
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Creates a message stamped with the current time
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            role,
            timestamp: Utc::now(),
        }
    }

    /// Creates a user message
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, Role::User, content)
    }

    /// Creates an assistant message
    pub fn assistant(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, Role::Assistant, content)
    }
}

/// A persisted conversation
///
/// The serialized field names match the collection format written by
/// earlier clients (`createdAt`, `updatedAt`), so existing history files
/// load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identifier for the session
    pub id: String,
    /// Derived from the first user message
    pub title: String,
    /// Messages in insertion order
    pub messages: Vec<ChatMessage>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last persisted
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Creates an empty session with the placeholder title
    ///
    /// # Examples
    ///
    /// ```
    /// use mathchat::storage::{Session, DEFAULT_TITLE};
    ///
    /// let session = Session::new("1714560000000");
    /// assert_eq!(session.title, DEFAULT_TITLE);
    /// assert!(session.messages.is_empty());
    /// ```
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a message without touching the title or timestamps
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Appends one request/response pair and refreshes derived fields
    ///
    /// The title is recomputed only while it is still the placeholder, so a
    /// title never changes once a user message has named the session.
    pub fn record_exchange(&mut self, user: ChatMessage, assistant: ChatMessage) {
        self.messages.push(user);
        self.messages.push(assistant);
        if self.title == DEFAULT_TITLE {
            self.title = generate_title(&self.messages);
        }
        self.touch();
    }

    /// Refreshes `updated_at`
    pub fn touch(&mut self) {
        let now = Utc::now();
        // Never move backwards if the wall clock steps back.
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Case-insensitive match against the title or any message content
    ///
    /// `needle` must already be lowercased.
    pub(crate) fn matches_lowercase(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self
                .messages
                .iter()
                .any(|m| m.content.to_lowercase().contains(needle))
    }
}

/// Derives a session title from the first user message
///
/// Titles are cut at [`TITLE_MAX_CHARS`] characters (not bytes) and marked
/// with [`TITLE_ELLIPSIS`] when cut.
///
/// # Examples
///
/// ```
/// use mathchat::storage::{generate_title, ChatMessage, DEFAULT_TITLE};
///
/// assert_eq!(generate_title(&[]), DEFAULT_TITLE);
///
/// let messages = vec![ChatMessage::user("1", "What is a limit?")];
/// assert_eq!(generate_title(&messages), "What is a limit?");
/// ```
pub fn generate_title(messages: &[ChatMessage]) -> String {
    let Some(first) = messages.iter().find(|m| m.role == Role::User) else {
        return DEFAULT_TITLE.to_string();
    };

    if first.content.chars().count() > TITLE_MAX_CHARS {
        let head: String = first.content.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}{}", head, TITLE_ELLIPSIS)
    } else {
        first.content.clone()
    }
}
