//! Resilient request pipeline for the completion service
//!
//! Sends one user question with a bounded number of attempts. Each attempt
//! has its own deadline; transport failures wait a fixed backoff and try
//! again, and the final transport failure degrades to a labelled canned
//! reply. A response that arrives but signals an error is reported at once
//! and never retried.
//!
//! ```text
//! Attempting(n) -> Succeeded
//! Attempting(n) -> Backoff(n) -> Attempting(n + 1)   transport failure, n < max
//! Attempting(max) -> FellBack                       transport failure
//! Attempting(n) -> Failed                           upstream or schema error
//! ```

pub mod fallback;
pub mod sleeper;
pub mod transport;

pub use fallback::{fallback_text, FallbackPicker, FixedPicker, RandomPicker, FALLBACK_RESPONSES};
pub use sleeper::{RecordingSleeper, Sleeper, TokioSleeper};
pub use transport::{
    proxy_label, system_prompt, CompletionRequest, CompletionTransport, HttpTransport, TransportError,
    TransportErrorKind, TransportResponse, WireMessage,
};

use crate::config::CompletionConfig;
use crate::error::{MathchatError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Rejects absent, empty, or whitespace-only questions
///
/// # Examples
///
/// ```
/// use mathchat::pipeline::validate_message;
///
/// assert!(validate_message("  ").is_err());
/// assert_eq!(validate_message("  d/dx x^2 ").unwrap(), "d/dx x^2");
/// ```
pub fn validate_message(message: &str) -> Result<&str> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(MathchatError::Validation("Message is required".to_string()).into());
    }
    Ok(trimmed)
}

/// Result of sending one question
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The service produced a completion
    Answered {
        /// Completion text
        text: String,
    },
    /// The service could not be reached; `text` is a canned apology
    Fallback {
        /// One of [`FALLBACK_RESPONSES`]
        text: String,
    },
    /// The service answered with an error or an unusable payload
    Failed {
        /// Upstream HTTP status, when a response arrived
        status_code: Option<u16>,
        /// Diagnostic text including the upstream body
        message: String,
    },
}

impl Outcome {
    /// `true` for synthesized replies
    pub fn is_mock(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// Reply text for `Answered` and `Fallback`
    pub fn reply(&self) -> Option<&str> {
        match self {
            Self::Answered { text } | Self::Fallback { text } => Some(text),
            Self::Failed { .. } => None,
        }
    }
}

/// Observable pipeline states, in the order they were entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Attempt number `n` (1-based) in flight
    Attempting(u32),
    /// Waiting after failed attempt `n`
    Backoff(u32),
    /// Completion extracted
    Succeeded,
    /// Attempts exhausted by transport failures
    FellBack,
    /// Upstream or schema error
    Failed,
}

/// Outcome plus the states visited to reach it
#[derive(Debug, Clone)]
pub struct Trace {
    /// Final outcome
    pub outcome: Outcome,
    /// Every state entered, first to last
    pub states: Vec<PipelineState>,
}

impl Trace {
    /// Number of attempts made
    pub fn attempts(&self) -> u32 {
        self.states
            .iter()
            .filter(|s| matches!(s, PipelineState::Attempting(_)))
            .count() as u32
    }
}

/// Retry policy knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Fixed wait between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Policy from configuration
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CompletionConfig::default())
    }
}

/// Sends questions to the completion service
///
/// # Examples
///
/// ```no_run
/// use mathchat::config::CompletionConfig;
/// use mathchat::pipeline::RequestPipeline;
///
/// # async fn example() -> anyhow::Result<()> {
/// let pipeline = RequestPipeline::from_config(&CompletionConfig::default())?;
/// let outcome = pipeline.send("Evaluate the limit of sin(x)/x as x -> 0").await;
/// println!("{:?}", outcome);
/// # Ok(())
/// # }
/// ```
pub struct RequestPipeline {
    config: CompletionConfig,
    policy: RetryPolicy,
    transport: Arc<dyn CompletionTransport>,
    sleeper: Arc<dyn Sleeper>,
    picker: Arc<dyn FallbackPicker>,
}

impl RequestPipeline {
    /// Production pipeline: HTTP transport, real timer, random fallback
    pub fn from_config(config: &CompletionConfig) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(
            config.clone(),
            Arc::new(transport),
            Arc::new(TokioSleeper),
            Arc::new(RandomPicker::new()),
        ))
    }

    /// Pipeline with explicit collaborators
    pub fn new(
        config: CompletionConfig,
        transport: Arc<dyn CompletionTransport>,
        sleeper: Arc<dyn Sleeper>,
        picker: Arc<dyn FallbackPicker>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            config,
            policy,
            transport,
            sleeper,
            picker,
        }
    }

    /// Active retry policy
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `message` and return the outcome
    pub async fn send(&self, message: &str) -> Outcome {
        self.send_traced(message).await.outcome
    }

    /// Send `message` and return the outcome with every state visited
    pub async fn send_traced(&self, message: &str) -> Trace {
        let request = CompletionRequest::for_question(&self.config, message);
        let max_attempts = self.policy.max_attempts;
        let mut states = Vec::new();
        let mut attempt = 1;

        loop {
            states.push(PipelineState::Attempting(attempt));
            tracing::debug!(attempt, max_attempts, "Sending completion request");

            let error = match self.transport.post(&request).await {
                Ok(response) => {
                    let outcome = match extract_completion(&response) {
                        Ok(text) => {
                            tracing::info!(attempt, chars = text.len(), "Completion received");
                            states.push(PipelineState::Succeeded);
                            Outcome::Answered { text }
                        }
                        Err(e) => {
                            tracing::error!(attempt, status = response.status, "{}", e);
                            states.push(PipelineState::Failed);
                            Outcome::Failed {
                                status_code: Some(response.status),
                                message: e.to_string(),
                            }
                        }
                    };
                    return Trace { outcome, states };
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                tracing::error!(attempt, "Completion request cannot be sent: {}", error);
                states.push(PipelineState::Failed);
                return Trace {
                    outcome: Outcome::Failed {
                        status_code: None,
                        message: error.to_string(),
                    },
                    states,
                };
            }

            tracing::warn!(attempt, max_attempts, "Completion attempt failed: {}", error);

            if attempt >= max_attempts {
                let text = fallback_text(self.picker.as_ref()).to_string();
                tracing::warn!(
                    attempts = attempt,
                    "Completion service unreachable, returning mock reply"
                );
                states.push(PipelineState::FellBack);
                return Trace {
                    outcome: Outcome::Fallback { text },
                    states,
                };
            }

            states.push(PipelineState::Backoff(attempt));
            self.sleeper.sleep(self.policy.backoff).await;
            attempt += 1;
        }
    }
}

/// Extracts `choices[0].message.content` from a response
///
/// # Errors
///
/// Returns `MathchatError::Upstream` for non-success statuses, non-JSON
/// bodies, and payloads without a string completion.
pub fn extract_completion(response: &TransportResponse) -> std::result::Result<String, MathchatError> {
    if !(200..300).contains(&response.status) {
        return Err(MathchatError::Upstream {
            status: response.status,
            message: format!(
                "Completion service error: {} {}",
                response.status, response.body
            ),
        });
    }

    let payload: serde_json::Value =
        serde_json::from_str(&response.body).map_err(|e| MathchatError::Upstream {
            status: response.status,
            message: format!("Invalid response from completion service: {}", e),
        })?;

    payload
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| MathchatError::Upstream {
            status: response.status,
            message: "Invalid response from completion service: missing choices[0].message.content"
                .to_string(),
        })
}
