//! Connection diagnostics for the completion service
//!
//! One short probe request, sent through the same transport and proxy as
//! real questions, tells apart a service that cannot be reached, one that
//! answers with an error, and one that produces completions. The verdict
//! also says what the chat would show for the same settings.

use crate::config::CompletionConfig;
use crate::error::{MathchatError, Result};
use crate::pipeline::{
    extract_completion, proxy_label, CompletionRequest, CompletionTransport, HttpTransport,
    TransportErrorKind,
};
use std::time::{Duration, Instant};

/// Deadline for the probe when none is given
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 5;

/// Question sent by the probe
pub const PROBE_QUESTION: &str = "1 + 1 = ?";

// The reply itself is discarded.
const PROBE_MAX_TOKENS: u32 = 8;

/// What the probe learned about the completion service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connectivity {
    /// No response arrived before the deadline
    Unreachable {
        /// Transport failure class
        kind: TransportErrorKind,
        /// Underlying error text
        reason: String,
    },
    /// A response arrived with a non-success status
    Rejected {
        /// HTTP status code
        status: u16,
    },
    /// A success response arrived without a usable completion
    Unusable {
        /// Why the payload was rejected
        reason: String,
    },
    /// The service produced a completion
    Answering,
}

impl Connectivity {
    /// `true` when questions would get real answers
    pub fn is_answering(&self) -> bool {
        matches!(self, Self::Answering)
    }

    /// What the chat shows for a question under the same conditions
    pub fn chat_replies(&self) -> &'static str {
        match self {
            Self::Answering => "real answers",
            Self::Unreachable { .. } => "offline replies",
            Self::Rejected { .. } | Self::Unusable { .. } => "error notes",
        }
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable { kind, .. } => write!(f, "unreachable ({})", kind),
            Self::Rejected { status } => write!(f, "reachable but returned status {}", status),
            Self::Unusable { .. } => write!(f, "reachable but the reply was unusable"),
            Self::Answering => write!(f, "answering"),
        }
    }
}

/// Result of one connection check
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    /// Endpoint that was probed
    pub endpoint: String,
    /// Proxy the probe went through, credentials removed
    pub proxy: Option<String>,
    /// Probe deadline
    pub timeout: Duration,
    /// Time until the verdict
    pub elapsed: Duration,
    /// Verdict
    pub connectivity: Connectivity,
}

/// Sends one probe request and classifies the result
pub async fn probe(transport: &dyn CompletionTransport, config: &CompletionConfig) -> Connectivity {
    let mut request = CompletionRequest::for_question(config, PROBE_QUESTION);
    request.max_tokens = PROBE_MAX_TOKENS;

    let response = match transport.post(&request).await {
        Ok(response) => response,
        Err(e) => {
            return Connectivity::Unreachable {
                kind: e.kind,
                reason: e.message,
            }
        }
    };

    if !(200..300).contains(&response.status) {
        return Connectivity::Rejected {
            status: response.status,
        };
    }

    match extract_completion(&response) {
        Ok(_) => Connectivity::Answering,
        Err(e) => Connectivity::Unusable {
            reason: e.to_string(),
        },
    }
}

/// Probes the configured endpoint with a short deadline
///
/// The configured proxy applies, exactly as for real questions.
///
/// # Errors
///
/// Returns `MathchatError::Validation` for a zero timeout and the transport
/// construction errors of [`HttpTransport::new`].
pub async fn check_connection(
    config: &CompletionConfig,
    timeout: Duration,
) -> Result<ConnectionReport> {
    if timeout.is_zero() {
        return Err(MathchatError::Validation("Check timeout must be positive".to_string()).into());
    }

    let probe_config = CompletionConfig {
        attempt_timeout_secs: timeout.as_secs().max(1),
        ..config.clone()
    };
    let transport = HttpTransport::new(&probe_config)?;

    tracing::info!(
        endpoint = %config.endpoint,
        timeout_secs = probe_config.attempt_timeout_secs,
        "Checking completion service"
    );
    let started = Instant::now();
    let connectivity = probe(&transport, &probe_config).await;
    let elapsed = started.elapsed();
    tracing::info!(%connectivity, elapsed_ms = elapsed.as_millis() as u64, "Check finished");

    Ok(ConnectionReport {
        endpoint: config.endpoint.clone(),
        proxy: config.proxy.as_deref().map(proxy_label),
        timeout: Duration::from_secs(probe_config.attempt_timeout_secs),
        elapsed,
        connectivity,
    })
}
