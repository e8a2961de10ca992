use std::time::Duration;

/// Why a generation request failed. Carried by [`GatewayError::GenerationFailed`].
#[derive(Clone, Debug, thiserror::Error)]
pub enum FailureCause {
    // Fatal: retrying will not help
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("response blocked: {0}")]
    Blocked(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("provider overloaded")]
    Overloaded,
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),

    // Operational
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("circuit open, provider calls suspended")]
    CircuitOpen,
}

impl FailureCause {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Overloaded | Self::Server { .. } | Self::Network(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::Rejected { .. } | Self::Blocked(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::Rejected { .. } => "rejected",
            Self::Blocked(_) => "blocked",
            Self::RateLimited { .. } => "rate_limited",
            Self::Overloaded => "overloaded",
            Self::Server { .. } => "server_error",
            Self::Network(_) => "network_error",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Timeout(_) => "timeout",
            Self::CircuitOpen => "circuit_open",
        }
    }

    /// Classify an HTTP status code from the provider.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Authentication(body),
            429 => Self::RateLimited { retry_after: None },
            503 | 529 => Self::Overloaded,
            500..=599 => Self::Server { status, body },
            _ => Self::Rejected { status, body },
        }
    }
}

/// Errors surfaced by a [`ModelGateway`](crate::gateway::ModelGateway).
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    /// The conversation failed validation; no request was sent.
    #[error("invalid history: {0}")]
    InvalidHistory(String),

    #[error("generation failed: {0}")]
    GenerationFailed(#[from] FailureCause),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidHistory(_) => "invalid_history",
            Self::GenerationFailed(cause) => cause.kind(),
        }
    }

    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            Self::InvalidHistory(_) => None,
            Self::GenerationFailed(cause) => Some(cause),
        }
    }
}

/// Errors from one chat request, as seen by the session layer.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ChatError {
    #[error("no prompt provided")]
    EmptyPrompt,

    /// The connection already has as many requests pending as it may queue.
    #[error("too many pending chat requests")]
    Backlogged,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ChatError {
    /// Fixed message shown to the client. Never includes provider detail.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::EmptyPrompt => "No prompt provided.",
            Self::Backlogged | Self::Gateway(_) => "Failed to generate AI response.",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyPrompt => "empty_prompt",
            Self::Backlogged => "backlogged",
            Self::Gateway(e) => e.kind(),
        }
    }
}
