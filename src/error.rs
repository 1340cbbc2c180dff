//! Gateway error taxonomy.
//!
//! The set of error kinds is closed: every failure the gateway can surface is
//! one of these six, each with a fixed wire code, retryability, and HTTP
//! status. Adapters never leak raw transport errors; they classify them into
//! this taxonomy before the router sees them.

/// An error surfaced by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Credentials rejected or missing upstream authorization.
    #[error("auth error: {message}")]
    Auth {
        /// Human-readable detail.
        message: String,
        /// Provider that produced the error, when known.
        provider: Option<String>,
    },

    /// Upstream rate or quota limit hit.
    #[error("rate limit: {message}")]
    RateLimit {
        /// Human-readable detail.
        message: String,
        /// Provider that produced the error, when known.
        provider: Option<String>,
    },

    /// The attempt exceeded its deadline.
    #[error("timeout: {message}")]
    Timeout {
        /// Human-readable detail.
        message: String,
        /// Provider that produced the error, when known.
        provider: Option<String>,
    },

    /// The request is invalid and retrying cannot help.
    #[error("bad request: {message}")]
    BadRequest {
        /// Human-readable detail.
        message: String,
        /// Provider that produced the error, when known.
        provider: Option<String>,
    },

    /// The provider failed in a way another attempt may survive.
    #[error("provider unavailable: {message}")]
    ProviderUnavailable {
        /// Human-readable detail.
        message: String,
        /// Provider that produced the error, when known.
        provider: Option<String>,
    },

    /// A configured token or cost ceiling was breached.
    #[error("budget exceeded: {message}")]
    BudgetExceeded {
        /// Human-readable detail.
        message: String,
        /// Provider that produced the error, when known.
        provider: Option<String>,
    },
}

impl GatewayError {
    /// Stable wire code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth_error",
            Self::RateLimit { .. } => "rate_limit",
            Self::Timeout { .. } => "timeout",
            Self::BadRequest { .. } => "bad_request",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::BudgetExceeded { .. } => "budget_exceeded",
        }
    }

    /// Whether another candidate attempt is plausibly productive.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::Timeout { .. } | Self::ProviderUnavailable { .. }
        )
    }

    /// Fixed HTTP status for edge layers exposing this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Auth { .. } => 401,
            Self::RateLimit { .. } => 429,
            Self::Timeout { .. } => 504,
            Self::BadRequest { .. } => 400,
            Self::ProviderUnavailable { .. } => 503,
            Self::BudgetExceeded { .. } => 402,
        }
    }

    /// Provider that produced this error, when known.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Auth { provider, .. }
            | Self::RateLimit { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::BadRequest { provider, .. }
            | Self::ProviderUnavailable { provider, .. }
            | Self::BudgetExceeded { provider, .. } => provider.as_deref(),
        }
    }

    /// Human-readable detail message.
    pub fn message(&self) -> &str {
        match self {
            Self::Auth { message, .. }
            | Self::RateLimit { message, .. }
            | Self::Timeout { message, .. }
            | Self::BadRequest { message, .. }
            | Self::ProviderUnavailable { message, .. }
            | Self::BudgetExceeded { message, .. } => message,
        }
    }

    /// Classify raw failure text into the taxonomy.
    ///
    /// Matching is case-insensitive substring search, checked in priority
    /// order; anything unrecognized maps to the retryable
    /// [`ProviderUnavailable`](Self::ProviderUnavailable) kind.
    pub fn classify(provider: &str, text: impl Into<String>) -> Self {
        let message = text.into();
        let lowered = message.to_lowercase();
        let provider = Some(provider.to_owned());
        if lowered.contains("unauthorized")
            || lowered.contains("api key")
            || lowered.contains("auth")
        {
            return Self::Auth { message, provider };
        }
        if lowered.contains("429") || lowered.contains("rate") || lowered.contains("quota") {
            return Self::RateLimit { message, provider };
        }
        if lowered.contains("timeout") {
            return Self::Timeout { message, provider };
        }
        if lowered.contains("400") || lowered.contains("invalid") || lowered.contains("schema") {
            return Self::BadRequest { message, provider };
        }
        Self::ProviderUnavailable { message, provider }
    }

    /// Shorthand for a bad-request error without provider attribution.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            provider: None,
        }
    }

    /// Shorthand for a budget-exceeded error.
    pub fn budget_exceeded(message: impl Into<String>, provider: Option<String>) -> Self {
        Self::BudgetExceeded {
            message: message.into(),
            provider,
        }
    }

    /// Shorthand for a provider-unavailable error.
    pub fn unavailable(message: impl Into<String>, provider: Option<String>) -> Self {
        Self::ProviderUnavailable {
            message: message.into(),
            provider,
        }
    }

    /// Shorthand for a timeout error attributed to a provider.
    pub fn timeout(message: impl Into<String>, provider: Option<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            provider,
        }
    }
}
