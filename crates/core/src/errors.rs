use thiserror::Error;

/// Unified error type for the entire crypto-ledger-core library.
/// Every public function returns `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Price oracle ────────────────────────────────────────────────
    #[error("API error ({provider}): {message}")]
    Api {
        provider: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Price oracle {provider} timed out for {ticker}")]
    OracleTimeout {
        provider: String,
        ticker: String,
    },

    #[error("No price oracle registered")]
    NoProvider,

    #[error("Price not available for {ticker}")]
    PriceNotAvailable { ticker: String },

    // ── Business Logic ──────────────────────────────────────────────
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Insufficient holdings: cannot sell {requested} {ticker}, only {held} held")]
    InsufficientHoldings {
        ticker: String,
        requested: f64,
        held: f64,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} belongs to another user")]
    Forbidden { kind: &'static str, id: String },

    #[error("Scheduler error: {0}")]
    SchedulerState(String),

    // ── Storage ─────────────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// True for failures of the external price oracle. These are recovered
    /// locally by valuation code and never fail a whole request.
    pub fn is_oracle_failure(&self) -> bool {
        matches!(
            self,
            CoreError::Api { .. }
                | CoreError::Network(_)
                | CoreError::OracleTimeout { .. }
                | CoreError::NoProvider
                | CoreError::PriceNotAvailable { .. }
        )
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Api {
            provider: "json".into(),
            message: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        // Strip query parameters from URLs; reqwest errors carry the full URL.
        let msg = e.to_string();
        let sanitized = if let Some(idx) = msg.find('?') {
            format!("{}?<query redacted>", &msg[..idx])
        } else {
            msg
        };
        CoreError::Network(sanitized)
    }
}
