use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ticker of the stablecoin that is carried at par, with no profit or loss.
pub const STABLE_TICKER: &str = "USDT";

/// Direction of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Buy,
    Sell,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Buy => write!(f, "Buy"),
            TransactionType::Sell => write!(f, "Sell"),
        }
    }
}

/// A single buy/sell entry in a user's ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier
    pub id: Uuid,

    /// Owner of the ledger entry
    pub user_id: String,

    /// Ticker symbol, uppercased (e.g., "BTC")
    pub ticker: String,

    /// Display name (e.g., "Bitcoin")
    pub crypto_name: String,

    /// Amount of the asset (always positive)
    pub amount: f64,

    /// USD price per unit at the time of the trade
    pub unit_price: f64,

    /// USD total of the trade. `amount * unit_price` unless the caller
    /// supplied an authoritative figure (e.g., USDT proceeds of a sell).
    pub total: f64,

    pub transaction_type: TransactionType,

    pub date: DateTime<Utc>,

    /// USDT actually received for a sell, when known.
    #[serde(default)]
    pub usdt_received: Option<f64>,

    #[serde(default)]
    pub note: Option<String>,
}

impl Transaction {
    /// Build a persisted transaction from a validated request.
    pub fn from_new(user_id: impl Into<String>, new: NewTransaction) -> Self {
        let total = new.resolved_total();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            ticker: new.ticker.trim().to_uppercase(),
            crypto_name: new.crypto_name,
            amount: new.amount,
            unit_price: new.unit_price,
            total,
            transaction_type: new.transaction_type,
            date: new.date,
            usdt_received: new.usdt_received,
            note: new.note,
        }
    }

    /// Money received for a sell: USDT proceeds if recorded, else `total`.
    pub fn proceeds(&self) -> f64 {
        self.usdt_received.unwrap_or(self.total)
    }

    pub fn is_stable(&self) -> bool {
        self.ticker == STABLE_TICKER
    }
}

/// Caller request to record or replace a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub ticker: String,
    pub crypto_name: String,
    pub amount: f64,
    pub unit_price: f64,
    /// Authoritative total; computed from `amount * unit_price` when absent.
    #[serde(default)]
    pub total: Option<f64>,
    pub transaction_type: TransactionType,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub usdt_received: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
}

impl NewTransaction {
    pub fn buy(
        ticker: impl Into<String>,
        amount: f64,
        unit_price: f64,
        date: DateTime<Utc>,
    ) -> Self {
        let ticker = ticker.into();
        Self {
            crypto_name: ticker.clone(),
            ticker,
            amount,
            unit_price,
            total: None,
            transaction_type: TransactionType::Buy,
            date,
            usdt_received: None,
            note: None,
        }
    }

    pub fn sell(
        ticker: impl Into<String>,
        amount: f64,
        unit_price: f64,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_type: TransactionType::Sell,
            ..Self::buy(ticker, amount, unit_price, date)
        }
    }

    pub fn with_usdt_received(mut self, usdt: f64) -> Self {
        self.usdt_received = Some(usdt);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Total that will be persisted for this request.
    pub fn resolved_total(&self) -> f64 {
        if let Some(total) = self.total {
            return total;
        }
        match (self.transaction_type, self.usdt_received) {
            (TransactionType::Sell, Some(usdt)) => usdt,
            _ => self.amount * self.unit_price,
        }
    }
}
