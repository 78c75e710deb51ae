use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transaction::TransactionType;

/// Name of the synthetic distribution entry that absorbs small positions.
pub const OTHERS_TICKER: &str = "OTHERS";

/// A position reconstructed by replaying a user's ledger. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,

    pub crypto_name: String,

    /// Units currently held
    pub amount_held: f64,

    /// Cost basis attributed to the units held
    pub total_invested: f64,

    /// `total_invested / amount_held`
    pub avg_cost: f64,

    /// Market price; equals `avg_cost` until priced, or when the oracle fails.
    pub current_price: f64,

    pub unrealized_gain: f64,

    pub gain_pct: f64,

    /// False when the price oracle could not price this ticker.
    pub price_available: bool,
}

impl Holding {
    pub fn new(ticker: impl Into<String>, crypto_name: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            crypto_name: crypto_name.into(),
            amount_held: 0.0,
            total_invested: 0.0,
            avg_cost: 0.0,
            current_price: 0.0,
            unrealized_gain: 0.0,
            gain_pct: 0.0,
            price_available: false,
        }
    }

    /// Market value at `current_price`.
    pub fn current_value(&self) -> f64 {
        self.amount_held * self.current_price
    }
}

/// Aggregated valuation of a set of holdings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuationSummary {
    pub total_current_value: f64,
    pub total_invested: f64,
    pub total_profit: f64,
    pub profit_percentage: f64,
    pub distribution: Vec<DistributionEntry>,
}

/// One slice of the allocation chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionEntry {
    pub ticker: String,
    pub value: f64,
    /// Share of the total current value, in percent
    pub weight: f64,
    /// Tickers folded into this entry. Only set on the `OTHERS` entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub others_detail: Vec<OthersDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OthersDetail {
    pub ticker: String,
    pub value: f64,
    pub weight: f64,
}

/// Priced holdings plus the portfolio-level totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub user_id: String,
    pub as_of: DateTime<Utc>,
    pub holdings: Vec<Holding>,
    pub summary: ValuationSummary,
}

/// Gain/loss breakdown for a single ledger entry.
///
/// Buys are marked to market (`amount * current_price - total`). Sells report
/// the realized gain against the average cost in force before the sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub transaction_id: Uuid,
    pub ticker: String,
    pub transaction_type: TransactionType,
    pub date: DateTime<Utc>,
    pub amount: f64,
    pub unit_price: f64,
    pub total: f64,
    /// Current market price; `None` when the oracle could not price a buy.
    pub current_price: Option<f64>,
    /// Average cost per unit just before a sell. `None` for buys.
    pub avg_cost_at_sale: Option<f64>,
    pub gain_loss: f64,
    pub gain_loss_pct: f64,
    pub realized: bool,
}

/// Present value of the portfolio with its 24h movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveBalance {
    pub user_id: String,
    pub as_of: DateTime<Utc>,
    pub total_value: f64,
    pub change_24h: f64,
    pub change_pct_24h: f64,
}
