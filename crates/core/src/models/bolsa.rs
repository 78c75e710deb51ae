use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named sub-portfolio tracked against a target value.
///
/// Assets in a bolsa are independent of the main ledger and priced on their
/// own. `current_value` is derived from the assets on every re-price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bolsa {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub goal: f64,
    pub assets: Vec<AssetInBolsa>,
    pub rules: Vec<TriggerRule>,
    pub current_value: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bolsa {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, goal: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            name: name.into(),
            goal,
            assets: Vec::new(),
            rules: Vec::new(),
            current_value: 0.0,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-sum `current_value` from the assets.
    pub fn recompute_value(&mut self) {
        self.current_value = self.assets.iter().map(|a| a.current_value).sum();
    }

    /// Distinct tickers held, in first-seen order.
    pub fn tickers(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for asset in &self.assets {
            if !out.contains(&asset.ticker) {
                out.push(asset.ticker.clone());
            }
        }
        out
    }
}

/// A position inside a bolsa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInBolsa {
    pub id: Uuid,
    pub ticker: String,
    pub crypto_name: String,
    pub amount: f64,
    pub purchase_price: f64,
    /// `amount * purchase_price`
    pub total: f64,
    pub current_price: f64,
    pub current_value: f64,
    pub gain_loss: f64,
    pub gain_loss_percent: f64,
}

impl AssetInBolsa {
    pub fn new(new: &NewBolsaAsset) -> Self {
        let mut asset = Self {
            id: Uuid::new_v4(),
            ticker: new.ticker.trim().to_uppercase(),
            crypto_name: new.crypto_name.clone(),
            amount: new.amount,
            purchase_price: new.purchase_price,
            total: new.amount * new.purchase_price,
            current_price: new.purchase_price,
            current_value: 0.0,
            gain_loss: 0.0,
            gain_loss_percent: 0.0,
        };
        asset.reprice(new.purchase_price);
        asset
    }

    /// Apply a market price and recompute value and gain/loss.
    pub fn reprice(&mut self, price: f64) {
        self.current_price = price;
        self.current_value = self.amount * price;
        self.gain_loss = self.current_value - self.total;
        self.gain_loss_percent = if self.total > 0.0 {
            self.gain_loss / self.total * 100.0
        } else {
            0.0
        };
    }

    /// Scale the position by `factor`, keeping unit prices.
    pub fn scale(&mut self, factor: f64) {
        self.amount *= factor;
        self.total = self.amount * self.purchase_price;
        self.reprice(self.current_price);
    }
}

/// Caller request to add a position to a bolsa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBolsaAsset {
    pub ticker: String,
    pub crypto_name: String,
    pub amount: f64,
    pub purchase_price: f64,
}

impl NewBolsaAsset {
    pub fn new(ticker: impl Into<String>, amount: f64, purchase_price: f64) -> Self {
        let ticker = ticker.into();
        Self {
            crypto_name: ticker.clone(),
            ticker,
            amount,
            purchase_price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleType {
    /// Fires when the rule's ticker trades at or above the target
    PriceReached,
    /// Fires when the bolsa's value is at or above the target
    ValueReached,
}

/// One-shot rule attached to a bolsa. `triggered` never goes back to false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: Uuid,
    pub rule_type: RuleType,
    #[serde(default)]
    pub ticker: Option<String>,
    pub target_value: f64,
    pub active: bool,
    pub triggered: bool,
    #[serde(default)]
    pub triggered_at: Option<DateTime<Utc>>,
}

impl TriggerRule {
    pub fn value_reached(target_value: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_type: RuleType::ValueReached,
            ticker: None,
            target_value,
            active: true,
            triggered: false,
            triggered_at: None,
        }
    }

    pub fn price_reached(ticker: impl Into<String>, target_value: f64) -> Self {
        Self {
            rule_type: RuleType::PriceReached,
            ticker: Some(ticker.into().trim().to_uppercase()),
            ..Self::value_reached(target_value)
        }
    }

    pub fn is_armed(&self) -> bool {
        self.active && !self.triggered
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Pending,
    Completed,
    Exceeded,
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressStatus::Pending => write!(f, "pending"),
            ProgressStatus::Completed => write!(f, "completed"),
            ProgressStatus::Exceeded => write!(f, "exceeded"),
        }
    }
}

/// Progress of a bolsa towards its goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BolsaProgress {
    pub bolsa_id: Uuid,
    pub current_value: f64,
    pub goal: f64,
    /// Unclamped `current_value / goal * 100`
    pub raw_percent: f64,
    /// `raw_percent` clamped to 100
    pub percent: f64,
    pub status: ProgressStatus,
    /// Set only when the goal is exceeded
    pub excess_amount: Option<f64>,
    pub excess_percent: Option<f64>,
}

impl BolsaProgress {
    pub fn compute(bolsa_id: Uuid, current_value: f64, goal: f64) -> Self {
        let raw_percent = if goal > 0.0 {
            current_value / goal * 100.0
        } else {
            0.0
        };
        let status = if raw_percent < 100.0 {
            ProgressStatus::Pending
        } else if raw_percent == 100.0 {
            ProgressStatus::Completed
        } else {
            ProgressStatus::Exceeded
        };
        let (excess_amount, excess_percent) = match status {
            ProgressStatus::Exceeded => (Some(current_value - goal), Some(raw_percent - 100.0)),
            _ => (None, None),
        };
        Self {
            bolsa_id,
            current_value,
            goal,
            raw_percent,
            percent: raw_percent.min(100.0),
            status,
            excess_amount,
            excess_percent,
        }
    }
}

/// Tag edit applied by `manage_tags`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TagAction {
    Add(Vec<String>),
    Remove(Vec<String>),
    Replace(Vec<String>),
}

/// Outcome of moving a bolsa's excess value into another bolsa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub source: Bolsa,
    pub target: Bolsa,
    pub excess_amount: f64,
    /// Fraction of every source position that was moved
    pub excess_fraction: f64,
    pub moved_assets: Vec<AssetInBolsa>,
}
