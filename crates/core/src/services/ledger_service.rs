use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::holding::Holding;
use crate::models::transaction::{NewTransaction, Transaction, TransactionType, STABLE_TICKER};
use crate::services::price_service::PriceService;
use crate::storage::traits::LedgerStore;

/// Price folded into a zero-priced buy when the oracle cannot help either.
pub const PLACEHOLDER_PRICE: f64 = 1.0;

/// Relative tolerance for comparing amounts that went through f64 sums.
const AMOUNT_TOLERANCE: f64 = 1e-9;

fn amount_tolerance(scale: f64) -> f64 {
    AMOUNT_TOLERANCE * scale.abs().max(1.0)
}

/// True when `requested` overdraws `held` by more than rounding noise.
pub fn exceeds_balance(requested: f64, held: f64) -> bool {
    requested - held > amount_tolerance(requested.max(held))
}

/// True when what is left of a position after selling `sold` is rounding noise.
pub fn is_dust(remaining: f64, sold: f64) -> bool {
    remaining.abs() <= amount_tolerance(sold)
}

/// Replays ledgers into holdings and guards the ledger write path.
///
/// Holdings are never stored: every read folds the user's full history in
/// date order, so edits and deletes are always reflected.
pub struct LedgerService;

impl LedgerService {
    pub fn new() -> Self {
        Self
    }

    /// Stable sort by date. Entries sharing a timestamp keep storage order.
    pub fn sort_chronologically(transactions: &mut [Transaction]) {
        transactions.sort_by_key(|t| t.date);
    }

    /// Replay `transactions` (any order) into holdings.
    ///
    /// Buys recorded with a non-positive unit price are folded in at the
    /// oracle's current price, or at `PLACEHOLDER_PRICE` if the oracle fails.
    pub async fn compute_holdings(
        &self,
        mut transactions: Vec<Transaction>,
        prices: &PriceService,
    ) -> Vec<Holding> {
        Self::sort_chronologically(&mut transactions);
        let fallback = self.fallback_prices(&transactions, prices).await;
        self.replay(&transactions, &fallback)
    }

    /// Oracle prices for the tickers of unpriced buys, one batched call.
    pub async fn fallback_prices(
        &self,
        transactions: &[Transaction],
        prices: &PriceService,
    ) -> HashMap<String, f64> {
        let mut unpriced: Vec<String> = Vec::new();
        for tx in transactions {
            if tx.transaction_type == TransactionType::Buy
                && tx.unit_price <= 0.0
                && !unpriced.contains(&tx.ticker)
            {
                unpriced.push(tx.ticker.clone());
            }
        }
        if unpriced.is_empty() {
            return HashMap::new();
        }
        prices.prices(&unpriced).await
    }

    /// Fold chronologically sorted transactions into holdings.
    ///
    /// Holdings come back in the order their ticker first appears. Positions
    /// that end at zero (or below) are dropped.
    pub fn replay(
        &self,
        transactions: &[Transaction],
        fallback_prices: &HashMap<String, f64>,
    ) -> Vec<Holding> {
        let mut holdings: Vec<Holding> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for tx in transactions {
            let slot = *index.entry(tx.ticker.clone()).or_insert_with(|| {
                holdings.push(Holding::new(&tx.ticker, &tx.crypto_name));
                holdings.len() - 1
            });
            let holding = &mut holdings[slot];

            match tx.transaction_type {
                TransactionType::Buy => {
                    let total = if tx.unit_price <= 0.0 {
                        let price = fallback_prices
                            .get(&tx.ticker)
                            .copied()
                            .filter(|p| *p > 0.0)
                            .unwrap_or_else(|| {
                                warn!(ticker = %tx.ticker, tx_id = %tx.id, "unpriced buy, using placeholder price");
                                PLACEHOLDER_PRICE
                            });
                        tx.amount * price
                    } else {
                        tx.total
                    };
                    holding.amount_held += tx.amount;
                    holding.total_invested += total;
                }
                TransactionType::Sell => {
                    let per_unit = if holding.amount_held > 0.0 {
                        holding.total_invested / holding.amount_held
                    } else {
                        0.0
                    };
                    holding.total_invested -= per_unit * tx.amount;
                    holding.amount_held -= tx.amount;
                    if is_dust(holding.amount_held, tx.amount) {
                        holding.amount_held = 0.0;
                        holding.total_invested = 0.0;
                    }
                }
            }

            if tx.is_stable() {
                holding.total_invested = holding.amount_held;
            }
        }

        holdings.retain(|h| h.amount_held > 0.0);
        for holding in &mut holdings {
            if holding.ticker == STABLE_TICKER {
                holding.avg_cost = 1.0;
                holding.current_price = 1.0;
                holding.price_available = true;
            } else {
                holding.avg_cost = holding.total_invested / holding.amount_held;
                holding.current_price = holding.avg_cost;
            }
        }
        holdings
    }

    /// The position in `ticker` built only from transactions dated strictly
    /// before `before`. `transactions` must be sorted.
    pub fn holding_before(
        &self,
        transactions: &[Transaction],
        ticker: &str,
        before: DateTime<Utc>,
        fallback_prices: &HashMap<String, f64>,
    ) -> Option<Holding> {
        let prior: Vec<Transaction> = transactions
            .iter()
            .filter(|t| t.ticker == ticker && t.date < before)
            .cloned()
            .collect();
        self.replay(&prior, fallback_prices).into_iter().next()
    }

    // ── Write path ──────────────────────────────────────────────────

    /// Validate a transaction request before it touches storage.
    pub fn validate_new(&self, new: &NewTransaction) -> Result<(), CoreError> {
        if new.ticker.trim().is_empty() {
            return Err(CoreError::ValidationError("Ticker must not be empty".into()));
        }
        if !new.amount.is_finite() || new.amount <= 0.0 {
            return Err(CoreError::ValidationError(
                "Transaction amount must be positive".into(),
            ));
        }
        if !new.unit_price.is_finite() || new.unit_price < 0.0 {
            return Err(CoreError::ValidationError(
                "Unit price must not be negative".into(),
            ));
        }
        if let Some(total) = new.total {
            if !total.is_finite() || total < 0.0 {
                return Err(CoreError::ValidationError("Total must not be negative".into()));
            }
        }
        if let Some(usdt) = new.usdt_received {
            if new.transaction_type != TransactionType::Sell {
                return Err(CoreError::ValidationError(
                    "USDT received only applies to sells".into(),
                ));
            }
            if !usdt.is_finite() || usdt < 0.0 {
                return Err(CoreError::ValidationError(
                    "USDT received must not be negative".into(),
                ));
            }
        }
        Ok(())
    }

    /// Reject a sell larger than the replayed balance of `ticker`.
    pub fn check_sell(&self, holdings: &[Holding], ticker: &str, amount: f64) -> Result<(), CoreError> {
        let held = holdings
            .iter()
            .find(|h| h.ticker == ticker)
            .map(|h| h.amount_held)
            .unwrap_or(0.0);
        if exceeds_balance(amount, held) {
            return Err(CoreError::InsufficientHoldings {
                ticker: ticker.to_string(),
                requested: amount,
                held,
            });
        }
        Ok(())
    }

    /// Walk a sorted ledger and fail on the first sell exceeding the running
    /// balance of its ticker.
    pub fn validate_consistency(&self, transactions: &[Transaction]) -> Result<(), CoreError> {
        let mut balances: HashMap<&str, f64> = HashMap::new();
        for tx in transactions {
            let held = balances.entry(tx.ticker.as_str()).or_insert(0.0);
            match tx.transaction_type {
                TransactionType::Buy => *held += tx.amount,
                TransactionType::Sell => {
                    if exceeds_balance(tx.amount, *held) {
                        return Err(CoreError::InsufficientHoldings {
                            ticker: tx.ticker.clone(),
                            requested: tx.amount,
                            held: *held,
                        });
                    }
                    *held -= tx.amount;
                    if is_dust(*held, tx.amount) {
                        *held = 0.0;
                    }
                }
            }
        }
        Ok(())
    }

    /// Record a transaction. Sells are checked against the current replay
    /// before anything is persisted.
    pub async fn create_transaction(
        &self,
        store: &dyn LedgerStore,
        user_id: &str,
        new: NewTransaction,
    ) -> Result<Transaction, CoreError> {
        self.validate_new(&new)?;
        let tx = Transaction::from_new(user_id, new);

        if tx.transaction_type == TransactionType::Sell {
            let mut existing = store.list_transactions(user_id).await?;
            Self::sort_chronologically(&mut existing);
            // Amounts do not depend on prices, so no oracle is needed here.
            let holdings = self.replay(&existing, &HashMap::new());
            self.check_sell(&holdings, &tx.ticker, tx.amount)?;
        }

        store.append_transaction(tx.clone()).await?;
        info!(user_id, tx_id = %tx.id, ticker = %tx.ticker, kind = %tx.transaction_type, "transaction recorded");
        Ok(tx)
    }

    /// Fetch a transaction owned by `user_id`.
    pub async fn get_owned(
        &self,
        store: &dyn LedgerStore,
        user_id: &str,
        tx_id: Uuid,
    ) -> Result<Transaction, CoreError> {
        let tx = store
            .get_transaction(tx_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                kind: "Transaction",
                id: tx_id.to_string(),
            })?;
        if tx.user_id != user_id {
            return Err(CoreError::Forbidden {
                kind: "Transaction",
                id: tx_id.to_string(),
            });
        }
        Ok(tx)
    }

    /// Replace a transaction. The whole resulting ledger must stay free of
    /// oversells, otherwise storage is left untouched.
    pub async fn update_transaction(
        &self,
        store: &dyn LedgerStore,
        user_id: &str,
        tx_id: Uuid,
        new: NewTransaction,
    ) -> Result<Transaction, CoreError> {
        self.validate_new(&new)?;
        let old = self.get_owned(store, user_id, tx_id).await?;

        let mut updated = Transaction::from_new(user_id, new);
        updated.id = old.id;

        let mut ledger: Vec<Transaction> = store
            .list_transactions(user_id)
            .await?
            .into_iter()
            .filter(|t| t.id != tx_id)
            .collect();
        ledger.push(updated.clone());
        Self::sort_chronologically(&mut ledger);
        self.validate_consistency(&ledger)?;

        store.update_transaction(updated.clone()).await?;
        info!(user_id, %tx_id, "transaction updated");
        Ok(updated)
    }

    /// Delete a transaction, unless a later sell depends on it.
    pub async fn delete_transaction(
        &self,
        store: &dyn LedgerStore,
        user_id: &str,
        tx_id: Uuid,
    ) -> Result<(), CoreError> {
        self.get_owned(store, user_id, tx_id).await?;

        let mut ledger: Vec<Transaction> = store
            .list_transactions(user_id)
            .await?
            .into_iter()
            .filter(|t| t.id != tx_id)
            .collect();
        Self::sort_chronologically(&mut ledger);
        self.validate_consistency(&ledger)?;

        if !store.delete_transaction(tx_id).await? {
            return Err(CoreError::NotFound {
                kind: "Transaction",
                id: tx_id.to_string(),
            });
        }
        info!(user_id, %tx_id, "transaction deleted");
        Ok(())
    }

    /// A user's transactions, newest first for display.
    pub async fn list_transactions(
        &self,
        store: &dyn LedgerStore,
        user_id: &str,
    ) -> Result<Vec<Transaction>, CoreError> {
        let mut txs = store.list_transactions(user_id).await?;
        Self::sort_chronologically(&mut txs);
        txs.reverse();
        Ok(txs)
    }
}

impl Default for LedgerService {
    fn default() -> Self {
        Self::new()
    }
}
