use chrono::Utc;
use std::collections::HashMap;
use tracing::warn;

use crate::errors::CoreError;
use crate::models::holding::{
    Dashboard, DistributionEntry, Holding, LiveBalance, OthersDetail, TransactionDetails,
    ValuationSummary, OTHERS_TICKER,
};
use crate::models::snapshot::SnapshotReading;
use crate::models::transaction::{Transaction, TransactionType, STABLE_TICKER};
use crate::services::ledger_service::LedgerService;
use crate::services::price_service::PriceService;
use crate::storage::traits::LedgerStore;

/// Turns replayed holdings into market values, gain/loss and an allocation
/// breakdown.
///
/// A ticker the oracle cannot price is carried at its average cost with zero
/// profit; it never fails the whole valuation.
pub struct ValuationService {
    ledger_service: LedgerService,
    others_threshold_pct: f64,
}

impl ValuationService {
    pub fn new(others_threshold_pct: f64) -> Self {
        Self {
            ledger_service: LedgerService::new(),
            others_threshold_pct,
        }
    }

    /// Price every non-USDT holding with one batched oracle call.
    pub async fn price_holdings(&self, holdings: &mut [Holding], prices: &PriceService) {
        let tickers: Vec<String> = holdings
            .iter()
            .filter(|h| h.ticker != STABLE_TICKER)
            .map(|h| h.ticker.clone())
            .collect();
        let quoted = if tickers.is_empty() {
            HashMap::new()
        } else {
            prices.prices(&tickers).await
        };

        for holding in holdings.iter_mut() {
            let price = if holding.ticker == STABLE_TICKER {
                Some(1.0)
            } else {
                quoted.get(&holding.ticker).copied()
            };
            if price.is_none() {
                warn!(ticker = %holding.ticker, "price unavailable, valuing at average cost");
            }
            Self::apply_price(holding, price);
        }
    }

    /// Set the market price of a holding and recompute its gain/loss.
    /// `None` carries the holding at average cost with zero profit.
    pub fn apply_price(holding: &mut Holding, price: Option<f64>) {
        match price {
            Some(price) => {
                holding.current_price = price;
                holding.price_available = true;
                holding.unrealized_gain = holding.current_value() - holding.total_invested;
            }
            None => {
                holding.current_price = holding.avg_cost;
                holding.price_available = false;
                holding.unrealized_gain = 0.0;
            }
        }
        holding.gain_pct = if holding.total_invested > 0.0 {
            holding.unrealized_gain / holding.total_invested * 100.0
        } else {
            0.0
        };
    }

    /// Portfolio totals and distribution for already-priced holdings.
    pub fn summarize(&self, holdings: &[Holding]) -> ValuationSummary {
        let total_current_value: f64 = holdings.iter().map(Holding::current_value).sum();
        let total_invested: f64 = holdings.iter().map(|h| h.total_invested).sum();
        let total_profit: f64 = holdings.iter().map(|h| h.unrealized_gain).sum();
        let profit_percentage = if total_invested > 0.0 {
            total_profit / total_invested * 100.0
        } else {
            0.0
        };

        ValuationSummary {
            total_current_value,
            total_invested,
            total_profit,
            profit_percentage,
            distribution: self.distribution(holdings),
        }
    }

    /// Price the holdings and summarize them.
    pub async fn valuate(
        &self,
        mut holdings: Vec<Holding>,
        prices: &PriceService,
    ) -> (Vec<Holding>, ValuationSummary) {
        self.price_holdings(&mut holdings, prices).await;
        let summary = self.summarize(&holdings);
        (holdings, summary)
    }

    /// Allocation by current value, largest first.
    ///
    /// Tickers weighing less than the threshold are folded into a trailing
    /// `OTHERS` entry that lists them. Equal weights keep first-seen order.
    pub fn distribution(&self, holdings: &[Holding]) -> Vec<DistributionEntry> {
        let total: f64 = holdings.iter().map(Holding::current_value).sum();
        if total <= 0.0 {
            return Vec::new();
        }

        let mut entries: Vec<DistributionEntry> = holdings
            .iter()
            .map(|h| {
                let value = h.current_value();
                DistributionEntry {
                    ticker: h.ticker.clone(),
                    value,
                    weight: value / total * 100.0,
                    others_detail: Vec::new(),
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let (mut visible, small): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|e| e.weight >= self.others_threshold_pct);

        if !small.is_empty() {
            let value: f64 = small.iter().map(|e| e.value).sum();
            visible.push(DistributionEntry {
                ticker: OTHERS_TICKER.to_string(),
                value,
                weight: value / total * 100.0,
                others_detail: small
                    .into_iter()
                    .map(|e| OthersDetail {
                        ticker: e.ticker,
                        value: e.value,
                        weight: e.weight,
                    })
                    .collect(),
            });
        }
        visible
    }

    /// Replay, price and summarize a user's whole ledger.
    pub async fn dashboard(
        &self,
        store: &dyn LedgerStore,
        prices: &PriceService,
        user_id: &str,
    ) -> Result<Dashboard, CoreError> {
        let transactions = store.list_transactions(user_id).await?;
        let holdings = self
            .ledger_service
            .compute_holdings(transactions, prices)
            .await;
        let (holdings, summary) = self.valuate(holdings, prices).await;
        Ok(Dashboard {
            user_id: user_id.to_string(),
            as_of: Utc::now(),
            holdings,
            summary,
        })
    }

    /// Snapshot figures for a dashboard.
    pub fn reading(summary: &ValuationSummary) -> SnapshotReading {
        SnapshotReading {
            total_value: summary.total_current_value,
            total_invested: summary.total_invested,
            profit: summary.total_profit,
            profit_percentage: summary.profit_percentage,
        }
    }

    /// Gain/loss of one ledger entry.
    ///
    /// - Buy: `amount * current_price - total` (what the lot is worth now).
    /// - Sell: `proceeds - amount * avg_cost`, where the average cost comes
    ///   from replaying only the entries dated strictly before the sale.
    ///
    /// `ledger` must be sorted. `current_price` is only used for buys.
    pub fn transaction_details(
        &self,
        tx: &Transaction,
        ledger: &[Transaction],
        current_price: Option<f64>,
        fallback_prices: &HashMap<String, f64>,
    ) -> TransactionDetails {
        let (gain_loss, basis, avg_cost_at_sale, current_price) = match tx.transaction_type {
            TransactionType::Buy => {
                let price = if tx.ticker == STABLE_TICKER {
                    Some(1.0)
                } else {
                    current_price
                };
                let gain = price.map(|p| tx.amount * p - tx.total).unwrap_or(0.0);
                (gain, tx.total, None, price)
            }
            TransactionType::Sell => {
                let avg_cost = self
                    .ledger_service
                    .holding_before(ledger, &tx.ticker, tx.date, fallback_prices)
                    .map(|h| h.avg_cost)
                    .unwrap_or(0.0);
                let cost_basis = tx.amount * avg_cost;
                (tx.proceeds() - cost_basis, cost_basis, Some(avg_cost), None)
            }
        };

        TransactionDetails {
            transaction_id: tx.id,
            ticker: tx.ticker.clone(),
            transaction_type: tx.transaction_type,
            date: tx.date,
            amount: tx.amount,
            unit_price: tx.unit_price,
            total: tx.total,
            current_price,
            avg_cost_at_sale,
            gain_loss,
            gain_loss_pct: if basis > 0.0 {
                gain_loss / basis * 100.0
            } else {
                0.0
            },
            realized: tx.transaction_type == TransactionType::Sell,
        }
    }

    /// Current value of the holdings and how much it moved in 24 hours.
    ///
    /// Tickers without a quote are carried at average cost with no movement.
    pub async fn live_balance(
        &self,
        store: &dyn LedgerStore,
        prices: &PriceService,
        user_id: &str,
    ) -> Result<LiveBalance, CoreError> {
        let transactions = store.list_transactions(user_id).await?;
        let holdings = self
            .ledger_service
            .compute_holdings(transactions, prices)
            .await;
        let tickers: Vec<String> = holdings.iter().map(|h| h.ticker.clone()).collect();
        let quotes = prices.quotes(&tickers).await;

        let mut total_value = 0.0;
        let mut change_24h = 0.0;
        for holding in &holdings {
            match quotes.get(&holding.ticker) {
                Some(quote) => {
                    total_value += holding.amount_held * quote.price;
                    change_24h += holding.amount_held * quote.change_24h;
                }
                None => total_value += holding.total_invested,
            }
        }
        let previous = total_value - change_24h;

        Ok(LiveBalance {
            user_id: user_id.to_string(),
            as_of: Utc::now(),
            total_value,
            change_24h,
            change_pct_24h: if previous > 0.0 {
                change_24h / previous * 100.0
            } else {
                0.0
            },
        })
    }
}

impl Default for ValuationService {
    fn default() -> Self {
        Self::new(5.0)
    }
}
