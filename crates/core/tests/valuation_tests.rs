// ═══════════════════════════════════════════════════════════════════
// Valuation Tests: pricing, distribution with OTHERS, transaction
// gain/loss, live balance
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crypto_ledger_core::errors::CoreError;
use crypto_ledger_core::models::holding::{Holding, OTHERS_TICKER};
use crypto_ledger_core::models::price::PriceQuote;
use crypto_ledger_core::models::settings::EngineSettings;
use crypto_ledger_core::models::transaction::NewTransaction;
use crypto_ledger_core::providers::registry::PriceOracleRegistry;
use crypto_ledger_core::providers::traits::PriceOracle;
use crypto_ledger_core::services::valuation_service::ValuationService;
use crypto_ledger_core::PortfolioEngine;

// ═══════════════════════════════════════════════════════════════════
// Mock Oracle
// ═══════════════════════════════════════════════════════════════════

/// Quotes with 24h movement; unknown tickers fail.
struct QuoteOracle {
    quotes: HashMap<String, PriceQuote>,
}

impl QuoteOracle {
    fn new(quotes: &[(&str, f64, f64)]) -> Self {
        Self {
            quotes: quotes
                .iter()
                .map(|(t, price, change)| {
                    (
                        t.to_string(),
                        PriceQuote {
                            price: *price,
                            change_24h: *change,
                            change_pct_24h: change / (price - change) * 100.0,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[async_trait]
impl PriceOracle for QuoteOracle {
    fn name(&self) -> &str {
        "Quotes"
    }

    async fn get_price(&self, ticker: &str) -> Result<PriceQuote, CoreError> {
        self.quotes
            .get(ticker)
            .copied()
            .ok_or(CoreError::PriceNotAvailable {
                ticker: ticker.into(),
            })
    }

    async fn get_prices(&self, tickers: &[String]) -> Result<HashMap<String, f64>, CoreError> {
        Ok(tickers
            .iter()
            .filter_map(|t| self.quotes.get(t).map(|q| (t.clone(), q.price)))
            .collect())
    }
}

fn engine(quotes: &[(&str, f64, f64)]) -> PortfolioEngine {
    let mut registry = PriceOracleRegistry::new();
    registry.register(Arc::new(QuoteOracle::new(quotes)));
    let settings = EngineSettings {
        record_snapshot_on_read: false,
        ..EngineSettings::default()
    };
    PortfolioEngine::in_memory(settings, registry)
}

fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, n, 12, 0, 0).unwrap()
}

fn priced(ticker: &str, value: f64) -> Holding {
    let mut h = Holding::new(ticker, ticker);
    h.amount_held = 1.0;
    h.total_invested = value;
    h.avg_cost = value;
    h.current_price = value;
    h
}

// ── Distribution ────────────────────────────────────────────────────

mod distribution {
    use super::*;

    #[test]
    fn small_positions_fold_into_others() {
        let service = ValuationService::default();
        let holdings = vec![
            priced("DOGE", 2.0),
            priced("BTC", 90.0),
            priced("ADA", 3.0),
            priced("ETH", 5.0),
        ];
        let dist = service.distribution(&holdings);

        let tickers: Vec<&str> = dist.iter().map(|e| e.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["BTC", "ETH", OTHERS_TICKER]);

        let others = dist.last().unwrap();
        assert_eq!(others.value, 5.0);
        let detail: Vec<&str> = others.others_detail.iter().map(|d| d.ticker.as_str()).collect();
        assert_eq!(detail, vec!["ADA", "DOGE"]);
        assert!(dist[0].others_detail.is_empty());
    }

    #[test]
    fn equal_weights_keep_first_seen_order() {
        let service = ValuationService::default();
        let holdings = vec![
            priced("XRP", 2.0),
            priced("ETH", 40.0),
            priced("ADA", 2.0),
            priced("BTC", 40.0),
            priced("SOL", 16.0),
        ];
        let dist = service.distribution(&holdings);

        let tickers: Vec<&str> = dist.iter().map(|e| e.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["ETH", "BTC", "SOL", OTHERS_TICKER]);
        let detail: Vec<&str> = dist[3].others_detail.iter().map(|d| d.ticker.as_str()).collect();
        assert_eq!(detail, vec!["XRP", "ADA"]);
    }

    #[test]
    fn weights_sum_to_hundred() {
        let service = ValuationService::default();
        let holdings = vec![
            priced("BTC", 1234.5),
            priced("ETH", 321.0),
            priced("SOL", 12.0),
            priced("DOT", 7.25),
        ];
        let total: f64 = service.distribution(&holdings).iter().map(|e| e.weight).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn no_others_entry_when_everything_is_large() {
        let service = ValuationService::default();
        let dist = service.distribution(&[priced("BTC", 60.0), priced("ETH", 40.0)]);
        assert_eq!(dist.len(), 2);
        assert!(dist.iter().all(|e| e.ticker != OTHERS_TICKER));
    }

    #[test]
    fn empty_or_worthless_portfolio_has_no_distribution() {
        let service = ValuationService::default();
        assert!(service.distribution(&[]).is_empty());
        assert!(service.distribution(&[priced("BTC", 0.0)]).is_empty());
    }

    #[test]
    fn threshold_is_configurable() {
        let service = ValuationService::new(50.0);
        let dist = service.distribution(&[priced("BTC", 60.0), priced("ETH", 40.0)]);
        assert_eq!(dist.len(), 2);
        assert_eq!(dist[1].ticker, OTHERS_TICKER);
        assert_eq!(dist[1].others_detail[0].ticker, "ETH");
    }
}

// ── Dashboard ───────────────────────────────────────────────────────

mod dashboard {
    use super::*;

    #[tokio::test]
    async fn holdings_are_marked_to_market() {
        let engine = engine(&[("BTC", 15000.0, 0.0)]);
        engine
            .add_transaction("alice", NewTransaction::buy("BTC", 2.0, 10000.0, day(1)))
            .await
            .unwrap();

        let dashboard = engine.get_dashboard("alice").await.unwrap();
        let btc = &dashboard.holdings[0];
        assert_eq!(btc.current_price, 15000.0);
        assert_eq!(btc.unrealized_gain, 10000.0);
        assert_eq!(btc.gain_pct, 50.0);
        assert_eq!(dashboard.summary.total_current_value, 30000.0);
        assert_eq!(dashboard.summary.total_invested, 20000.0);
        assert_eq!(dashboard.summary.profit_percentage, 50.0);
    }

    #[tokio::test]
    async fn unpriced_ticker_is_carried_at_cost() {
        let engine = engine(&[("BTC", 15000.0, 0.0)]);
        engine
            .add_transaction("alice", NewTransaction::buy("BTC", 1.0, 10000.0, day(1)))
            .await
            .unwrap();
        engine
            .add_transaction("alice", NewTransaction::buy("OBSCURE", 100.0, 2.0, day(2)))
            .await
            .unwrap();

        let dashboard = engine.get_dashboard("alice").await.unwrap();
        let obscure = dashboard.holdings.iter().find(|h| h.ticker == "OBSCURE").unwrap();
        assert!(!obscure.price_available);
        assert_eq!(obscure.current_price, 2.0);
        assert_eq!(obscure.unrealized_gain, 0.0);
        assert_eq!(dashboard.summary.total_current_value, 15200.0);
        assert_eq!(dashboard.summary.total_profit, 5000.0);
    }

    #[tokio::test]
    async fn empty_ledger_gives_zero_summary() {
        let engine = engine(&[]);
        let dashboard = engine.get_dashboard("nobody").await.unwrap();
        assert!(dashboard.holdings.is_empty());
        assert_eq!(dashboard.summary.total_current_value, 0.0);
        assert_eq!(dashboard.summary.profit_percentage, 0.0);
        assert!(engine.get_holdings_distribution("nobody").await.unwrap().is_empty());
    }
}

// ── Transaction details ─────────────────────────────────────────────

mod transaction_details {
    use super::*;

    #[tokio::test]
    async fn buy_is_marked_to_market() {
        let engine = engine(&[("BTC", 15000.0, 0.0)]);
        let buy = engine
            .add_transaction("alice", NewTransaction::buy("BTC", 1.0, 10000.0, day(1)))
            .await
            .unwrap();

        let details = engine.get_transaction_detail("alice", buy.id).await.unwrap();
        assert_eq!(details.current_price, Some(15000.0));
        assert_eq!(details.gain_loss, 5000.0);
        assert_eq!(details.gain_loss_pct, 50.0);
        assert!(!details.realized);
        assert!(details.avg_cost_at_sale.is_none());
    }

    #[tokio::test]
    async fn buy_without_price_reports_no_gain() {
        let engine = engine(&[]);
        let buy = engine
            .add_transaction("alice", NewTransaction::buy("BTC", 1.0, 10000.0, day(1)))
            .await
            .unwrap();
        let details = engine.get_transaction_detail("alice", buy.id).await.unwrap();
        assert_eq!(details.current_price, None);
        assert_eq!(details.gain_loss, 0.0);
    }

    #[tokio::test]
    async fn sell_is_realized_against_prior_average() {
        let engine = engine(&[("BTC", 99999.0, 0.0)]);
        engine
            .add_transaction("alice", NewTransaction::buy("BTC", 1.0, 10000.0, day(1)))
            .await
            .unwrap();
        engine
            .add_transaction("alice", NewTransaction::buy("BTC", 1.0, 30000.0, day(2)))
            .await
            .unwrap();
        let sell = engine
            .add_transaction("alice", NewTransaction::sell("BTC", 1.0, 25000.0, day(3)))
            .await
            .unwrap();
        // A later buy must not move the sale's cost basis.
        engine
            .add_transaction("alice", NewTransaction::buy("BTC", 1.0, 1000.0, day(4)))
            .await
            .unwrap();

        let details = engine.get_transaction_detail("alice", sell.id).await.unwrap();
        assert!(details.realized);
        assert_eq!(details.avg_cost_at_sale, Some(20000.0));
        assert_eq!(details.gain_loss, 5000.0);
        assert_eq!(details.gain_loss_pct, 25.0);
    }

    #[tokio::test]
    async fn sell_gain_uses_usdt_received() {
        let engine = engine(&[]);
        engine
            .add_transaction("alice", NewTransaction::buy("ETH", 2.0, 1000.0, day(1)))
            .await
            .unwrap();
        let sell = engine
            .add_transaction(
                "alice",
                NewTransaction::sell("ETH", 1.0, 1500.0, day(2)).with_usdt_received(1400.0),
            )
            .await
            .unwrap();

        let details = engine.get_transaction_detail("alice", sell.id).await.unwrap();
        assert_eq!(details.gain_loss, 400.0);
    }
}

// ── Live balance ────────────────────────────────────────────────────

mod live_balance {
    use super::*;

    #[tokio::test]
    async fn sums_value_and_24h_change() {
        let engine = engine(&[("BTC", 110.0, 10.0), ("ETH", 50.0, -5.0)]);
        engine
            .add_transaction("alice", NewTransaction::buy("BTC", 2.0, 80.0, day(1)))
            .await
            .unwrap();
        engine
            .add_transaction("alice", NewTransaction::buy("ETH", 2.0, 40.0, day(1)))
            .await
            .unwrap();

        let balance = engine.get_live_balance("alice").await.unwrap();
        assert_eq!(balance.total_value, 320.0);
        assert_eq!(balance.change_24h, 10.0);
        assert!((balance.change_pct_24h - 10.0 / 310.0 * 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn engine_exposes_spot_quotes() {
        let engine = engine(&[("BTC", 110.0, 10.0)]);
        let quote = engine.price_service().quote("btc").await.unwrap();
        assert_eq!(quote.price, 110.0);
        assert_eq!(quote.change_24h, 10.0);
        assert!(engine.price_service().quote("NOPE").await.is_err());
    }

    #[tokio::test]
    async fn unquoted_ticker_counts_at_cost() {
        let engine = engine(&[("BTC", 110.0, 10.0)]);
        engine
            .add_transaction("alice", NewTransaction::buy("BTC", 1.0, 80.0, day(1)))
            .await
            .unwrap();
        engine
            .add_transaction("alice", NewTransaction::buy("OBSCURE", 10.0, 5.0, day(1)))
            .await
            .unwrap();

        let balance = engine.get_live_balance("alice").await.unwrap();
        assert_eq!(balance.total_value, 160.0);
        assert_eq!(balance.change_24h, 10.0);
    }
}
