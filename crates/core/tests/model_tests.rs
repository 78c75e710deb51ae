// ═══════════════════════════════════════════════════════════════════
// Model Tests: transactions, buckets, snapshots, bolsa progress,
// price cache, settings
// ═══════════════════════════════════════════════════════════════════

use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use crypto_ledger_core::models::bolsa::{
    AssetInBolsa, Bolsa, BolsaProgress, NewBolsaAsset, ProgressStatus, TriggerRule,
};
use crypto_ledger_core::models::price::{PriceCache, PriceQuote};
use crypto_ledger_core::models::settings::EngineSettings;
use crypto_ledger_core::models::snapshot::{BucketInterval, InvestmentSnapshot, SnapshotReading};
use crypto_ledger_core::models::transaction::{NewTransaction, Transaction, TransactionType};

fn reading(value: f64) -> SnapshotReading {
    SnapshotReading {
        total_value: value,
        total_invested: 1000.0,
        profit: value - 1000.0,
        profit_percentage: (value - 1000.0) / 10.0,
    }
}

// ── Transaction ─────────────────────────────────────────────────────

mod transaction {
    use super::*;

    #[test]
    fn total_defaults_to_amount_times_price() {
        let new = NewTransaction::buy("btc", 0.5, 40000.0, Utc::now());
        assert_eq!(new.resolved_total(), 20000.0);
    }

    #[test]
    fn explicit_total_wins() {
        let mut new = NewTransaction::buy("BTC", 0.5, 40000.0, Utc::now());
        new.total = Some(19950.0);
        assert_eq!(new.resolved_total(), 19950.0);
    }

    #[test]
    fn sell_total_uses_usdt_received() {
        let new = NewTransaction::sell("ETH", 2.0, 3000.0, Utc::now()).with_usdt_received(5990.0);
        assert_eq!(new.resolved_total(), 5990.0);
    }

    #[test]
    fn from_new_uppercases_ticker() {
        let tx = Transaction::from_new("alice", NewTransaction::buy(" eth ", 1.0, 10.0, Utc::now()));
        assert_eq!(tx.ticker, "ETH");
        assert_eq!(tx.user_id, "alice");
        assert_eq!(tx.transaction_type, TransactionType::Buy);
    }

    #[test]
    fn proceeds_prefers_usdt_received() {
        let sell = NewTransaction::sell("ETH", 1.0, 3000.0, Utc::now());
        let tx = Transaction::from_new("u", sell.clone());
        assert_eq!(tx.proceeds(), 3000.0);

        let mut with_usdt = Transaction::from_new("u", sell.with_usdt_received(2990.0));
        with_usdt.total = 3000.0;
        assert_eq!(with_usdt.proceeds(), 2990.0);
    }
}

// ── Buckets & snapshots ─────────────────────────────────────────────

mod snapshot {
    use super::*;

    #[test]
    fn day_bucket_truncates_to_midnight() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 17, 42, 9).unwrap();
        let start = BucketInterval::Day.bucket_start(at);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap());
    }

    #[test]
    fn minute_bucket_aligns_to_window() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 10, 47, 30).unwrap();
        let start = BucketInterval::Minutes(15).bucket_start(at);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 14, 10, 45, 0).unwrap());
    }

    #[test]
    fn open_starts_envelope_at_value() {
        let at = Utc::now();
        let snap = InvestmentSnapshot::open("u", BucketInterval::Day.bucket_start(at), &reading(1200.0), at);
        assert_eq!(snap.max_value, 1200.0);
        assert_eq!(snap.min_value, 1200.0);
        assert_eq!(snap.total_value, 1200.0);
    }

    #[test]
    fn absorb_takes_latest_and_widens() {
        let at = Utc::now();
        let mut snap = InvestmentSnapshot::open("u", at, &reading(1200.0), at);
        snap.absorb(&reading(900.0), at + Duration::minutes(5));
        snap.absorb(&reading(1100.0), at + Duration::minutes(10));

        assert_eq!(snap.total_value, 1100.0);
        assert_eq!(snap.max_value, 1200.0);
        assert_eq!(snap.min_value, 900.0);
        assert_eq!(snap.updated_at, at + Duration::minutes(10));
    }

    #[test]
    fn widen_reports_change() {
        let at = Utc::now();
        let mut snap = InvestmentSnapshot::open("u", at, &reading(1000.0), at);
        assert!(!snap.widen(1000.0));
        assert!(snap.widen(1500.0));
        assert_eq!(snap.total_value, 1000.0);
        assert_eq!(snap.max_value, 1500.0);
    }

    #[test]
    fn degraded_readings_are_not_recordable() {
        assert!(reading(1000.0).is_recordable());
        assert!(!reading(0.0).is_recordable());
        assert!(!reading(f64::NAN).is_recordable());
        let mut r = reading(1000.0);
        r.total_invested = 0.0;
        assert!(!r.is_recordable());
    }
}

// ── Bolsa ───────────────────────────────────────────────────────────

mod bolsa {
    use super::*;

    #[test]
    fn progress_exceeded() {
        let progress = BolsaProgress::compute(Uuid::new_v4(), 1200.0, 1000.0);
        assert_eq!(progress.status, ProgressStatus::Exceeded);
        assert_eq!(progress.percent, 100.0);
        assert!((progress.raw_percent - 120.0).abs() < 1e-9);
        assert!((progress.excess_amount.unwrap() - 200.0).abs() < 1e-9);
        assert!((progress.excess_percent.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn progress_completed_and_pending() {
        let done = BolsaProgress::compute(Uuid::new_v4(), 1000.0, 1000.0);
        assert_eq!(done.status, ProgressStatus::Completed);
        assert!(done.excess_amount.is_none());

        let pending = BolsaProgress::compute(Uuid::new_v4(), 250.0, 1000.0);
        assert_eq!(pending.status, ProgressStatus::Pending);
        assert_eq!(pending.percent, 25.0);
    }

    #[test]
    fn progress_zero_goal_is_pending() {
        let progress = BolsaProgress::compute(Uuid::new_v4(), 50.0, 0.0);
        assert_eq!(progress.raw_percent, 0.0);
        assert_eq!(progress.status, ProgressStatus::Pending);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ProgressStatus::Exceeded).unwrap();
        assert_eq!(json, "\"exceeded\"");
        assert_eq!(ProgressStatus::Pending.to_string(), "pending");
    }

    #[test]
    fn asset_scale_keeps_unit_prices() {
        let mut asset = AssetInBolsa::new(&NewBolsaAsset::new("btc", 2.0, 100.0));
        asset.reprice(150.0);
        asset.scale(0.25);

        assert_eq!(asset.ticker, "BTC");
        assert_eq!(asset.amount, 0.5);
        assert_eq!(asset.total, 50.0);
        assert_eq!(asset.current_value, 75.0);
        assert_eq!(asset.gain_loss, 25.0);
    }

    #[test]
    fn tickers_are_distinct_in_order() {
        let mut bolsa = Bolsa::new("u", "Trip", 1000.0);
        for t in ["ETH", "BTC", "ETH"] {
            bolsa.assets.push(AssetInBolsa::new(&NewBolsaAsset::new(t, 1.0, 1.0)));
        }
        assert_eq!(bolsa.tickers(), vec!["ETH".to_string(), "BTC".to_string()]);
    }

    #[test]
    fn fresh_rule_is_armed() {
        let rule = TriggerRule::price_reached("sol", 200.0);
        assert!(rule.is_armed());
        assert_eq!(rule.ticker.as_deref(), Some("SOL"));
    }
}

// ── Price cache ─────────────────────────────────────────────────────

mod price_cache {
    use super::*;

    #[test]
    fn entries_expire_after_ttl() {
        let now = Utc::now();
        let mut cache = PriceCache::new(Duration::seconds(60));
        cache.insert_quote("btc", PriceQuote::flat(50000.0), now);

        assert_eq!(cache.get_price("BTC", now + Duration::seconds(59)), Some(50000.0));
        assert_eq!(cache.get_price("BTC", now + Duration::seconds(60)), None);
        assert_eq!(cache.prune(now + Duration::seconds(61)), 1);
        assert_eq!(cache.prune(now + Duration::seconds(61)), 0);
    }

    #[test]
    fn bare_price_is_not_a_full_quote() {
        let now = Utc::now();
        let mut cache = PriceCache::new(Duration::seconds(60));
        cache.insert_price("ETH", 3000.0, now);
        assert_eq!(cache.get_price("ETH", now), Some(3000.0));
        assert_eq!(cache.get_quote("ETH", now), None);
    }

    #[test]
    fn bare_price_keeps_fresh_quote() {
        let now = Utc::now();
        let mut cache = PriceCache::new(Duration::seconds(60));
        let quote = PriceQuote {
            price: 3000.0,
            change_24h: 30.0,
            change_pct_24h: 1.0,
        };
        cache.insert_quote("ETH", quote, now);
        cache.insert_price("ETH", 3010.0, now);
        assert_eq!(cache.get_quote("ETH", now), Some(quote));
    }
}

// ── Settings ────────────────────────────────────────────────────────

mod settings {
    use super::*;

    #[test]
    fn defaults() {
        let s = EngineSettings::default();
        assert_eq!(s.others_threshold_pct, 5.0);
        assert_eq!(s.snapshot_bucket, BucketInterval::Day);
        assert_eq!(s.oracle_timeout(), std::time::Duration::from_secs(5));
        assert!(s.record_snapshot_on_read);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: EngineSettings = serde_json::from_str(r#"{"others_threshold_pct": 2.5}"#).unwrap();
        assert_eq!(s.others_threshold_pct, 2.5);
        assert_eq!(s.sample_interval_secs, 60);
    }
}
