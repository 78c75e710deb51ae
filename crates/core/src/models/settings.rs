use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use super::snapshot::BucketInterval;

/// Engine-wide tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Positions weighing less than this (in percent) fold into `OTHERS`.
    pub others_threshold_pct: f64,

    /// Deduplication window for value snapshots.
    pub snapshot_bucket: BucketInterval,

    /// Period of the scheduler's max/min sampler.
    pub sample_interval_secs: u64,

    /// Period of the scheduler's snapshot commit, after the first midnight.
    pub commit_interval_secs: u64,

    /// Upper bound on a single price oracle call.
    pub oracle_timeout_ms: u64,

    /// How long a fetched quote is reused.
    pub price_cache_ttl_secs: u64,

    /// Record a snapshot whenever a dashboard is computed.
    pub record_snapshot_on_read: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            others_threshold_pct: 5.0,
            snapshot_bucket: BucketInterval::Day,
            sample_interval_secs: 60,
            commit_interval_secs: 24 * 60 * 60,
            oracle_timeout_ms: 5_000,
            price_cache_ttl_secs: 60,
            record_snapshot_on_read: true,
        }
    }
}

impl EngineSettings {
    /// Defaults overridden by `LEDGER_*` environment variables.
    /// Unset or unparsable variables keep the default.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(v) = env_parse("LEDGER_OTHERS_THRESHOLD_PCT") {
            settings.others_threshold_pct = v;
        }
        if let Some(v) = env_parse::<u32>("LEDGER_SNAPSHOT_BUCKET_MINUTES") {
            settings.snapshot_bucket = BucketInterval::Minutes(v);
        }
        if let Some(v) = env_parse("LEDGER_SAMPLE_INTERVAL_SECS") {
            settings.sample_interval_secs = v;
        }
        if let Some(v) = env_parse("LEDGER_COMMIT_INTERVAL_SECS") {
            settings.commit_interval_secs = v;
        }
        if let Some(v) = env_parse("LEDGER_ORACLE_TIMEOUT_MS") {
            settings.oracle_timeout_ms = v;
        }
        if let Some(v) = env_parse("LEDGER_PRICE_CACHE_TTL_SECS") {
            settings.price_cache_ttl_secs = v;
        }
        if let Some(v) = env_parse("LEDGER_RECORD_SNAPSHOT_ON_READ") {
            settings.record_snapshot_on_read = v;
        }
        settings
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs.max(1))
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_secs(self.commit_interval_secs.max(1))
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn price_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.price_cache_ttl_secs as i64)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
