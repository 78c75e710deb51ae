use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Spot quote in USD for a single ticker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    /// Absolute price movement over the last 24 hours
    pub change_24h: f64,
    /// Relative price movement over the last 24 hours, in percent
    pub change_pct_24h: f64,
}

impl PriceQuote {
    /// A quote with no known 24h movement.
    pub fn flat(price: f64) -> Self {
        Self {
            price,
            change_24h: 0.0,
            change_pct_24h: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedQuote {
    quote: PriceQuote,
    /// False when only the price is known (batched lookups carry no 24h data)
    complete: bool,
    fetched_at: DateTime<Utc>,
}

/// Short-lived cache of spot quotes, keyed by uppercase ticker.
///
/// Entries older than the TTL are treated as misses and overwritten on the
/// next fetch. Owned by `PriceService`; there is no process-wide instance.
#[derive(Debug, Clone)]
pub struct PriceCache {
    ttl: Duration,
    entries: HashMap<String, CachedQuote>,
}

impl PriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    fn fresh(&self, ticker: &str, now: DateTime<Utc>) -> Option<&CachedQuote> {
        self.entries
            .get(&ticker.to_uppercase())
            .filter(|e| now - e.fetched_at < self.ttl)
    }

    /// Fresh full quote (with 24h movement) for `ticker`, if any.
    pub fn get_quote(&self, ticker: &str, now: DateTime<Utc>) -> Option<PriceQuote> {
        self.fresh(ticker, now).filter(|e| e.complete).map(|e| e.quote)
    }

    /// Fresh price for `ticker` from either kind of entry.
    pub fn get_price(&self, ticker: &str, now: DateTime<Utc>) -> Option<f64> {
        self.fresh(ticker, now).map(|e| e.quote.price)
    }

    pub fn insert_quote(&mut self, ticker: &str, quote: PriceQuote, now: DateTime<Utc>) {
        self.entries.insert(
            ticker.to_uppercase(),
            CachedQuote {
                quote,
                complete: true,
                fetched_at: now,
            },
        );
    }

    /// Store a bare price. A fresh full quote for the same ticker is kept.
    pub fn insert_price(&mut self, ticker: &str, price: f64, now: DateTime<Utc>) {
        if self.get_quote(ticker, now).is_some() {
            return;
        }
        self.entries.insert(
            ticker.to_uppercase(),
            CachedQuote {
                quote: PriceQuote::flat(price),
                complete: false,
                fetched_at: now,
            },
        );
    }

    /// Drop expired entries. Returns the number removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, e| now - e.fetched_at < ttl);
        before - self.entries.len()
    }
}
