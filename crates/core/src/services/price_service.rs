use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::CoreError;
use crate::models::price::{PriceCache, PriceQuote};
use crate::models::settings::EngineSettings;
use crate::models::transaction::STABLE_TICKER;
use crate::providers::registry::PriceOracleRegistry;

/// Fetches spot prices from the registered oracles with a short-lived cache.
///
/// - Every oracle call is bounded by a timeout; a timeout counts as a failure.
/// - Oracles are tried in registration order until one answers.
/// - USDT is pinned to 1.0 and never sent to an oracle.
/// - Returned prices must be finite and non-negative, otherwise the answer
///   is treated as a failure of that oracle.
pub struct PriceService {
    registry: PriceOracleRegistry,
    cache: Mutex<PriceCache>,
    timeout: Duration,
}

impl PriceService {
    pub fn new(registry: PriceOracleRegistry, settings: &EngineSettings) -> Self {
        Self::with_limits(
            registry,
            settings.oracle_timeout(),
            settings.price_cache_ttl(),
        )
    }

    pub fn with_limits(
        registry: PriceOracleRegistry,
        timeout: Duration,
        cache_ttl: chrono::Duration,
    ) -> Self {
        Self {
            registry,
            cache: Mutex::new(PriceCache::new(cache_ttl)),
            timeout,
        }
    }

    pub fn oracle_names(&self) -> Vec<String> {
        self.registry.names()
    }

    fn cache(&self) -> MutexGuard<'_, PriceCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current quote for one ticker.
    ///
    /// 1. USDT → `1.0` with no movement.
    /// 2. Fresh cache entry → returned as is.
    /// 3. Otherwise each oracle in turn, first valid answer wins and is cached.
    pub async fn quote(&self, ticker: &str) -> Result<PriceQuote, CoreError> {
        let ticker = ticker.trim().to_uppercase();
        if ticker == STABLE_TICKER {
            return Ok(PriceQuote::flat(1.0));
        }
        if let Some(quote) = self.cache().get_quote(&ticker, Utc::now()) {
            return Ok(quote);
        }

        let mut last_error = None;
        for oracle in self.registry.oracles() {
            let result = self
                .bounded(oracle.name(), &ticker, oracle.get_price(&ticker))
                .await;
            match result {
                Ok(quote) if is_valid_price(quote.price) => {
                    let now = Utc::now();
                    let mut cache = self.cache();
                    cache.prune(now);
                    cache.insert_quote(&ticker, quote, now);
                    return Ok(quote);
                }
                Ok(quote) => {
                    last_error = Some(CoreError::Api {
                        provider: oracle.name().to_string(),
                        message: format!(
                            "Invalid price returned for {ticker}: {} (must be finite and non-negative)",
                            quote.price
                        ),
                    });
                }
                Err(e) => {
                    debug!(oracle = oracle.name(), %ticker, ?e, "oracle quote failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(CoreError::NoProvider))
    }

    /// Current price for one ticker.
    pub async fn price(&self, ticker: &str) -> Result<f64, CoreError> {
        self.quote(ticker).await.map(|q| q.price)
    }

    /// Current prices for many tickers, one batched call per oracle.
    ///
    /// Tickers nobody could price are simply absent. Never fails.
    pub async fn prices(&self, tickers: &[String]) -> HashMap<String, f64> {
        let now = Utc::now();
        let mut out = HashMap::new();
        let mut missing: Vec<String> = Vec::new();

        {
            let cache = self.cache();
            for ticker in tickers {
                let ticker = ticker.trim().to_uppercase();
                if out.contains_key(&ticker) || missing.contains(&ticker) {
                    continue;
                }
                if ticker == STABLE_TICKER {
                    out.insert(ticker, 1.0);
                } else if let Some(price) = cache.get_price(&ticker, now) {
                    out.insert(ticker, price);
                } else {
                    missing.push(ticker);
                }
            }
        }

        for oracle in self.registry.oracles() {
            if missing.is_empty() {
                break;
            }
            let label = missing.join(",");
            match self
                .bounded(oracle.name(), &label, oracle.get_prices(&missing))
                .await
            {
                Ok(batch) => {
                    let mut cache = self.cache();
                    cache.prune(now);
                    for (ticker, price) in batch {
                        let ticker = ticker.to_uppercase();
                        if !missing.contains(&ticker) || !is_valid_price(price) {
                            continue;
                        }
                        cache.insert_price(&ticker, price, now);
                        out.insert(ticker, price);
                    }
                    missing.retain(|t| !out.contains_key(t));
                }
                Err(e) => {
                    warn!(oracle = oracle.name(), tickers = %label, ?e, "oracle batch failed");
                }
            }
        }

        if !missing.is_empty() {
            debug!(tickers = ?missing, "no price for tickers");
        }
        out
    }

    /// Full quotes for many tickers. Tickers that fail are absent.
    pub async fn quotes(&self, tickers: &[String]) -> HashMap<String, PriceQuote> {
        let mut out = HashMap::new();
        for ticker in tickers {
            match self.quote(ticker).await {
                Ok(quote) => {
                    out.insert(ticker.trim().to_uppercase(), quote);
                }
                Err(e) => warn!(%ticker, ?e, "quote unavailable"),
            }
        }
        out
    }

    async fn bounded<T, F>(&self, oracle: &str, ticker: &str, call: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::OracleTimeout {
                provider: oracle.to_string(),
                ticker: ticker.to_string(),
            }),
        }
    }
}

fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price >= 0.0
}
