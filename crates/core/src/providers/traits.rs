use async_trait::async_trait;
use std::collections::HashMap;

use crate::errors::CoreError;
use crate::models::price::PriceQuote;

/// Source of USD spot prices for crypto tickers.
///
/// Each market data API implements this trait. Callers treat any error as
/// "price unavailable" and fall back locally, so implementations should
/// fail fast rather than retry.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Human-readable name of this oracle (for logs/errors).
    fn name(&self) -> &str;

    /// Current quote for a single ticker.
    async fn get_price(&self, ticker: &str) -> Result<PriceQuote, CoreError>;

    /// Current prices for several tickers in one round trip.
    /// Tickers the oracle does not know are absent from the map, not an error.
    async fn get_prices(&self, tickers: &[String]) -> Result<HashMap<String, f64>, CoreError>;
}
