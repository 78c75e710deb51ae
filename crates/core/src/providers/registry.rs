use std::sync::Arc;

use super::coincap::CoinCapOracle;
use super::traits::PriceOracle;

/// Ordered list of price oracles.
///
/// Oracles are tried in registration order: if the first one fails for a
/// ticker, the next one is asked.
#[derive(Clone, Default)]
pub struct PriceOracleRegistry {
    oracles: Vec<Arc<dyn PriceOracle>>,
}

impl PriceOracleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the default public oracles.
    pub fn new_with_defaults() -> Self {
        let mut registry = Self::new();
        // CoinCap needs no API key
        registry.register(Arc::new(CoinCapOracle::new()));
        registry
    }

    /// Register an oracle at the lowest priority.
    pub fn register(&mut self, oracle: Arc<dyn PriceOracle>) {
        self.oracles.push(oracle);
    }

    /// All oracles in priority order.
    pub fn oracles(&self) -> &[Arc<dyn PriceOracle>] {
        &self.oracles
    }

    pub fn names(&self) -> Vec<String> {
        self.oracles.iter().map(|o| o.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.oracles.is_empty()
    }
}

impl std::fmt::Debug for PriceOracleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceOracleRegistry")
            .field("oracles", &self.names())
            .finish()
    }
}
