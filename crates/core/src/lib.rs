pub mod errors;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use errors::CoreError;
use models::{
    bolsa::{Bolsa, BolsaProgress, NewBolsaAsset, TagAction, TransferOutcome, TriggerRule},
    holding::{Dashboard, DistributionEntry, LiveBalance, TransactionDetails},
    settings::EngineSettings,
    snapshot::{InvestmentHistory, InvestmentSnapshot, SnapshotReading},
    transaction::{NewTransaction, Transaction, TransactionType, STABLE_TICKER},
};
use providers::registry::PriceOracleRegistry;
use services::{
    bolsa_service::BolsaService,
    ledger_service::LedgerService,
    price_service::PriceService,
    scheduler::{SnapshotScheduler, SnapshotWorker},
    snapshot_service::SnapshotService,
    valuation_service::ValuationService,
};
use storage::{
    memory::{MemoryBolsaStore, MemoryLedgerStore, MemorySnapshotStore},
    traits::{BolsaStore, LedgerStore, SnapshotStore},
};

/// Main entry point for the crypto-ledger core library.
///
/// Wires the stores, the price oracles and the services together and
/// exposes the operations an HTTP layer would call. Every read replays the
/// user's ledger from storage; nothing about holdings is cached here.
#[must_use]
pub struct PortfolioEngine {
    settings: EngineSettings,
    ledger: Arc<dyn LedgerStore>,
    snapshots: Arc<dyn SnapshotStore>,
    bolsas: Arc<dyn BolsaStore>,
    prices: Arc<PriceService>,
    ledger_service: LedgerService,
    valuation_service: Arc<ValuationService>,
    snapshot_service: Arc<SnapshotService>,
    bolsa_service: BolsaService,
}

impl std::fmt::Debug for PortfolioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioEngine")
            .field("settings", &self.settings)
            .field("oracles", &self.prices.oracle_names())
            .finish()
    }
}

impl PortfolioEngine {
    /// Build an engine over the given stores.
    pub fn new(
        settings: EngineSettings,
        registry: PriceOracleRegistry,
        ledger: Arc<dyn LedgerStore>,
        snapshots: Arc<dyn SnapshotStore>,
        bolsas: Arc<dyn BolsaStore>,
    ) -> Self {
        Self {
            prices: Arc::new(PriceService::new(registry, &settings)),
            valuation_service: Arc::new(ValuationService::new(settings.others_threshold_pct)),
            snapshot_service: Arc::new(SnapshotService::new(settings.snapshot_bucket)),
            ledger_service: LedgerService::new(),
            bolsa_service: BolsaService::new(),
            settings,
            ledger,
            snapshots,
            bolsas,
        }
    }

    /// Build an engine backed by in-memory stores.
    pub fn in_memory(settings: EngineSettings, registry: PriceOracleRegistry) -> Self {
        Self::new(
            settings,
            registry,
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(MemorySnapshotStore::new()),
            Arc::new(MemoryBolsaStore::new()),
        )
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn price_service(&self) -> &PriceService {
        &self.prices
    }

    /// A stopped scheduler sharing this engine's stores and services.
    pub fn scheduler(&self) -> SnapshotScheduler {
        SnapshotScheduler::new(self.snapshot_worker(), &self.settings)
    }

    pub fn snapshot_worker(&self) -> SnapshotWorker {
        SnapshotWorker {
            ledger: Arc::clone(&self.ledger),
            snapshots: Arc::clone(&self.snapshots),
            prices: Arc::clone(&self.prices),
            valuation: Arc::clone(&self.valuation_service),
            snapshot_service: Arc::clone(&self.snapshot_service),
        }
    }

    // ── Ledger ──────────────────────────────────────────────────────

    /// Record a buy or sell. Oversells are rejected before persisting.
    pub async fn add_transaction(
        &self,
        user_id: &str,
        new: NewTransaction,
    ) -> Result<Transaction, CoreError> {
        self.ledger_service
            .create_transaction(self.ledger.as_ref(), user_id, new)
            .await
    }

    pub async fn update_transaction(
        &self,
        user_id: &str,
        tx_id: Uuid,
        new: NewTransaction,
    ) -> Result<Transaction, CoreError> {
        self.ledger_service
            .update_transaction(self.ledger.as_ref(), user_id, tx_id, new)
            .await
    }

    pub async fn delete_transaction(&self, user_id: &str, tx_id: Uuid) -> Result<(), CoreError> {
        self.ledger_service
            .delete_transaction(self.ledger.as_ref(), user_id, tx_id)
            .await
    }

    /// All of a user's transactions, newest first.
    pub async fn list_transactions(&self, user_id: &str) -> Result<Vec<Transaction>, CoreError> {
        self.ledger_service
            .list_transactions(self.ledger.as_ref(), user_id)
            .await
    }

    // ── Valuation ───────────────────────────────────────────────────

    /// Holdings, totals and distribution for a user.
    ///
    /// Also folds the reading into the snapshot history when
    /// `record_snapshot_on_read` is set; a failed snapshot write is logged
    /// and does not fail the read.
    pub async fn get_dashboard(&self, user_id: &str) -> Result<Dashboard, CoreError> {
        let dashboard = self
            .valuation_service
            .dashboard(self.ledger.as_ref(), &self.prices, user_id)
            .await?;

        if self.settings.record_snapshot_on_read {
            let reading = ValuationService::reading(&dashboard.summary);
            if let Err(e) = self
                .snapshot_service
                .record_snapshot(self.snapshots.as_ref(), user_id, reading)
                .await
            {
                warn!(user_id, ?e, "snapshot on read failed");
            }
        }
        Ok(dashboard)
    }

    pub async fn get_holdings_distribution(
        &self,
        user_id: &str,
    ) -> Result<Vec<DistributionEntry>, CoreError> {
        let dashboard = self
            .valuation_service
            .dashboard(self.ledger.as_ref(), &self.prices, user_id)
            .await?;
        Ok(dashboard.summary.distribution)
    }

    /// Gain/loss for one transaction: mark-to-market for buys, realized
    /// against the prior average cost for sells.
    pub async fn get_transaction_detail(
        &self,
        user_id: &str,
        tx_id: Uuid,
    ) -> Result<TransactionDetails, CoreError> {
        let tx = self
            .ledger_service
            .get_owned(self.ledger.as_ref(), user_id, tx_id)
            .await?;

        let mut ledger = self.ledger.list_transactions(user_id).await?;
        LedgerService::sort_chronologically(&mut ledger);

        let (current_price, fallback) = match tx.transaction_type {
            TransactionType::Buy if tx.ticker != STABLE_TICKER => {
                let price = match self.prices.price(&tx.ticker).await {
                    Ok(price) => Some(price),
                    Err(e) => {
                        warn!(ticker = %tx.ticker, ?e, "price unavailable for transaction detail");
                        None
                    }
                };
                (price, HashMap::new())
            }
            TransactionType::Buy => (Some(1.0), HashMap::new()),
            TransactionType::Sell => {
                let fallback = self
                    .ledger_service
                    .fallback_prices(&ledger, &self.prices)
                    .await;
                (None, fallback)
            }
        };

        Ok(self
            .valuation_service
            .transaction_details(&tx, &ledger, current_price, &fallback))
    }

    pub async fn get_live_balance(&self, user_id: &str) -> Result<LiveBalance, CoreError> {
        self.valuation_service
            .live_balance(self.ledger.as_ref(), &self.prices, user_id)
            .await
    }

    // ── Snapshots ───────────────────────────────────────────────────

    /// Fold an externally computed reading into the user's history.
    pub async fn record_snapshot(
        &self,
        user_id: &str,
        reading: SnapshotReading,
    ) -> Result<Option<InvestmentSnapshot>, CoreError> {
        self.snapshot_service
            .record_snapshot(self.snapshots.as_ref(), user_id, reading)
            .await
    }

    pub async fn get_investment_history(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<InvestmentHistory, CoreError> {
        self.snapshot_service
            .history(self.snapshots.as_ref(), user_id, since)
            .await
    }

    pub async fn delete_snapshot(&self, user_id: &str, snapshot_id: Uuid) -> Result<(), CoreError> {
        self.snapshot_service
            .delete_snapshot(self.snapshots.as_ref(), user_id, snapshot_id)
            .await
    }

    // ── Bolsas ──────────────────────────────────────────────────────

    pub async fn create_bolsa(&self, user_id: &str, name: &str, goal: f64) -> Result<Bolsa, CoreError> {
        self.bolsa_service
            .create_bolsa(self.bolsas.as_ref(), user_id, name, goal)
            .await
    }

    pub async fn get_bolsa(&self, user_id: &str, bolsa_id: Uuid) -> Result<Bolsa, CoreError> {
        self.bolsa_service
            .get_owned(self.bolsas.as_ref(), user_id, bolsa_id)
            .await
    }

    pub async fn list_bolsas(&self, user_id: &str) -> Result<Vec<Bolsa>, CoreError> {
        self.bolsa_service
            .list_bolsas(self.bolsas.as_ref(), user_id)
            .await
    }

    pub async fn update_bolsa(
        &self,
        user_id: &str,
        bolsa_id: Uuid,
        name: Option<&str>,
        goal: Option<f64>,
    ) -> Result<Bolsa, CoreError> {
        self.bolsa_service
            .update_bolsa(self.bolsas.as_ref(), user_id, bolsa_id, name, goal)
            .await
    }

    pub async fn delete_bolsa(&self, user_id: &str, bolsa_id: Uuid) -> Result<(), CoreError> {
        self.bolsa_service
            .delete_bolsa(self.bolsas.as_ref(), user_id, bolsa_id)
            .await
    }

    pub async fn add_assets(
        &self,
        user_id: &str,
        bolsa_id: Uuid,
        assets: Vec<NewBolsaAsset>,
    ) -> Result<Bolsa, CoreError> {
        self.bolsa_service
            .add_assets(self.bolsas.as_ref(), &self.prices, user_id, bolsa_id, assets)
            .await
    }

    pub async fn remove_bolsa_asset(
        &self,
        user_id: &str,
        bolsa_id: Uuid,
        asset_id: Uuid,
    ) -> Result<Bolsa, CoreError> {
        self.bolsa_service
            .remove_asset(self.bolsas.as_ref(), user_id, bolsa_id, asset_id)
            .await
    }

    pub async fn update_bolsa_prices(&self, user_id: &str, bolsa_id: Uuid) -> Result<Bolsa, CoreError> {
        self.bolsa_service
            .update_prices(self.bolsas.as_ref(), &self.prices, user_id, bolsa_id)
            .await
    }

    pub async fn get_bolsa_progress(
        &self,
        user_id: &str,
        bolsa_id: Uuid,
    ) -> Result<BolsaProgress, CoreError> {
        self.bolsa_service
            .get_progress(self.bolsas.as_ref(), user_id, bolsa_id)
            .await
    }

    pub async fn add_bolsa_rule(
        &self,
        user_id: &str,
        bolsa_id: Uuid,
        rule: TriggerRule,
    ) -> Result<Bolsa, CoreError> {
        self.bolsa_service
            .add_rule(self.bolsas.as_ref(), user_id, bolsa_id, rule)
            .await
    }

    /// Re-price and fire rules. Returns the rules that fired now.
    pub async fn check_bolsa_rules(
        &self,
        user_id: &str,
        bolsa_id: Uuid,
    ) -> Result<Vec<TriggerRule>, CoreError> {
        self.bolsa_service
            .check_rules(self.bolsas.as_ref(), &self.prices, user_id, bolsa_id)
            .await
    }

    pub async fn complete_and_transfer(
        &self,
        user_id: &str,
        source_id: Uuid,
        target_id: Uuid,
    ) -> Result<TransferOutcome, CoreError> {
        self.bolsa_service
            .complete_and_transfer(self.bolsas.as_ref(), &self.prices, user_id, source_id, target_id)
            .await
    }

    pub async fn manage_tags(
        &self,
        user_id: &str,
        bolsa_id: Uuid,
        action: TagAction,
    ) -> Result<Bolsa, CoreError> {
        self.bolsa_service
            .manage_tags(self.bolsas.as_ref(), user_id, bolsa_id, action)
            .await
    }
}
