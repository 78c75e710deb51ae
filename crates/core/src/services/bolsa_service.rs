use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::bolsa::{
    AssetInBolsa, Bolsa, BolsaProgress, NewBolsaAsset, ProgressStatus, RuleType, TagAction,
    TransferOutcome, TriggerRule,
};
use crate::services::price_service::PriceService;
use crate::storage::traits::BolsaStore;

/// Goal buckets: their assets, pricing, progress, one-shot rules and the
/// transfer of value above the goal into another bucket.
///
/// Every pricing step asks the oracle once for all distinct tickers. A
/// ticker the oracle cannot price is valued at its purchase price.
pub struct BolsaService;

impl BolsaService {
    pub fn new() -> Self {
        Self
    }

    // ── CRUD ────────────────────────────────────────────────────────

    pub async fn create_bolsa(
        &self,
        store: &dyn BolsaStore,
        user_id: &str,
        name: &str,
        goal: f64,
    ) -> Result<Bolsa, CoreError> {
        let name = validate_name(name)?;
        validate_goal(goal)?;
        let bolsa = Bolsa::new(user_id, name, goal);
        store.insert_bolsa(bolsa.clone()).await?;
        info!(user_id, bolsa_id = %bolsa.id, "bolsa created");
        Ok(bolsa)
    }

    /// Fetch a bolsa owned by `user_id`.
    pub async fn get_owned(
        &self,
        store: &dyn BolsaStore,
        user_id: &str,
        bolsa_id: Uuid,
    ) -> Result<Bolsa, CoreError> {
        let bolsa = store
            .get_bolsa(bolsa_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                kind: "Bolsa",
                id: bolsa_id.to_string(),
            })?;
        if bolsa.user_id != user_id {
            return Err(CoreError::Forbidden {
                kind: "Bolsa",
                id: bolsa_id.to_string(),
            });
        }
        Ok(bolsa)
    }

    pub async fn list_bolsas(
        &self,
        store: &dyn BolsaStore,
        user_id: &str,
    ) -> Result<Vec<Bolsa>, CoreError> {
        store.list_bolsas(user_id).await
    }

    /// Rename and/or re-target a bolsa.
    pub async fn update_bolsa(
        &self,
        store: &dyn BolsaStore,
        user_id: &str,
        bolsa_id: Uuid,
        name: Option<&str>,
        goal: Option<f64>,
    ) -> Result<Bolsa, CoreError> {
        let mut bolsa = self.get_owned(store, user_id, bolsa_id).await?;
        if let Some(name) = name {
            bolsa.name = validate_name(name)?;
        }
        if let Some(goal) = goal {
            validate_goal(goal)?;
            bolsa.goal = goal;
        }
        self.save(store, bolsa).await
    }

    pub async fn delete_bolsa(
        &self,
        store: &dyn BolsaStore,
        user_id: &str,
        bolsa_id: Uuid,
    ) -> Result<(), CoreError> {
        self.get_owned(store, user_id, bolsa_id).await?;
        store.delete_bolsa(bolsa_id).await?;
        info!(user_id, %bolsa_id, "bolsa deleted");
        Ok(())
    }

    async fn save(&self, store: &dyn BolsaStore, mut bolsa: Bolsa) -> Result<Bolsa, CoreError> {
        bolsa.updated_at = Utc::now();
        store.save_bolsas(vec![bolsa.clone()]).await?;
        Ok(bolsa)
    }

    // ── Assets & pricing ────────────────────────────────────────────

    /// Add positions and re-price the whole bolsa with one oracle call.
    pub async fn add_assets(
        &self,
        store: &dyn BolsaStore,
        prices: &PriceService,
        user_id: &str,
        bolsa_id: Uuid,
        assets: Vec<NewBolsaAsset>,
    ) -> Result<Bolsa, CoreError> {
        if assets.is_empty() {
            return Err(CoreError::ValidationError("No assets to add".into()));
        }
        for asset in &assets {
            validate_asset(asset)?;
        }

        let mut bolsa = self.get_owned(store, user_id, bolsa_id).await?;
        bolsa
            .assets
            .extend(assets.iter().map(AssetInBolsa::new));

        let quoted = prices.prices(&bolsa.tickers()).await;
        self.reprice(&mut bolsa, &quoted);
        self.save(store, bolsa).await
    }

    pub async fn remove_asset(
        &self,
        store: &dyn BolsaStore,
        user_id: &str,
        bolsa_id: Uuid,
        asset_id: Uuid,
    ) -> Result<Bolsa, CoreError> {
        let mut bolsa = self.get_owned(store, user_id, bolsa_id).await?;
        let before = bolsa.assets.len();
        bolsa.assets.retain(|a| a.id != asset_id);
        if bolsa.assets.len() == before {
            return Err(CoreError::NotFound {
                kind: "Asset",
                id: asset_id.to_string(),
            });
        }
        bolsa.recompute_value();
        self.save(store, bolsa).await
    }

    /// Apply a price map to every asset and re-sum the bolsa.
    /// Tickers missing from the map fall back to their purchase price.
    pub fn reprice(&self, bolsa: &mut Bolsa, prices: &HashMap<String, f64>) {
        for asset in &mut bolsa.assets {
            let price = match prices.get(&asset.ticker) {
                Some(price) => *price,
                None => {
                    warn!(ticker = %asset.ticker, bolsa_id = %bolsa.id, "price unavailable, using purchase price");
                    asset.purchase_price
                }
            };
            asset.reprice(price);
        }
        bolsa.recompute_value();
    }

    /// Re-price every distinct ticker of a bolsa and persist it.
    pub async fn update_prices(
        &self,
        store: &dyn BolsaStore,
        prices: &PriceService,
        user_id: &str,
        bolsa_id: Uuid,
    ) -> Result<Bolsa, CoreError> {
        let mut bolsa = self.get_owned(store, user_id, bolsa_id).await?;
        let quoted = prices.prices(&bolsa.tickers()).await;
        self.reprice(&mut bolsa, &quoted);
        self.save(store, bolsa).await
    }

    // ── Progress & rules ────────────────────────────────────────────

    pub fn progress(&self, bolsa: &Bolsa) -> BolsaProgress {
        BolsaProgress::compute(bolsa.id, bolsa.current_value, bolsa.goal)
    }

    /// Progress from the stored value, without re-pricing.
    pub async fn get_progress(
        &self,
        store: &dyn BolsaStore,
        user_id: &str,
        bolsa_id: Uuid,
    ) -> Result<BolsaProgress, CoreError> {
        let bolsa = self.get_owned(store, user_id, bolsa_id).await?;
        Ok(self.progress(&bolsa))
    }

    pub async fn add_rule(
        &self,
        store: &dyn BolsaStore,
        user_id: &str,
        bolsa_id: Uuid,
        mut rule: TriggerRule,
    ) -> Result<Bolsa, CoreError> {
        rule.ticker = rule.ticker.map(|t| t.trim().to_uppercase());
        if !rule.target_value.is_finite() || rule.target_value <= 0.0 {
            return Err(CoreError::ValidationError(
                "Rule target must be positive".into(),
            ));
        }
        if rule.rule_type == RuleType::PriceReached
            && rule.ticker.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            return Err(CoreError::ValidationError(
                "Price rules need a ticker".into(),
            ));
        }
        let mut bolsa = self.get_owned(store, user_id, bolsa_id).await?;
        bolsa.rules.push(rule);
        self.save(store, bolsa).await
    }

    /// Latch every armed rule whose condition holds. Returns the rules that
    /// fired in this call.
    ///
    /// `prices` is only consulted for `PriceReached` rules.
    pub fn evaluate_rules(
        &self,
        bolsa: &mut Bolsa,
        prices: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Vec<TriggerRule> {
        let current_value = bolsa.current_value;
        let mut fired = Vec::new();
        for rule in bolsa.rules.iter_mut().filter(|r| r.is_armed()) {
            let reached = match rule.rule_type {
                RuleType::ValueReached => current_value >= rule.target_value,
                RuleType::PriceReached => rule
                    .ticker
                    .as_ref()
                    .and_then(|t| prices.get(t))
                    .is_some_and(|p| *p >= rule.target_value),
            };
            if reached {
                rule.triggered = true;
                rule.triggered_at = Some(now);
                fired.push(rule.clone());
            }
        }
        fired
    }

    /// Re-price the bolsa and fire any rules whose condition now holds.
    ///
    /// Triggered rules stay triggered even if the value later drops.
    pub async fn check_rules(
        &self,
        store: &dyn BolsaStore,
        prices: &PriceService,
        user_id: &str,
        bolsa_id: Uuid,
    ) -> Result<Vec<TriggerRule>, CoreError> {
        let mut bolsa = self.get_owned(store, user_id, bolsa_id).await?;

        let mut tickers = bolsa.tickers();
        for ticker in bolsa.rules.iter().filter(|r| r.is_armed()).filter_map(|r| r.ticker.clone()) {
            if !tickers.contains(&ticker) {
                tickers.push(ticker);
            }
        }
        let quoted = prices.prices(&tickers).await;
        self.reprice(&mut bolsa, &quoted);

        let fired = self.evaluate_rules(&mut bolsa, &quoted, Utc::now());
        for rule in &fired {
            info!(user_id, %bolsa_id, rule_id = %rule.id, target = rule.target_value, "rule triggered");
        }
        self.save(store, bolsa).await?;
        Ok(fired)
    }

    // ── Excess transfer ─────────────────────────────────────────────

    /// Split off the value above the goal, proportionally from every asset.
    ///
    /// Returns the fraction moved and the synthesized excess assets, or
    /// `None` when the goal is not exceeded. `source` keeps the remainder.
    pub fn split_excess(&self, source: &mut Bolsa) -> Option<(f64, f64, Vec<AssetInBolsa>)> {
        let progress = self.progress(source);
        if progress.status != ProgressStatus::Exceeded || source.current_value <= 0.0 {
            return None;
        }
        let excess_amount = source.current_value - source.goal;
        let fraction = excess_amount / source.current_value;

        let mut moved = Vec::with_capacity(source.assets.len());
        for asset in &mut source.assets {
            let mut part = asset.clone();
            part.id = Uuid::new_v4();
            part.scale(fraction);
            asset.scale(1.0 - fraction);
            if part.amount > 0.0 {
                moved.push(part);
            }
        }
        source.recompute_value();
        Some((excess_amount, fraction, moved))
    }

    /// Move the value above `source`'s goal into `target`.
    ///
    /// Both bolsas are re-priced with one oracle call, the split is computed
    /// on copies, and both are written in a single store call.
    pub async fn complete_and_transfer(
        &self,
        store: &dyn BolsaStore,
        prices: &PriceService,
        user_id: &str,
        source_id: Uuid,
        target_id: Uuid,
    ) -> Result<TransferOutcome, CoreError> {
        if source_id == target_id {
            return Err(CoreError::ValidationError(
                "Source and target bolsa must differ".into(),
            ));
        }
        let mut source = self.get_owned(store, user_id, source_id).await?;
        let mut target = self.get_owned(store, user_id, target_id).await?;

        let mut tickers = source.tickers();
        for ticker in target.tickers() {
            if !tickers.contains(&ticker) {
                tickers.push(ticker);
            }
        }
        let quoted = prices.prices(&tickers).await;
        self.reprice(&mut source, &quoted);
        self.reprice(&mut target, &quoted);

        let (excess_amount, excess_fraction, moved_assets) =
            self.split_excess(&mut source).ok_or_else(|| {
                CoreError::ValidationError(format!(
                    "Bolsa {source_id} has not exceeded its goal"
                ))
            })?;

        target.assets.extend(moved_assets.iter().cloned());
        target.recompute_value();

        let now = Utc::now();
        source.updated_at = now;
        target.updated_at = now;
        store
            .save_bolsas(vec![source.clone(), target.clone()])
            .await?;

        info!(user_id, %source_id, %target_id, excess_amount, "excess transferred");
        Ok(TransferOutcome {
            source,
            target,
            excess_amount,
            excess_fraction,
            moved_assets,
        })
    }

    // ── Tags ────────────────────────────────────────────────────────

    /// Edit a bolsa's tags. Tags are trimmed, lowercased and deduplicated.
    pub async fn manage_tags(
        &self,
        store: &dyn BolsaStore,
        user_id: &str,
        bolsa_id: Uuid,
        action: TagAction,
    ) -> Result<Bolsa, CoreError> {
        let mut bolsa = self.get_owned(store, user_id, bolsa_id).await?;
        bolsa.tags = apply_tags(&bolsa.tags, action);
        self.save(store, bolsa).await
    }
}

impl Default for BolsaService {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure tag edit used by `manage_tags`.
pub fn apply_tags(current: &[String], action: TagAction) -> Vec<String> {
    fn push_unique(out: &mut Vec<String>, tags: Vec<String>) {
        for tag in tags {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && !out.contains(&tag) {
                out.push(tag);
            }
        }
    }

    let mut out = Vec::new();
    match action {
        TagAction::Add(tags) => {
            push_unique(&mut out, current.to_vec());
            push_unique(&mut out, tags);
        }
        TagAction::Remove(tags) => {
            let remove: Vec<String> = tags.iter().map(|t| t.trim().to_lowercase()).collect();
            push_unique(
                &mut out,
                current
                    .iter()
                    .filter(|t| !remove.contains(&t.trim().to_lowercase()))
                    .cloned()
                    .collect(),
            );
        }
        TagAction::Replace(tags) => push_unique(&mut out, tags),
    }
    out
}

fn validate_name(name: &str) -> Result<String, CoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::ValidationError("Bolsa name must not be empty".into()));
    }
    Ok(name.to_string())
}

fn validate_goal(goal: f64) -> Result<(), CoreError> {
    if !goal.is_finite() || goal <= 0.0 {
        return Err(CoreError::ValidationError("Goal must be positive".into()));
    }
    Ok(())
}

fn validate_asset(asset: &NewBolsaAsset) -> Result<(), CoreError> {
    if asset.ticker.trim().is_empty() {
        return Err(CoreError::ValidationError("Ticker must not be empty".into()));
    }
    if !asset.amount.is_finite() || asset.amount <= 0.0 {
        return Err(CoreError::ValidationError(
            "Asset amount must be positive".into(),
        ));
    }
    if !asset.purchase_price.is_finite() || asset.purchase_price < 0.0 {
        return Err(CoreError::ValidationError(
            "Purchase price must not be negative".into(),
        ));
    }
    Ok(())
}
