use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::bolsa::Bolsa;
use crate::models::snapshot::InvestmentSnapshot;
use crate::models::transaction::Transaction;

/// Persistence of the per-user transaction ledger.
///
/// Implementations may return rows in any order; callers sort before replay.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append_transaction(&self, tx: Transaction) -> Result<(), CoreError>;

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<Transaction>, CoreError>;

    /// Look up a transaction by id regardless of owner.
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, CoreError>;

    /// Replace a stored transaction. Errors with `NotFound` for unknown ids.
    async fn update_transaction(&self, tx: Transaction) -> Result<(), CoreError>;

    /// Remove a transaction. Returns false when it did not exist.
    async fn delete_transaction(&self, id: Uuid) -> Result<bool, CoreError>;

    /// Every user that owns at least one transaction.
    async fn list_user_ids(&self) -> Result<Vec<String>, CoreError>;
}

/// Persistence of bucketed value snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// The record for `(user_id, bucket_start)`, if any.
    async fn find_bucket(
        &self,
        user_id: &str,
        bucket_start: DateTime<Utc>,
    ) -> Result<Option<InvestmentSnapshot>, CoreError>;

    /// Insert or replace the record keyed by `(user_id, date)`.
    async fn upsert(&self, snapshot: InvestmentSnapshot) -> Result<(), CoreError>;

    /// Records with `date >= since`, oldest first.
    async fn list_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<InvestmentSnapshot>, CoreError>;

    async fn get_snapshot(&self, id: Uuid) -> Result<Option<InvestmentSnapshot>, CoreError>;

    async fn delete_snapshot(&self, id: Uuid) -> Result<bool, CoreError>;
}

/// Persistence of goal buckets.
#[async_trait]
pub trait BolsaStore: Send + Sync {
    async fn insert_bolsa(&self, bolsa: Bolsa) -> Result<(), CoreError>;

    async fn get_bolsa(&self, id: Uuid) -> Result<Option<Bolsa>, CoreError>;

    async fn list_bolsas(&self, user_id: &str) -> Result<Vec<Bolsa>, CoreError>;

    /// Replace several bolsas at once. Either all are written or none is.
    async fn save_bolsas(&self, bolsas: Vec<Bolsa>) -> Result<(), CoreError>;

    async fn delete_bolsa(&self, id: Uuid) -> Result<bool, CoreError>;
}
