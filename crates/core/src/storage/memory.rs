use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::bolsa::Bolsa;
use crate::models::snapshot::InvestmentSnapshot;
use crate::models::transaction::Transaction;

use super::traits::{BolsaStore, LedgerStore, SnapshotStore};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory ledger. Rows come back in insertion order, not date order.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    rows: Mutex<Vec<Transaction>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append_transaction(&self, tx: Transaction) -> Result<(), CoreError> {
        lock(&self.rows).push(tx);
        Ok(())
    }

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<Transaction>, CoreError> {
        Ok(lock(&self.rows)
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, CoreError> {
        Ok(lock(&self.rows).iter().find(|t| t.id == id).cloned())
    }

    async fn update_transaction(&self, tx: Transaction) -> Result<(), CoreError> {
        let mut rows = lock(&self.rows);
        let slot = rows
            .iter_mut()
            .find(|t| t.id == tx.id)
            .ok_or_else(|| CoreError::NotFound {
                kind: "Transaction",
                id: tx.id.to_string(),
            })?;
        *slot = tx;
        Ok(())
    }

    async fn delete_transaction(&self, id: Uuid) -> Result<bool, CoreError> {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|t| t.id != id);
        Ok(rows.len() != before)
    }

    async fn list_user_ids(&self) -> Result<Vec<String>, CoreError> {
        let users: BTreeSet<String> = lock(&self.rows).iter().map(|t| t.user_id.clone()).collect();
        Ok(users.into_iter().collect())
    }
}

/// In-memory snapshot table keyed by `(user_id, bucket_start)`.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    rows: Mutex<HashMap<(String, DateTime<Utc>), InvestmentSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held for `user_id`.
    pub fn count_for(&self, user_id: &str) -> usize {
        lock(&self.rows).keys().filter(|(u, _)| u == user_id).count()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn find_bucket(
        &self,
        user_id: &str,
        bucket_start: DateTime<Utc>,
    ) -> Result<Option<InvestmentSnapshot>, CoreError> {
        Ok(lock(&self.rows)
            .get(&(user_id.to_string(), bucket_start))
            .cloned())
    }

    async fn upsert(&self, snapshot: InvestmentSnapshot) -> Result<(), CoreError> {
        lock(&self.rows).insert((snapshot.user_id.clone(), snapshot.date), snapshot);
        Ok(())
    }

    async fn list_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<InvestmentSnapshot>, CoreError> {
        let mut out: Vec<InvestmentSnapshot> = lock(&self.rows)
            .values()
            .filter(|s| s.user_id == user_id && s.date >= since)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.date);
        Ok(out)
    }

    async fn get_snapshot(&self, id: Uuid) -> Result<Option<InvestmentSnapshot>, CoreError> {
        Ok(lock(&self.rows).values().find(|s| s.id == id).cloned())
    }

    async fn delete_snapshot(&self, id: Uuid) -> Result<bool, CoreError> {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|_, s| s.id != id);
        Ok(rows.len() != before)
    }
}

/// In-memory bolsa table.
#[derive(Debug, Default)]
pub struct MemoryBolsaStore {
    rows: Mutex<HashMap<Uuid, Bolsa>>,
}

impl MemoryBolsaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BolsaStore for MemoryBolsaStore {
    async fn insert_bolsa(&self, bolsa: Bolsa) -> Result<(), CoreError> {
        lock(&self.rows).insert(bolsa.id, bolsa);
        Ok(())
    }

    async fn get_bolsa(&self, id: Uuid) -> Result<Option<Bolsa>, CoreError> {
        Ok(lock(&self.rows).get(&id).cloned())
    }

    async fn list_bolsas(&self, user_id: &str) -> Result<Vec<Bolsa>, CoreError> {
        let mut out: Vec<Bolsa> = lock(&self.rows)
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.created_at);
        Ok(out)
    }

    async fn save_bolsas(&self, bolsas: Vec<Bolsa>) -> Result<(), CoreError> {
        let mut rows = lock(&self.rows);
        if let Some(missing) = bolsas.iter().find(|b| !rows.contains_key(&b.id)) {
            return Err(CoreError::NotFound {
                kind: "Bolsa",
                id: missing.id.to_string(),
            });
        }
        for bolsa in bolsas {
            rows.insert(bolsa.id, bolsa);
        }
        Ok(())
    }

    async fn delete_bolsa(&self, id: Uuid) -> Result<bool, CoreError> {
        Ok(lock(&self.rows).remove(&id).is_some())
    }
}
