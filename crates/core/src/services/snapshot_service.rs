use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::snapshot::{
    BucketInterval, DailyValue, InvestmentHistory, InvestmentSnapshot, SnapshotReading,
};
use crate::storage::traits::SnapshotStore;

/// Maintains one snapshot per (user, bucket) and rebuilds daily value series.
///
/// All writes go through a single async lock, so the scheduler's sampler,
/// its daily commit and dashboard reads never lose each other's updates.
pub struct SnapshotService {
    bucket: BucketInterval,
    write_lock: Mutex<()>,
}

impl SnapshotService {
    pub fn new(bucket: BucketInterval) -> Self {
        Self {
            bucket,
            write_lock: Mutex::new(()),
        }
    }

    /// Record a reading taken now.
    pub async fn record_snapshot(
        &self,
        store: &dyn SnapshotStore,
        user_id: &str,
        reading: SnapshotReading,
    ) -> Result<Option<InvestmentSnapshot>, CoreError> {
        self.record_snapshot_at(store, user_id, reading, Utc::now())
            .await
    }

    /// Fold a reading taken at `at` into its bucket.
    ///
    /// Returns `None` without writing when the reading has a non-positive
    /// value or invested total.
    pub async fn record_snapshot_at(
        &self,
        store: &dyn SnapshotStore,
        user_id: &str,
        reading: SnapshotReading,
        at: DateTime<Utc>,
    ) -> Result<Option<InvestmentSnapshot>, CoreError> {
        if !reading.is_recordable() {
            debug!(user_id, value = reading.total_value, invested = reading.total_invested, "snapshot dropped");
            return Ok(None);
        }

        let bucket = self.bucket.bucket_start(at);
        let _guard = self.write_lock.lock().await;

        let snapshot = match store.find_bucket(user_id, bucket).await? {
            Some(mut existing) => {
                existing.absorb(&reading, at);
                existing
            }
            None => InvestmentSnapshot::open(user_id, bucket, &reading, at),
        };
        store.upsert(snapshot.clone()).await?;
        Ok(Some(snapshot))
    }

    /// Widen the max/min of the bucket containing `at`, never creating one.
    /// Returns true when a record was changed.
    pub async fn widen_at(
        &self,
        store: &dyn SnapshotStore,
        user_id: &str,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        if !value.is_finite() || value <= 0.0 {
            return Ok(false);
        }

        let bucket = self.bucket.bucket_start(at);
        let _guard = self.write_lock.lock().await;

        let Some(mut existing) = store.find_bucket(user_id, bucket).await? else {
            return Ok(false);
        };
        if !existing.widen(value) {
            return Ok(false);
        }
        store.upsert(existing).await?;
        Ok(true)
    }

    /// One point per calendar day since `since`, oldest first.
    ///
    /// When a day holds several records the latest one wins. Each point
    /// carries its change against the previous day's value.
    pub async fn query_since(
        &self,
        store: &dyn SnapshotStore,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DailyValue>, CoreError> {
        let snapshots = store.list_since(user_id, since).await?;

        let mut by_day: BTreeMap<NaiveDate, InvestmentSnapshot> = BTreeMap::new();
        for snapshot in snapshots {
            let day = snapshot.date.date_naive();
            match by_day.get(&day) {
                Some(kept) if (kept.date, kept.updated_at) >= (snapshot.date, snapshot.updated_at) => {}
                _ => {
                    by_day.insert(day, snapshot);
                }
            }
        }

        let mut points = Vec::with_capacity(by_day.len());
        let mut previous: Option<f64> = None;
        for (date, snapshot) in by_day {
            let change_percentage = match previous {
                Some(prev) if prev != 0.0 => (snapshot.total_value - prev) / prev * 100.0,
                _ => 0.0,
            };
            points.push(DailyValue {
                date,
                total_value: snapshot.total_value,
                change_percentage,
            });
            previous = Some(snapshot.total_value);
        }
        Ok(points)
    }

    /// Change from the first to the last point, in percent.
    pub fn trend_percentage(points: &[DailyValue]) -> f64 {
        match (points.first(), points.last()) {
            (Some(first), Some(last)) if points.len() >= 2 && first.total_value != 0.0 => {
                (last.total_value - first.total_value) / first.total_value * 100.0
            }
            _ => 0.0,
        }
    }

    /// Daily series plus its overall trend.
    pub async fn history(
        &self,
        store: &dyn SnapshotStore,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<InvestmentHistory, CoreError> {
        let points = self.query_since(store, user_id, since).await?;
        let trend_percentage = Self::trend_percentage(&points);
        Ok(InvestmentHistory {
            user_id: user_id.to_string(),
            since,
            points,
            trend_percentage,
        })
    }

    /// Delete one of the user's snapshots.
    pub async fn delete_snapshot(
        &self,
        store: &dyn SnapshotStore,
        user_id: &str,
        snapshot_id: Uuid,
    ) -> Result<(), CoreError> {
        let snapshot = store
            .get_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                kind: "Snapshot",
                id: snapshot_id.to_string(),
            })?;
        if snapshot.user_id != user_id {
            return Err(CoreError::Forbidden {
                kind: "Snapshot",
                id: snapshot_id.to_string(),
            });
        }
        let _guard = self.write_lock.lock().await;
        store.delete_snapshot(snapshot_id).await?;
        Ok(())
    }
}

impl Default for SnapshotService {
    fn default() -> Self {
        Self::new(BucketInterval::Day)
    }
}
