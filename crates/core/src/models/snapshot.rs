use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Width of the window used to deduplicate snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketInterval {
    /// One record per UTC calendar day
    #[default]
    Day,
    /// One record per N-minute window, aligned to midnight UTC
    Minutes(u32),
}

impl BucketInterval {
    /// Start of the bucket containing `at`.
    pub fn bucket_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = Utc.from_utc_datetime(&at.date_naive().and_time(chrono::NaiveTime::MIN));
        match *self {
            BucketInterval::Day => midnight,
            BucketInterval::Minutes(0) => at,
            BucketInterval::Minutes(n) => {
                let width = i64::from(n) * 60;
                let elapsed = (at - midnight).num_seconds();
                midnight + chrono::Duration::seconds(elapsed - elapsed % width)
            }
        }
    }
}

/// One valuation reading to be folded into the snapshot history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotReading {
    pub total_value: f64,
    pub total_invested: f64,
    pub profit: f64,
    pub profit_percentage: f64,
}

impl SnapshotReading {
    /// Readings with non-positive totals come from degraded pricing and are
    /// kept out of the history.
    pub fn is_recordable(&self) -> bool {
        self.total_value > 0.0
            && self.total_invested > 0.0
            && self.total_value.is_finite()
            && self.total_invested.is_finite()
    }
}

/// Persisted point-in-time valuation for one (user, bucket).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentSnapshot {
    pub id: Uuid,
    pub user_id: String,
    /// Start of the bucket this record covers
    pub date: DateTime<Utc>,
    /// Time of the latest reading folded into this record
    pub updated_at: DateTime<Utc>,
    pub total_value: f64,
    pub total_invested: f64,
    pub profit: f64,
    pub profit_percentage: f64,
    pub max_value: f64,
    pub min_value: f64,
}

impl InvestmentSnapshot {
    /// First record of a bucket; the envelope starts at the reading itself.
    pub fn open(
        user_id: impl Into<String>,
        bucket: DateTime<Utc>,
        reading: &SnapshotReading,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            date: bucket,
            updated_at: at,
            total_value: reading.total_value,
            total_invested: reading.total_invested,
            profit: reading.profit,
            profit_percentage: reading.profit_percentage,
            max_value: reading.total_value,
            min_value: reading.total_value,
        }
    }

    /// Take the latest figures and widen the max/min envelope.
    pub fn absorb(&mut self, reading: &SnapshotReading, at: DateTime<Utc>) {
        self.total_value = reading.total_value;
        self.total_invested = reading.total_invested;
        self.profit = reading.profit;
        self.profit_percentage = reading.profit_percentage;
        self.widen(reading.total_value);
        self.updated_at = at;
    }

    /// Widen max/min only. Returns true when the envelope changed.
    pub fn widen(&mut self, value: f64) -> bool {
        let (max, min) = (self.max_value, self.min_value);
        self.max_value = self.max_value.max(value);
        self.min_value = self.min_value.min(value);
        max != self.max_value || min != self.min_value
    }
}

/// One point of the historical value chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyValue {
    pub date: NaiveDate,
    pub total_value: f64,
    /// Change against the previous point's value, in percent
    pub change_percentage: f64,
}

/// Chart series plus the trend over the whole window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentHistory {
    pub user_id: String,
    pub since: DateTime<Utc>,
    pub points: Vec<DailyValue>,
    pub trend_percentage: f64,
}
