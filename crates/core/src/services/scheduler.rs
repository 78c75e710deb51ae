use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::errors::CoreError;
use crate::models::settings::EngineSettings;
use crate::services::price_service::PriceService;
use crate::services::snapshot_service::SnapshotService;
use crate::services::valuation_service::ValuationService;
use crate::storage::traits::{LedgerStore, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Work item sent from the timers to the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tick {
    /// Upsert the current bucket for every user
    Commit,
    /// Only widen max/min of buckets that already exist
    Sample,
}

/// Outcome of one batch over all users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: Tick,
    /// Users whose valuation produced a write
    pub processed: usize,
    /// Users with nothing to write (dropped reading, no open bucket)
    pub skipped: usize,
    /// Users whose valuation or write failed
    pub failed: usize,
}

/// Dependencies of a scheduler batch, shared with the engine.
#[derive(Clone)]
pub struct SnapshotWorker {
    pub ledger: Arc<dyn LedgerStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub prices: Arc<PriceService>,
    pub valuation: Arc<ValuationService>,
    pub snapshot_service: Arc<SnapshotService>,
}

impl SnapshotWorker {
    /// Valuate every known user and feed the snapshot store.
    ///
    /// A failure for one user is logged and counted; it never stops the batch.
    pub async fn run_tick(&self, tick: Tick) -> TickReport {
        self.run_tick_at(tick, Utc::now()).await
    }

    pub async fn run_tick_at(&self, tick: Tick, at: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            tick,
            processed: 0,
            skipped: 0,
            failed: 0,
        };

        let users = match self.ledger.list_user_ids().await {
            Ok(users) => users,
            Err(e) => {
                error!(?e, ?tick, "scheduler: cannot enumerate users");
                return report;
            }
        };

        for user_id in &users {
            match self.process_user(user_id, tick, at).await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(%user_id, ?tick, ?e, "scheduler: user skipped");
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn process_user(&self, user_id: &str, tick: Tick, at: DateTime<Utc>) -> Result<bool, CoreError> {
        let dashboard = self
            .valuation
            .dashboard(self.ledger.as_ref(), &self.prices, user_id)
            .await?;
        let reading = ValuationService::reading(&dashboard.summary);

        match tick {
            Tick::Commit => Ok(self
                .snapshot_service
                .record_snapshot_at(self.snapshots.as_ref(), user_id, reading, at)
                .await?
                .is_some()),
            Tick::Sample => {
                self.snapshot_service
                    .widen_at(self.snapshots.as_ref(), user_id, reading.total_value, at)
                    .await
            }
        }
    }
}

struct RunningTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Background loop that commits snapshots daily and samples max/min in
/// between.
///
/// Two timer tasks send `Tick`s over one channel to a single writer task,
/// so all snapshot writes from the scheduler are serialized.
pub struct SnapshotScheduler {
    worker: SnapshotWorker,
    sample_interval: Duration,
    commit_interval: Duration,
    running: Mutex<Option<RunningTasks>>,
}

impl SnapshotScheduler {
    pub fn new(worker: SnapshotWorker, settings: &EngineSettings) -> Self {
        Self {
            worker,
            sample_interval: settings.sample_interval(),
            commit_interval: settings.commit_interval(),
            running: Mutex::new(None),
        }
    }

    /// Override the sampler period (tests, fast dashboards).
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningTasks>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> SchedulerState {
        if self.running().is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Spawn the timers and the writer on the current Tokio runtime.
    pub fn start(&self) -> Result<(), CoreError> {
        let mut running = self.running();
        if running.is_some() {
            return Err(CoreError::SchedulerState("scheduler already running".into()));
        }
        tokio::runtime::Handle::try_current()
            .map_err(|_| CoreError::SchedulerState("no Tokio runtime".into()))?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (tick_tx, tick_rx) = mpsc::channel::<Tick>(16);

        let first_commit = Instant::now() + until_next_midnight(Utc::now());
        let handles = vec![
            tokio::spawn(commit_timer(
                tick_tx.clone(),
                shutdown_rx.clone(),
                first_commit,
                self.commit_interval,
            )),
            tokio::spawn(sample_timer(
                tick_tx,
                shutdown_rx.clone(),
                self.sample_interval,
            )),
            tokio::spawn(writer(self.worker.clone(), tick_rx, shutdown_rx)),
        ];

        *running = Some(RunningTasks { shutdown, handles });
        info!(
            sample_secs = self.sample_interval.as_secs_f64(),
            commit_secs = self.commit_interval.as_secs_f64(),
            "scheduler: started"
        );
        Ok(())
    }

    /// Signal shutdown and wait for the tasks. A batch already running is
    /// allowed to finish. Stopping a stopped scheduler is a no-op.
    pub async fn stop(&self) {
        let Some(tasks) = self.running().take() else {
            return;
        };
        let _ = tasks.shutdown.send(true);
        for handle in tasks.handles {
            if let Err(e) = handle.await {
                error!(?e, "scheduler: task ended abnormally");
            }
        }
        info!("scheduler: stopped");
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        if let Some(tasks) = self.running().take() {
            let _ = tasks.shutdown.send(true);
        }
    }
}

/// Time left until the next UTC midnight.
pub fn until_next_midnight(now: DateTime<Utc>) -> Duration {
    let next = now
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());
    match next {
        Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
        None => Duration::from_secs(24 * 60 * 60),
    }
}

async fn commit_timer(
    tx: mpsc::Sender<Tick>,
    mut shutdown: watch::Receiver<bool>,
    first: Instant,
    period: Duration,
) {
    tokio::select! {
        _ = sleep_until(first) => {}
        _ = shutdown.changed() => return,
    }
    if tx.send(Tick::Commit).await.is_err() {
        return;
    }

    let mut ticker = interval_at(first + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if tx.send(Tick::Commit).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn sample_timer(tx: mpsc::Sender<Tick>, mut shutdown: watch::Receiver<bool>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A full channel means the writer is behind; drop this sample.
                if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(Tick::Sample) {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn writer(worker: SnapshotWorker, mut rx: mpsc::Receiver<Tick>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            maybe_tick = rx.recv() => {
                match maybe_tick {
                    Some(tick) => {
                        let report = worker.run_tick(tick).await;
                        info!(?tick, processed = report.processed, skipped = report.skipped, failed = report.failed, "scheduler: batch done");
                    }
                    None => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
