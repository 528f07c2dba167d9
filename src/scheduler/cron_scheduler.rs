//! In-process cron scheduler.
//!
//! Entries live in a lock-guarded map. A background loop wakes at the
//! earliest due tick (capped by the configured tick interval), collects due
//! signals and forwards them over an mpsc channel. Registration changes wake
//! the loop early.

use super::{JobSignal, ScheduleError, ScheduleId, ScheduleResult, Scheduler};
use crate::conditions::CronSpec;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Snapshot of one registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub schedule_id: ScheduleId,
    pub spec: CronSpec,
    pub signal: JobSignal,
    pub enabled: bool,
    pub next_tick: Option<DateTime<Utc>>,
}

struct Entry {
    spec: CronSpec,
    schedule: cron::Schedule,
    signal: JobSignal,
    enabled: bool,
    next_tick: Option<DateTime<Utc>>,
}

impl Entry {
    fn snapshot(&self, schedule_id: ScheduleId) -> ScheduleEntry {
        ScheduleEntry {
            schedule_id,
            spec: self.spec.clone(),
            signal: self.signal,
            enabled: self.enabled,
            next_tick: self.next_tick,
        }
    }
}

pub struct CronScheduler {
    entries: Arc<RwLock<HashMap<ScheduleId, Entry>>>,
    notify: Arc<Notify>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    tick_interval: Duration,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler")
            .field("entries", &self.entries.read().len())
            .field("tick_interval", &self.tick_interval)
            .finish()
    }
}

impl CronScheduler {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
            tick_interval,
        }
    }

    /// Collect the signals of every enabled entry due at `now` and advance
    /// their next tick. Disabled entries never fire.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<JobSignal> {
        Self::collect_due(&self.entries, now).0
    }

    fn collect_due(
        entries: &RwLock<HashMap<ScheduleId, Entry>>,
        now: DateTime<Utc>,
    ) -> (Vec<JobSignal>, Option<DateTime<Utc>>) {
        let mut due = Vec::new();
        let mut earliest: Option<DateTime<Utc>> = None;

        let mut entries = entries.write();
        for entry in entries.values_mut() {
            if !entry.enabled {
                continue;
            }
            if let Some(next) = entry.next_tick {
                if next <= now {
                    due.push(entry.signal);
                    entry.next_tick = entry.schedule.after(&now).next();
                }
            }
            if let Some(next) = entry.next_tick {
                earliest = Some(earliest.map_or(next, |e| e.min(next)));
            }
        }
        (due, earliest)
    }

    /// Spawn the tick loop, forwarding due signals to `sender`.
    pub fn start(&self, sender: mpsc::UnboundedSender<JobSignal>) -> ScheduleResult<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Err(ScheduleError::AlreadyRunning);
        }

        let entries = Arc::clone(&self.entries);
        let notify = Arc::clone(&self.notify);
        let shutdown = self.shutdown.clone();
        let tick_interval = self.tick_interval;

        *handle = Some(tokio::spawn(async move {
            info!("Cron scheduler started");
            loop {
                let now = Utc::now();
                let (due, earliest) = Self::collect_due(&entries, now);
                for signal in due {
                    debug!(job_id = %signal.job_id, kind = %signal.kind, "Schedule fired");
                    if sender.send(signal).is_err() {
                        warn!("Signal receiver dropped; stopping cron scheduler");
                        return;
                    }
                }

                let sleep_for = earliest
                    .and_then(|next| (next - now).to_std().ok())
                    .map_or(tick_interval, |until| until.min(tick_interval));

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            }
            info!("Cron scheduler stopped");
        }));
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cron scheduler loop ended abnormally");
            }
        }
    }

    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.entries
            .read()
            .iter()
            .map(|(id, entry)| entry.snapshot(*id))
            .collect()
    }

    pub fn entry(&self, schedule_id: ScheduleId) -> Option<ScheduleEntry> {
        self.entries
            .read()
            .get(&schedule_id)
            .map(|entry| entry.snapshot(schedule_id))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Scheduler for CronScheduler {
    fn register_recurring(
        &self,
        spec: &CronSpec,
        signal: JobSignal,
        enabled: bool,
    ) -> ScheduleResult<ScheduleId> {
        let schedule = spec.to_schedule()?;
        let schedule_id = ScheduleId::new();
        let next_tick = schedule.upcoming(Utc).next();

        self.entries.write().insert(
            schedule_id,
            Entry {
                spec: spec.clone(),
                schedule,
                signal,
                enabled,
                next_tick,
            },
        );
        self.notify.notify_one();

        debug!(
            schedule_id = %schedule_id,
            job_id = %signal.job_id,
            kind = %signal.kind,
            crontab = %spec,
            enabled,
            "Registered recurring schedule"
        );
        Ok(schedule_id)
    }

    fn set_enabled(&self, schedule_id: ScheduleId, enabled: bool) -> ScheduleResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&schedule_id)
            .ok_or(ScheduleError::NotRegistered(schedule_id))?;

        if entry.enabled != enabled {
            entry.enabled = enabled;
            // a re-enabled entry must not fire for ticks missed while disabled
            if enabled {
                entry.next_tick = entry.schedule.upcoming(Utc).next();
            }
            self.notify.notify_one();
        }
        Ok(())
    }

    fn is_enabled(&self, schedule_id: ScheduleId) -> Option<bool> {
        self.entries.read().get(&schedule_id).map(|e| e.enabled)
    }

    fn unregister(&self, schedule_id: ScheduleId) -> bool {
        let removed = self.entries.write().remove(&schedule_id).is_some();
        if removed {
            self.notify.notify_one();
        }
        removed
    }
}
