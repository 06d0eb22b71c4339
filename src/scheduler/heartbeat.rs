//! # Heartbeat Scheduler
//!
//! Background loop that wakes dormant cases on a schedule:
//!
//! - **Wake-ups**: for every registered follow-up case, computes days since
//!   the anchor date and fires the first milestone not yet recorded in the
//!   case's follow-up log.
//! - **Staleness sweep**: for every case in a phase with a dwell limit,
//!   surfaces a recovery nudge once per staleness episode (deduplicated by a
//!   journal marker the orchestrator writes when it processes the nudge).
//!
//! Events are always injected through the case queue manager, never the
//! orchestrator directly, preserving the per-case serialization guarantee.
//! Recovery on restart scans the store for active follow-up cases.

use crate::config::{HeartbeatConfig, StalenessConfig};
use crate::events::EventEnvelope;
use crate::queue::CaseQueueManager;
use crate::storage::CaseStore;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct MonitorInfo {
    registered_at: DateTime<Utc>,
    anchor_date: Option<String>,
    last_wakeup: Option<DateTime<Utc>>,
}

struct SchedulerInner {
    queue: Arc<CaseQueueManager>,
    case_store: Arc<CaseStore>,
    heartbeat: HeartbeatConfig,
    staleness: StalenessConfig,
    monitored: DashMap<String, MonitorInfo>,
    running: AtomicBool,
}

/// Background scheduler for wake-ups and staleness nudges.
pub struct HeartbeatScheduler {
    inner: Arc<SchedulerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatScheduler {
    pub fn new(
        queue: Arc<CaseQueueManager>,
        case_store: Arc<CaseStore>,
        heartbeat: HeartbeatConfig,
        staleness: StalenessConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue,
                case_store,
                heartbeat,
                staleness,
                monitored: DashMap::new(),
                running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the periodic loop and recover monitored cases from the store.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("HeartbeatScheduler already running");
            return;
        }

        let recovery = Arc::clone(&self.inner);
        tokio::spawn(async move {
            recovery.recover_on_startup().await;
        });

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.heartbeat.check_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; skip it
            // so the initial check happens one full interval after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                inner.check_all().await;
            }
        });
        *self.task.lock() = Some(handle);
        info!(
            check_interval_seconds = self.inner.heartbeat.check_interval_seconds,
            "HeartbeatScheduler started"
        );
    }

    /// Stop the loop.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        info!("HeartbeatScheduler stopped");
    }

    /// Register a case for wake-up scheduling.
    pub fn register(&self, case_id: impl Into<String>, anchor_date: Option<String>) {
        let case_id = case_id.into();
        info!(case_id = %case_id, "Registered case for wake-up scheduling");
        self.inner.monitored.insert(
            case_id,
            MonitorInfo {
                registered_at: Utc::now(),
                anchor_date,
                last_wakeup: None,
            },
        );
    }

    /// Remove a case from wake-up scheduling.
    pub fn unregister(&self, case_id: &str) {
        self.inner.monitored.remove(case_id);
        info!(case_id = %case_id, "Unregistered case from wake-up scheduling");
    }

    pub fn monitored_cases(&self) -> Vec<String> {
        self.inner.monitored.iter().map(|e| e.key().clone()).collect()
    }

    pub fn monitored_count(&self) -> usize {
        self.inner.monitored.len()
    }

    /// Run one full check pass immediately (operator surface and tests).
    pub async fn run_checks(&self) {
        self.inner.check_all().await;
    }
}

impl SchedulerInner {
    /// Scan the store for cases with wake-ups active and register them.
    async fn recover_on_startup(&self) {
        match self.case_store.list_follow_up_cases().await {
            Ok(case_ids) => {
                let recovered = case_ids.len();
                for case_id in case_ids {
                    match self.case_store.load(&case_id).await {
                        Ok((record, _)) => {
                            self.monitored.insert(
                                case_id,
                                MonitorInfo {
                                    registered_at: Utc::now(),
                                    anchor_date: record.follow_up.anchor_date.clone(),
                                    last_wakeup: None,
                                },
                            );
                        }
                        Err(err) => {
                            warn!(case_id = %case_id, error = %err, "Failed to recover case");
                        }
                    }
                }
                info!(recovered = recovered, "Recovered monitored cases on startup");
            }
            Err(err) => {
                error!(error = %err, "Monitoring recovery failed");
            }
        }
    }

    async fn check_all(&self) {
        // Snapshot the keys: checks may unregister while we iterate
        let case_ids: Vec<String> = self.monitored.iter().map(|e| e.key().clone()).collect();
        for case_id in case_ids {
            self.check_case(&case_id).await;
        }
        self.staleness_sweep().await;
    }

    /// Fire the first due wake-up milestone for one monitored case.
    async fn check_case(&self, case_id: &str) {
        let Ok((record, _)) = self.case_store.load(case_id).await else {
            return;
        };

        // Anything that left the follow-up phase or deactivated wake-ups
        // drops off the roster.
        if record.current_phase() != crate::state_machine::CasePhase::FollowUp
            || !record.follow_up.active
        {
            if let Some((_, info)) = self.monitored.remove(case_id) {
                debug!(
                    case_id = %case_id,
                    monitored_days = (Utc::now() - info.registered_at).num_days(),
                    "Case no longer monitored — unregistered"
                );
            }
            return;
        }

        let anchor = self
            .monitored
            .get(case_id)
            .and_then(|info| info.anchor_date.clone())
            .or_else(|| record.follow_up.anchor_date.clone());
        let Some(anchor) = anchor else {
            return;
        };

        let days_since = days_since(&anchor);
        let Some(milestone) = self.due_milestone(days_since, &record) else {
            return;
        };

        let last_wakeup = self.monitored.get(case_id).and_then(|info| info.last_wakeup);
        info!(
            case_id = %case_id,
            milestone = %milestone,
            days_since_anchor = days_since,
            last_wakeup = %last_wakeup.map(|t| t.to_rfc3339()).unwrap_or_default(),
            "⏰ Wake-up due — enqueueing"
        );
        let event = EventEnvelope::wakeup(case_id, days_since, &milestone);
        if let Err(err) = self.queue.enqueue(event) {
            error!(case_id = %case_id, error = %err, "Failed to enqueue wake-up");
            return;
        }
        if let Some(mut info) = self.monitored.get_mut(case_id) {
            info.last_wakeup = Some(Utc::now());
        }
    }

    /// First configured milestone that has been reached but never recorded
    /// in the follow-up log.
    fn due_milestone(&self, days_since: i64, record: &crate::models::CaseRecord) -> Option<String> {
        for milestone_day in &self.heartbeat.milestone_days {
            if days_since >= *milestone_day {
                let key = format!("wakeup_{milestone_day}d");
                if !record.follow_up.has_milestone(&key) {
                    return Some(key);
                }
            }
        }
        None
    }

    /// Surface a recovery nudge for every case stuck past its phase's dwell
    /// limit, at most once per staleness episode.
    async fn staleness_sweep(&self) {
        let case_ids = match self.case_store.list_case_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "Staleness sweep skipped — store listing failed");
                return;
            }
        };

        let now = Utc::now();
        for case_id in case_ids {
            let Ok((record, _)) = self.case_store.load(&case_id).await else {
                continue;
            };
            let Some(limit) = self.staleness.dwell_limit(record.current_phase()) else {
                continue;
            };
            let dwell = now - record.header.phase_entered_at;
            if dwell <= limit || record.has_staleness_marker() {
                continue;
            }

            info!(
                case_id = %case_id,
                phase = %record.current_phase(),
                dwell_hours = dwell.num_hours(),
                "Case stuck past dwell limit — surfacing recovery nudge"
            );
            let event =
                EventEnvelope::staleness_nudge(&case_id, &record.current_phase().to_string());
            if let Err(err) = self.queue.enqueue(event) {
                warn!(case_id = %case_id, error = %err, "Failed to enqueue staleness nudge");
            }
        }
    }
}

/// Whole days elapsed since a `YYYY-MM-DD` anchor date. Unparseable input
/// counts as zero days, which simply defers milestones.
fn days_since(anchor_date: &str) -> i64 {
    match NaiveDate::parse_from_str(anchor_date, "%Y-%m-%d") {
        Ok(date) => (Utc::now().date_naive() - date).num_days(),
        Err(_) => 0,
    }
}
