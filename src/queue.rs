//! # Case Queue Manager
//!
//! Serialises events per case: one FIFO queue and one dedicated worker task
//! per case id, created lazily on first use. The worker drains its queue
//! strictly in arrival order, awaiting each event to completion before
//! starting the next — the sole mechanism guaranteeing no two events for the
//! same case are ever processed concurrently. Events for different cases
//! have no ordering relationship and run fully in parallel.
//!
//! Idle queues are torn down by a background reaper after a configurable
//! timeout.

use crate::config::QueueConfig;
use crate::error::{CaseflowError, Result};
use crate::events::EventEnvelope;
use crate::orchestration::{OrchestratorCore, OutboundResponse};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The processing seam between the queue manager and the orchestrator.
/// The heartbeat scheduler and entry points talk to the queue; only the
/// queue's workers talk to the processor.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: EventEnvelope) -> Result<Vec<OutboundResponse>>;
}

#[async_trait]
impl EventProcessor for OrchestratorCore {
    async fn process(&self, event: EventEnvelope) -> Result<Vec<OutboundResponse>> {
        self.process_event(event).await
    }
}

struct CaseQueue {
    sender: mpsc::UnboundedSender<EventEnvelope>,
    worker: JoinHandle<()>,
    depth: Arc<AtomicUsize>,
    /// Epoch seconds of the last enqueue or processing start
    last_activity: Arc<AtomicI64>,
}

/// Manages one queue + worker pair per case id.
pub struct CaseQueueManager {
    processor: Arc<dyn EventProcessor>,
    config: QueueConfig,
    queues: Arc<DashMap<String, CaseQueue>>,
    running: Arc<AtomicBool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl CaseQueueManager {
    pub fn new(processor: Arc<dyn EventProcessor>, config: QueueConfig) -> Self {
        Self {
            processor,
            config,
            queues: Arc::new(DashMap::new()),
            running: Arc::new(AtomicBool::new(true)),
            reaper: Mutex::new(None),
        }
    }

    /// Start the idle-queue reaper. Enqueueing works without this; only
    /// queue cleanup depends on it.
    pub fn start(&self) {
        let queues = Arc::clone(&self.queues);
        let running = Arc::clone(&self.running);
        let idle_timeout = self.config.idle_timeout();
        let interval = self.config.reaper_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let now = Utc::now().timestamp();
                let idle: Vec<String> = queues
                    .iter()
                    .filter(|entry| {
                        let queue = entry.value();
                        queue.depth.load(Ordering::SeqCst) == 0
                            && now - queue.last_activity.load(Ordering::SeqCst)
                                > idle_timeout.as_secs() as i64
                    })
                    .map(|entry| entry.key().clone())
                    .collect();
                for case_id in idle {
                    info!(case_id = %case_id, "Cleaning up idle case queue");
                    // Dropping the sender closes the channel; the worker
                    // drains anything that raced in and exits.
                    queues.remove(&case_id);
                }
            }
        });
        *self.reaper.lock() = Some(handle);
        info!(
            idle_timeout_seconds = self.config.idle_timeout_seconds,
            "CaseQueueManager started"
        );
    }

    /// Gracefully stop: refuse new events, close every queue, and wait for
    /// the workers to drain what they already accepted.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }

        let case_ids: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        for case_id in case_ids {
            if let Some((_, queue)) = self.queues.remove(&case_id) {
                let CaseQueue { sender, worker, .. } = queue;
                drop(sender);
                if let Err(err) = worker.await {
                    if !err.is_cancelled() {
                        error!(case_id = %case_id, error = %err, "Worker ended abnormally");
                    }
                }
            }
        }
        info!("CaseQueueManager stopped");
    }

    /// Add an event to its case's queue, creating the queue and worker
    /// lazily on first use.
    pub fn enqueue(&self, event: EventEnvelope) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CaseflowError::Queue(
                "queue manager is stopped".to_string(),
            ));
        }

        let case_id = event.case_id.clone();
        let entry = self
            .queues
            .entry(case_id.clone())
            .or_insert_with(|| self.spawn_queue(&case_id));

        entry.last_activity.store(Utc::now().timestamp(), Ordering::SeqCst);
        entry.depth.fetch_add(1, Ordering::SeqCst);
        debug!(
            event_type = %event.event_type,
            case_id = %case_id,
            depth = entry.depth.load(Ordering::SeqCst),
            "Enqueued event"
        );

        if entry.sender.send(event).is_err() {
            // Worker already gone (reaped between lookup and send); the
            // event is lost only if we give up — recreate and retry once.
            drop(entry);
            self.queues.remove(&case_id);
            return Err(CaseflowError::Queue(format!(
                "queue for case {case_id} closed during enqueue"
            )));
        }
        Ok(())
    }

    /// Case ids with live queues.
    pub fn active_cases(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.queues.len()
    }

    /// Pending events for a case (0 when no queue exists).
    pub fn queue_depth(&self, case_id: &str) -> usize {
        self.queues
            .get(case_id)
            .map(|q| q.depth.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn spawn_queue(&self, case_id: &str) -> CaseQueue {
        let (sender, mut receiver) = mpsc::unbounded_channel::<EventEnvelope>();
        let depth = Arc::new(AtomicUsize::new(0));
        let last_activity = Arc::new(AtomicI64::new(Utc::now().timestamp()));
        let processor = Arc::clone(&self.processor);
        let worker_depth = Arc::clone(&depth);
        let worker_activity = Arc::clone(&last_activity);
        let worker_case = case_id.to_string();

        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                worker_activity.store(Utc::now().timestamp(), Ordering::SeqCst);
                let event_type = event.event_type;
                debug!(
                    event_type = %event_type,
                    case_id = %worker_case,
                    "Processing event from case queue"
                );

                let started = Instant::now();
                if let Err(err) = processor.process(event).await {
                    error!(
                        event_type = %event_type,
                        case_id = %worker_case,
                        error = %err,
                        "Error processing event"
                    );
                }
                let elapsed = started.elapsed();
                worker_depth.fetch_sub(1, Ordering::SeqCst);
                if elapsed.as_secs() > 30 {
                    warn!(
                        event_type = %event_type,
                        case_id = %worker_case,
                        elapsed_seconds = elapsed.as_secs(),
                        "Slow event"
                    );
                }
            }
            debug!(case_id = %worker_case, "Case queue worker drained");
        });

        debug!(case_id = %case_id, "Created queue + worker for case");
        CaseQueue {
            sender,
            worker,
            depth,
            last_activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Records (case_id, text) pairs in completion order.
    struct RecordingProcessor {
        seen: Mutex<Vec<(String, String)>>,
        delay: Duration,
    }

    #[async_trait]
    impl EventProcessor for RecordingProcessor {
        async fn process(&self, event: EventEnvelope) -> Result<Vec<OutboundResponse>> {
            tokio::time::sleep(self.delay).await;
            self.seen
                .lock()
                .push((event.case_id.clone(), event.payload.text().to_string()));
            Ok(Vec::new())
        }
    }

    async fn drain(manager: &CaseQueueManager, case_ids: &[&str]) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if case_ids.iter().all(|id| manager.queue_depth(id) == 0) {
                    // One extra yield so in-flight process() calls finish
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queues should drain");
    }

    #[tokio::test]
    async fn test_per_case_fifo_order() {
        let processor = Arc::new(RecordingProcessor {
            seen: Mutex::new(Vec::new()),
            delay: Duration::from_millis(1),
        });
        let manager = CaseQueueManager::new(
            Arc::clone(&processor) as Arc<dyn EventProcessor>,
            QueueConfig::default(),
        );

        for i in 0..20 {
            manager
                .enqueue(EventEnvelope::subject_message("CASE-A", format!("msg {i}"), "chat"))
                .unwrap();
        }
        drain(&manager, &["CASE-A"]).await;

        let seen = processor.seen.lock();
        let texts: Vec<&str> = seen.iter().map(|(_, t)| t.as_str()).collect();
        let expected: Vec<String> = (0..20).map(|i| format!("msg {i}")).collect();
        assert_eq!(texts, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cases_run_in_parallel() {
        let processor = Arc::new(RecordingProcessor {
            seen: Mutex::new(Vec::new()),
            delay: Duration::from_millis(50),
        });
        let manager = CaseQueueManager::new(
            Arc::clone(&processor) as Arc<dyn EventProcessor>,
            QueueConfig::default(),
        );

        let started = Instant::now();
        for case in ["CASE-A", "CASE-B", "CASE-C", "CASE-D"] {
            manager
                .enqueue(EventEnvelope::subject_message(case, "only", "chat"))
                .unwrap();
        }
        drain(&manager, &["CASE-A", "CASE-B", "CASE-C", "CASE-D"]).await;

        // Serial execution would take ≥200ms; parallel stays well under
        assert!(started.elapsed() < Duration::from_millis(180));
        assert_eq!(processor.seen.lock().len(), 4);
        assert_eq!(manager.active_count(), 4);
    }

    #[tokio::test]
    async fn test_stop_rejects_new_events() {
        let processor = Arc::new(RecordingProcessor {
            seen: Mutex::new(Vec::new()),
            delay: Duration::from_millis(1),
        });
        let manager = CaseQueueManager::new(
            Arc::clone(&processor) as Arc<dyn EventProcessor>,
            QueueConfig::default(),
        );

        manager
            .enqueue(EventEnvelope::subject_message("CASE-A", "before stop", "chat"))
            .unwrap();
        manager.stop().await;

        // Accepted events were drained before stop returned
        assert_eq!(processor.seen.lock().len(), 1);
        assert!(manager
            .enqueue(EventEnvelope::subject_message("CASE-A", "after stop", "chat"))
            .is_err());
    }
}
