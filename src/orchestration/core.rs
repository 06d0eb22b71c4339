//! # Orchestrator Core
//!
//! Central deterministic event router. No business logic lives here — pure
//! lookups and bookkeeping. The core:
//!   1. Receives an [`EventEnvelope`]
//!   2. Loads or creates the case record
//!   3. Applies the phase-transition table for handoffs
//!   4. Routes to the handler owning the (possibly new) current phase
//!   5. Loops back emitted events (recursive, chain-depth circuit breaker)
//!   6. Persists the record best-effort after the cascade terminates
//!   7. Dispatches accumulated responses via the dispatcher registry
//!
//! Everything except a completely unreachable case store is absorbed here:
//! handler failures dead-letter the event, write conflicts are abandoned
//! after bounded retries, dispatch failures are logged per response. A
//! subject always receives some reply for an event that reached the core.

use crate::config::OrchestrationConfig;
use crate::error::{CaseflowError, Result};
use crate::events::{EventEnvelope, EventType};
use crate::models::{CaseRecord, JournalEntry, RiskLevel, SlotOption};
use crate::orchestration::dispatcher::{DispatcherRegistry, OutboundResponse};
use crate::orchestration::handler::CaseHandler;
use crate::orchestration::types::{
    CoreMetrics, DeadLetterEntry, HealthReport, ProcessingLogEntry, ProcessingStatus,
};
use crate::state_machine::{transition_for, CasePhase, TransitionEffect};
use crate::storage::{CaseStore, SaveOutcome, SlotRegistry, Version};
use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Processed event ids remembered per case for duplicate suppression.
const MAX_SEEN_EVENTS: usize = 100;

/// Processing log bound: trimmed to half once this is exceeded.
const MAX_PROCESSING_LOG: usize = 1000;

/// Dead letter bound: trimmed to half once this is exceeded.
const MAX_DEAD_LETTERS: usize = 500;

pub struct OrchestratorCore {
    handlers: RwLock<HashMap<CasePhase, Arc<dyn CaseHandler>>>,
    dispatchers: Arc<DispatcherRegistry>,
    case_store: Arc<CaseStore>,
    slot_registry: Arc<SlotRegistry>,
    config: OrchestrationConfig,
    processing_log: Mutex<Vec<ProcessingLogEntry>>,
    dead_letters: Mutex<Vec<DeadLetterEntry>>,
    metrics: Mutex<CoreMetrics>,
    seen_events: DashMap<String, VecDeque<Uuid>>,
    rate_windows: DashMap<String, Vec<Instant>>,
}

impl OrchestratorCore {
    pub fn new(
        case_store: Arc<CaseStore>,
        slot_registry: Arc<SlotRegistry>,
        dispatchers: Arc<DispatcherRegistry>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            dispatchers,
            case_store,
            slot_registry,
            config,
            processing_log: Mutex::new(Vec::new()),
            dead_letters: Mutex::new(Vec::new()),
            metrics: Mutex::new(CoreMetrics::default()),
            seen_events: DashMap::new(),
            rate_windows: DashMap::new(),
        }
    }

    // ── Handler Registration ──

    /// Register the handler owning a phase. Re-registering replaces.
    pub fn register_handler(&self, phase: CasePhase, handler: Arc<dyn CaseHandler>) {
        info!(phase = %phase, handler = handler.name(), "Registered case handler");
        self.handlers.write().insert(phase, handler);
    }

    pub fn registered_phases(&self) -> Vec<CasePhase> {
        self.handlers.read().keys().copied().collect()
    }

    // ── Main Entry Point ──

    /// Process a single event to completion, including its entire handoff
    /// cascade. Returns the full accumulated response list.
    ///
    /// The only failure allowed to propagate is an unreachable case store
    /// (nothing useful can happen without the record); every other failure
    /// class is absorbed and recorded.
    pub async fn process_event(&self, mut event: EventEnvelope) -> Result<Vec<OutboundResponse>> {
        debug!(
            event_type = %event.event_type,
            case_id = %event.case_id,
            event_id = %event.event_id,
            "process_event entered"
        );

        // Idempotency guard — skip duplicate events per case
        if self.register_seen(&event) {
            info!(
                event_id = %event.event_id,
                case_id = %event.case_id,
                "Duplicate event — skipping"
            );
            self.log_entry(&event, ProcessingStatus::Duplicate, None);
            return Ok(Vec::new());
        }

        // Rate limiting applies to raw subject messages only, never to
        // handoffs or scheduler events.
        if event.event_type == EventType::SubjectMessage && self.is_rate_limited(&event.case_id) {
            warn!(case_id = %event.case_id, "Rate limit exceeded — rejecting message");
            self.log_entry(&event, ProcessingStatus::RateLimited, None);
            self.metrics.lock().events_rate_limited += 1;

            let courtesy = OutboundResponse::new(
                if event.sender_id.is_empty() { "subject" } else { event.sender_id.as_str() },
                event.payload.channel(),
                "You're sending messages quite quickly. Please wait a moment before \
                 sending another message so each one is properly processed.",
            )
            .with_metadata("rate_limited", true);
            self.dispatchers.dispatch_all(std::slice::from_ref(&courtesy)).await;
            return Ok(vec![courtesy]);
        }

        // Load-or-create — the one spot allowed to fail outward
        let (mut record, version) = self.load_or_create(&event).await?;

        // Truncate oversized message text to bound downstream work
        if event.event_type == EventType::SubjectMessage {
            let text = event.payload.text().to_string();
            if text.len() > self.config.max_message_chars {
                warn!(
                    case_id = %event.case_id,
                    original_chars = text.len(),
                    truncated_to = self.config.max_message_chars,
                    "Truncating oversized message"
                );
                let mut cut = self.config.max_message_chars;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                event.payload.set("text", &text[..cut]);
            }
        }

        // Journal the inbound message before any handler acts
        if event.event_type == EventType::SubjectMessage {
            record.add_journal(JournalEntry::inbound(
                &event.sender_role.to_string(),
                event.payload.channel(),
                event.payload.text(),
            ));
        }

        // Run the cascade — the record is carried in memory through every
        // chained handoff and persisted once at the end.
        let mut responses = Vec::new();
        record = self.cascade(event, record, 0, &mut responses).await;

        // Journal the outbound side of the exchange
        for response in &responses {
            let mut preview = response.message.clone();
            preview.truncate(200);
            record.add_journal(JournalEntry::outbound(
                &response.recipient,
                &response.channel,
                &preview,
            ));
        }

        // Best-effort persistence: the reply pipeline never waits on a
        // contended write succeeding.
        let outcome = self.persist_best_effort(&mut record, version).await;
        if let SaveOutcome::FailedAfterRetries { attempts } = outcome {
            error!(
                case_id = %record.case_id(),
                attempts = attempts,
                "Record save abandoned after retries — replies dispatched regardless"
            );
        }

        // Dispatch everything the cascade produced
        if !responses.is_empty() {
            let deliveries = self.dispatchers.dispatch_all(&responses).await;
            for delivery in deliveries.iter().filter(|d| !d.success) {
                warn!(
                    channel = %delivery.channel,
                    recipient = %delivery.recipient,
                    error = delivery.error.as_deref().unwrap_or(""),
                    "Delivery failed"
                );
            }
        }

        Ok(responses)
    }

    // ── Cascade ──

    /// Process one event of the chain: apply the transition table, route to
    /// the owning handler, then recurse into each emitted event with an
    /// incremented depth. Returns the updated record; responses accumulate
    /// across the whole cascade.
    fn cascade<'a>(
        &'a self,
        event: EventEnvelope,
        record: CaseRecord,
        depth: u32,
        responses: &'a mut Vec<OutboundResponse>,
    ) -> BoxFuture<'a, CaseRecord> {
        Box::pin(async move {
            let mut record = record;

            // Handoffs are delivered to the handler owning the *target*
            // phase: the core applies the transition before routing, so the
            // protocol never depends on handler call-order.
            if event.event_type.is_handoff() {
                match transition_for(record.current_phase(), event.event_type) {
                    Some(transition) => {
                        self.apply_transition(&event, &mut record, transition.to, transition.effect,
                            transition.backward_loop)
                            .await;
                    }
                    None => {
                        warn!(
                            event_type = %event.event_type,
                            phase = %record.current_phase(),
                            case_id = %event.case_id,
                            "Handoff has no transition from current phase — dropped"
                        );
                        self.log_entry(
                            &event,
                            ProcessingStatus::NoTarget,
                            Some(format!("no transition from {}", record.current_phase())),
                        );
                        return record;
                    }
                }
            }

            // A staleness nudge marks its episode the moment it is processed,
            // under the per-case serialization guarantee.
            if event.event_type == EventType::StalenessNudge {
                record.mark_staleness_nudge();
            }

            let phase = record.current_phase();
            if phase.is_terminal() {
                info!(case_id = %event.case_id, "Event for closed case — logged only");
                self.log_entry(&event, ProcessingStatus::NoTarget, Some("case closed".into()));
                return record;
            }

            let handler = self.handlers.read().get(&phase).cloned();
            let Some(handler) = handler else {
                warn!(
                    phase = %phase,
                    event_type = %event.event_type,
                    case_id = %event.case_id,
                    "No handler registered for phase"
                );
                self.log_entry(
                    &event,
                    ProcessingStatus::NoTarget,
                    Some(format!("no handler for phase {phase}")),
                );
                return record;
            };

            let handler_name = handler.name().to_string();
            let phase_at_entry = record.current_phase();
            debug!(
                event_type = %event.event_type,
                handler = %handler_name,
                case_id = %event.case_id,
                depth = depth,
                "Routing event to handler"
            );

            let started = Instant::now();
            match handler.process(&event, record.clone()).await {
                Ok(result) => {
                    let elapsed = started.elapsed();
                    {
                        let mut metrics = self.metrics.lock();
                        metrics.events_processed += 1;
                        metrics
                            .handler_stats
                            .entry(handler_name.clone())
                            .or_default()
                            .record(elapsed, false);
                    }
                    record = result.record;

                    // Handlers may still move sub-state or close a case
                    // themselves; keep the staleness reference honest.
                    if record.current_phase() != phase_at_entry {
                        record.header.phase_entered_at = Utc::now();
                        info!(
                            case_id = %event.case_id,
                            from = %phase_at_entry,
                            to = %record.current_phase(),
                            "Phase changed by handler"
                        );
                    }

                    self.log_entry(&event, ProcessingStatus::Ok, Some(handler_name));
                    responses.extend(result.responses);

                    for emitted in result.emitted {
                        let child_depth = depth + 1;
                        if child_depth >= self.config.max_chain_depth {
                            error!(
                                case_id = %event.case_id,
                                event_type = %emitted.event_type,
                                max_chain_depth = self.config.max_chain_depth,
                                "🔴 Circuit breaker: max chain depth reached — dropping \
                                 remaining emitted events"
                            );
                            self.log_entry(&emitted, ProcessingStatus::CircuitBreaker, None);
                            self.metrics.lock().circuit_breaker_trips += 1;
                            break;
                        }
                        debug!(
                            event_type = %emitted.event_type,
                            case_id = %emitted.case_id,
                            depth = child_depth,
                            "Looping back emitted event"
                        );
                        record = self.cascade(emitted, record, child_depth, responses).await;
                    }
                }
                Err(err) => {
                    let elapsed = started.elapsed();
                    {
                        let mut metrics = self.metrics.lock();
                        metrics.events_failed += 1;
                        metrics
                            .handler_stats
                            .entry(handler_name.clone())
                            .or_default()
                            .record(elapsed, true);
                    }
                    error!(
                        handler = %handler_name,
                        event_type = %event.event_type,
                        case_id = %event.case_id,
                        error = %err,
                        "Handler error — dead-lettering event"
                    );
                    self.log_entry(&event, ProcessingStatus::Error, Some(err.to_string()));
                    self.push_dead_letter(&event, &handler_name, &err.to_string());

                    responses.push(
                        OutboundResponse::new(
                            if event.sender_id.is_empty() {
                                "subject"
                            } else {
                                event.sender_id.as_str()
                            },
                            event.payload.channel(),
                            "We're sorry, we encountered a temporary issue processing your \
                             request. Please try again in a moment. If the problem persists, \
                             our team has been notified and will follow up.",
                        )
                        .with_metadata("error", true),
                    );
                }
            }

            record
        })
    }

    /// Apply one transition-table entry: backward-loop guard, side effect,
    /// then the phase change itself.
    async fn apply_transition(
        &self,
        event: &EventEnvelope,
        record: &mut CaseRecord,
        to: CasePhase,
        effect: TransitionEffect,
        backward_loop: bool,
    ) {
        // The intake backward loop is counted and capped; past the cap the
        // event stays with the assessment handler, which proceeds on
        // partial data instead of looping forever.
        if backward_loop && event.event_type == EventType::NeedsIntakeData {
            if record.assessment.backward_loop_count >= self.config.max_backward_loops {
                warn!(
                    case_id = %event.case_id,
                    loops = record.assessment.backward_loop_count,
                    "Backward-loop cap reached — assessment proceeds with partial data"
                );
                return;
            }
            record.assessment.backward_loop_count += 1;
        }

        match effect {
            TransitionEffect::None => {}
            TransitionEffect::AdoptRiskLevel => {
                if let Some(level) = event
                    .payload
                    .str_field("risk_level")
                    .and_then(|s| s.parse::<RiskLevel>().ok())
                {
                    record.header.risk_level = level;
                    record.assessment.risk_level = level;
                    info!(
                        case_id = %event.case_id,
                        risk_level = %level,
                        "Priority level adopted from assessment"
                    );
                }
            }
            TransitionEffect::ActivateFollowUp => {
                record.follow_up.active = true;
                if let Some(baseline) = event.payload.object_field("baseline") {
                    for (key, value) in baseline {
                        record.follow_up.baseline.insert(key.clone(), value.clone());
                    }
                }
                let anchor = event
                    .payload
                    .str_field("anchor_date")
                    .map(str::to_string)
                    .or_else(|| {
                        record
                            .reservation
                            .slot_selected
                            .as_ref()
                            .map(|slot| slot.date.clone())
                    });
                record.follow_up.anchor_date = anchor;
                info!(
                    case_id = %event.case_id,
                    anchor_date = record.follow_up.anchor_date.as_deref().unwrap_or(""),
                    "Follow-up activated with baseline snapshot"
                );
            }
            TransitionEffect::CancelConfirmedHold => {
                match self.slot_registry.cancel_booking(&event.case_id).await {
                    Ok(Some(hold)) => {
                        record.reservation.rescheduled_from.push(SlotOption {
                            date: hold.date.clone(),
                            time: hold.time.clone(),
                            resource: hold.resource.clone(),
                            hold_id: hold.hold_id.clone(),
                        });
                        record.reservation.confirmed = false;
                        record.reservation.slot_selected = None;
                        record.reservation.linked_reference = None;
                        record.add_journal(JournalEntry::system(
                            "booking_cancelled",
                            &format!("confirmed booking {} cancelled for re-triage", hold.hold_id),
                        ));
                    }
                    Ok(None) => {
                        debug!(case_id = %event.case_id, "No confirmed hold to cancel on loop-back");
                    }
                    Err(err) => {
                        // Absorbed: the transition still happens, the
                        // registry's lazy expiry eventually frees the slot.
                        warn!(
                            case_id = %event.case_id,
                            error = %err,
                            "Failed to cancel confirmed hold during loop-back"
                        );
                    }
                }
            }
        }

        let from = record.current_phase();
        record.enter_phase(to);
        if from != to {
            info!(
                case_id = %event.case_id,
                from = %from,
                to = %to,
                trigger = %event.event_type,
                "Phase transition applied"
            );
        }
    }

    // ── Persistence ──

    async fn load_or_create(
        &self,
        event: &EventEnvelope,
    ) -> Result<(CaseRecord, Option<Version>)> {
        match self.case_store.load(&event.case_id).await {
            Ok((record, version)) => Ok((record, Some(version))),
            Err(err) if err.is_not_found() => {
                info!(case_id = %event.case_id, "First contact — creating case record");
                let (record, version) = self
                    .case_store
                    .create(&event.case_id, event.correlation_id.clone())
                    .await
                    .map_err(CaseflowError::from_store)?;
                Ok((record, Some(version)))
            }
            Err(err) => Err(CaseflowError::from_store(err)),
        }
    }

    /// Save the record, retrying the raw write a bounded number of times on
    /// version conflicts (refreshing the expected version each time) without
    /// re-running any handler logic. Abandons after the bound: a trade-off
    /// that keeps the subject's reply ahead of strict consistency.
    pub async fn persist_best_effort(
        &self,
        record: &mut CaseRecord,
        version: Option<Version>,
    ) -> SaveOutcome {
        let attempts = self.config.save_retries.max(1);
        let mut expected = version;
        let mut made = 0;

        for attempt in 1..=attempts {
            made = attempt;
            match self.case_store.save(record, expected).await {
                Ok(new_version) => {
                    if attempt > 1 {
                        debug!(
                            case_id = %record.case_id(),
                            attempt = attempt,
                            "Record saved after conflict retry"
                        );
                    }
                    return SaveOutcome::Persisted(new_version);
                }
                Err(err) if err.is_conflict() => {
                    warn!(
                        case_id = %record.case_id(),
                        attempt = attempt,
                        "Record save conflict — refreshing version for retry"
                    );
                    expected = match self.case_store.load(record.case_id()).await {
                        Ok((_, current)) => Some(current),
                        // Document gone — fall back to an unconditional write
                        Err(load_err) if load_err.is_not_found() => None,
                        Err(_) => expected,
                    };
                }
                Err(err) => {
                    error!(
                        case_id = %record.case_id(),
                        error = %err,
                        "Record save failed — abandoning persistence for this event"
                    );
                    break;
                }
            }
        }

        self.metrics.lock().save_failures += 1;
        SaveOutcome::FailedAfterRetries { attempts: made }
    }

    // ── Guards ──

    /// Record the event id as seen for its case. Returns true when the id
    /// was already processed (duplicate). Oldest ids are evicted FIFO.
    fn register_seen(&self, event: &EventEnvelope) -> bool {
        let mut seen = self.seen_events.entry(event.case_id.clone()).or_default();
        if seen.contains(&event.event_id) {
            return true;
        }
        seen.push_back(event.event_id);
        while seen.len() > MAX_SEEN_EVENTS {
            seen.pop_front();
        }
        false
    }

    /// Sliding-window rate limiter per case.
    fn is_rate_limited(&self, case_id: &str) -> bool {
        let window = std::time::Duration::from_secs(self.config.rate_limit_window_seconds);
        let now = Instant::now();
        let mut stamps = self.rate_windows.entry(case_id.to_string()).or_default();
        stamps.retain(|t| now.duration_since(*t) < window);
        if stamps.len() >= self.config.rate_limit_max_messages {
            return true;
        }
        stamps.push(now);
        false
    }

    // ── Processing Log & Dead Letters ──

    fn log_entry(&self, event: &EventEnvelope, status: ProcessingStatus, detail: Option<String>) {
        let mut log = self.processing_log.lock();
        log.push(ProcessingLogEntry::new(event, status, detail));
        if log.len() > MAX_PROCESSING_LOG {
            let excess = log.len() - MAX_PROCESSING_LOG / 2;
            log.drain(..excess);
        }
    }

    fn push_dead_letter(&self, event: &EventEnvelope, handler: &str, error: &str) {
        let mut dead = self.dead_letters.lock();
        dead.push(DeadLetterEntry {
            event: event.clone(),
            handler: handler.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        if dead.len() > MAX_DEAD_LETTERS {
            let excess = dead.len() - MAX_DEAD_LETTERS / 2;
            dead.drain(..excess);
        }
        info!(
            event_id = %event.event_id,
            handler = %handler,
            "Event added to dead-letter list"
        );
    }

    // ── Administrative Surface ──

    /// Retrieve processing log entries, optionally filtered by case,
    /// newest last.
    pub fn processing_log(&self, case_id: Option<&str>, limit: usize) -> Vec<ProcessingLogEntry> {
        let log = self.processing_log.lock();
        let filtered: Vec<ProcessingLogEntry> = log
            .iter()
            .filter(|e| case_id.map_or(true, |id| e.case_id == id))
            .cloned()
            .collect();
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].to_vec()
    }

    /// Retrieve dead letters for operator review, newest last.
    pub fn dead_letters(&self, limit: usize) -> Vec<DeadLetterEntry> {
        let dead = self.dead_letters.lock();
        let start = dead.len().saturating_sub(limit);
        dead[start..].to_vec()
    }

    /// Rebuild a dead-lettered event for replay. The replayed envelope gets
    /// a fresh event id so the duplicate guard does not swallow it.
    pub fn replay_dead_letter(&self, index: usize) -> Option<EventEnvelope> {
        let dead = self.dead_letters.lock();
        dead.get(index).map(|entry| {
            let mut event = entry.event.clone();
            event.event_id = Uuid::new_v4();
            event
        })
    }

    /// Read a case's current record (admin). `None` when no record exists.
    pub async fn record_for(&self, case_id: &str) -> Result<Option<CaseRecord>> {
        match self.case_store.load(case_id).await {
            Ok((record, _)) => Ok(Some(record)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(CaseflowError::from_store(err)),
        }
    }

    /// Administrative reset: delete the record document and free every slot
    /// resource the case holds. Returns whether a record existed.
    pub async fn reset_case(&self, case_id: &str) -> Result<bool> {
        if let Err(err) = self.slot_registry.release_holds(case_id).await {
            warn!(case_id = %case_id, error = %err, "Failed to release holds during reset");
        }
        if let Err(err) = self.slot_registry.cancel_booking(case_id).await {
            warn!(case_id = %case_id, error = %err, "Failed to cancel booking during reset");
        }

        self.seen_events.remove(case_id);
        self.rate_windows.remove(case_id);

        let existed = self
            .case_store
            .delete(case_id)
            .await
            .map_err(CaseflowError::from_store)?;
        info!(case_id = %case_id, existed = existed, "Case reset");
        Ok(existed)
    }

    /// Snapshot of the orchestrator's counters.
    pub fn metrics(&self) -> CoreMetrics {
        self.metrics.lock().clone()
    }

    /// Health check across the core's collaborators.
    pub fn health_check(&self) -> HealthReport {
        let handlers: Vec<String> = self
            .handlers
            .read()
            .values()
            .map(|h| h.name().to_string())
            .collect();
        let channels = self.dispatchers.registered_channels();
        let metrics = self.metrics.lock();
        HealthReport {
            healthy: !handlers.is_empty(),
            handlers_registered: handlers,
            channels_registered: channels,
            events_processed: metrics.events_processed,
            events_failed: metrics.events_failed,
            dead_letter_count: self.dead_letters.lock().len(),
        }
    }
}
