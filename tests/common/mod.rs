//! Shared test doubles for the integration suites: scripted handlers, a
//! collecting dispatcher, and an always-conflicting object store.

#![allow(dead_code)]

use async_trait::async_trait;
use caseflow_core::events::{EventEnvelope, EventPayload, EventType};
use caseflow_core::orchestration::{
    CaseHandler, DeliveryResult, DispatcherRegistry, HandlerError, HandlerResult,
    OrchestratorCore, OutboundResponse, ResponseDispatcher,
};
use caseflow_core::storage::{
    CaseStore, InMemoryObjectStore, ObjectStore, SlotRegistry, StoreError, Version,
};
use caseflow_core::CaseflowConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Handler that acknowledges every event and optionally emits one handoff.
pub struct ScriptedHandler {
    pub handler_name: String,
    pub emit: Option<(EventType, EventPayload)>,
    pub reply: Option<String>,
    pub invocations: AtomicUsize,
    pub seen: Mutex<Vec<EventEnvelope>>,
    pub delay: Duration,
}

impl ScriptedHandler {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            handler_name: name.to_string(),
            emit: None,
            reply: None,
            invocations: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        })
    }

    pub fn emitting(name: &str, event_type: EventType, payload: EventPayload) -> Arc<Self> {
        Arc::new(Self {
            handler_name: name.to_string(),
            emit: Some((event_type, payload)),
            reply: None,
            invocations: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        })
    }

    pub fn replying(name: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            handler_name: name.to_string(),
            emit: None,
            reply: Some(reply.to_string()),
            invocations: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        })
    }

    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            handler_name: name.to_string(),
            emit: None,
            reply: None,
            invocations: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaseHandler for ScriptedHandler {
    fn name(&self) -> &str {
        &self.handler_name
    }

    async fn process(
        &self,
        event: &EventEnvelope,
        record: caseflow_core::CaseRecord,
    ) -> Result<HandlerResult, HandlerError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(event.clone());

        let mut result = HandlerResult::unchanged(record);
        if let Some((event_type, payload)) = &self.emit {
            result = result.with_emitted(EventEnvelope::handoff(
                *event_type,
                event.case_id.clone(),
                self.handler_name.clone(),
                payload.clone(),
                event.correlation_id.clone(),
            ));
        }
        if let Some(reply) = &self.reply {
            result = result.with_response(OutboundResponse::new(
                "subject",
                event.payload.channel(),
                reply.clone(),
            ));
        }
        Ok(result)
    }
}

/// Handler that always fails, for dead-letter paths.
pub struct FailingHandler;

#[async_trait]
impl CaseHandler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn process(
        &self,
        _event: &EventEnvelope,
        _record: caseflow_core::CaseRecord,
    ) -> Result<HandlerResult, HandlerError> {
        Err(HandlerError::from("external service exploded"))
    }
}

/// Dispatcher that collects everything sent through it.
pub struct CollectingDispatcher {
    pub channel: String,
    pub sent: Arc<Mutex<Vec<OutboundResponse>>>,
}

impl CollectingDispatcher {
    pub fn new(channel: &str) -> (Arc<Self>, Arc<Mutex<Vec<OutboundResponse>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                channel: channel.to_string(),
                sent: Arc::clone(&sent),
            }),
            sent,
        )
    }
}

#[async_trait]
impl ResponseDispatcher for CollectingDispatcher {
    fn channel_name(&self) -> &str {
        &self.channel
    }

    async fn send(&self, response: &OutboundResponse) -> DeliveryResult {
        self.sent.lock().push(response.clone());
        DeliveryResult::delivered(&self.channel, &response.recipient)
    }
}

/// Object store whose conditional writes always lose the race. Reads,
/// listings, and unconditional writes pass through.
pub struct AlwaysConflictStore {
    inner: InMemoryObjectStore,
}

impl AlwaysConflictStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryObjectStore::new(),
        }
    }
}

#[async_trait]
impl ObjectStore for AlwaysConflictStore {
    async fn get(&self, key: &str) -> Result<(Vec<u8>, Version), StoreError> {
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StoreError> {
        if expected.is_some() {
            return Err(StoreError::VersionConflict {
                key: key.to_string(),
            });
        }
        self.inner.put(key, bytes, None).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }
}

/// Wired-up core over an arbitrary object store, with a collecting "chat"
/// dispatcher.
pub struct CoreFixture {
    pub core: Arc<OrchestratorCore>,
    pub case_store: Arc<CaseStore>,
    pub slot_registry: Arc<SlotRegistry>,
    pub dispatched: Arc<Mutex<Vec<OutboundResponse>>>,
}

pub fn build_core(store: Arc<dyn ObjectStore>) -> CoreFixture {
    let config = CaseflowConfig::default();
    let case_store = Arc::new(CaseStore::new(Arc::clone(&store)));
    let slot_registry = Arc::new(SlotRegistry::new(store, config.slot_registry.clone()));
    let dispatchers = Arc::new(DispatcherRegistry::new());
    let (dispatcher, dispatched) = CollectingDispatcher::new("chat");
    dispatchers.register(dispatcher);

    let core = Arc::new(OrchestratorCore::new(
        Arc::clone(&case_store),
        Arc::clone(&slot_registry),
        dispatchers,
        config.orchestration.clone(),
    ));
    CoreFixture {
        core,
        case_store,
        slot_registry,
        dispatched,
    }
}

pub fn build_default_core() -> CoreFixture {
    build_core(Arc::new(InMemoryObjectStore::new()))
}
