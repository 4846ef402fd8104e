use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use super::SessionConfig;
use crate::batch::BatchSession;
use crate::clock::{now_millis, Timestamp};
use crate::error::{SyncError, TransportError};
use crate::notify::{decode_push, NotificationDispatcher, NotifyListener, StoreNotifier};
use crate::record::{Record, RecordId};
use crate::registry::StoreRegistry;
use crate::request::{
    Action, ExchangeResult, IdentityQueue, OutgoingRequest, RequestCorrelator, RequestId,
    RequestPlan, ResponseReader, Transport,
};
use crate::store::{StoreHandle, StoreId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// Waiting behind another request for the same record.
    Held,
    InFlight,
    /// Cancelled while in flight; its result will not be applied.
    Cancelled,
}

struct PendingRequest {
    store: StoreHandle,
    plan: RequestPlan,
    correlator: RequestCorrelator,
    reader: Arc<dyn ResponseReader>,
    status: RequestStatus,
    cancelled: Arc<AtomicBool>,
}

/// A resolved exchange, plus the keys the server assigned while applying it.
struct Finished {
    result: ExchangeResult,
    rekeyed: Vec<(RecordId, RecordId)>,
}

enum Turn {
    Response {
        request: RequestId,
        body: Value,
        received: Timestamp,
    },
    Failure {
        request: RequestId,
        error: TransportError,
        received: Timestamp,
    },
    Push {
        module: String,
        body: Value,
        received: Timestamp,
    },
}

/// Single-threaded driver of every exchange between stores and the server.
///
/// Calls like [`save`](Self::save) return as soon as requests are issued.
/// Transport completions and pushes are queued with `deliver_*` and each is
/// processed as its own turn by [`turn`](Self::turn) or
/// [`run_until_idle`](Self::run_until_idle), never inside the call that
/// issued the request.
pub struct Session {
    config: SessionConfig,
    registry: StoreRegistry,
    transport: Arc<dyn Transport>,
    pending: HashMap<RequestId, PendingRequest>,
    queue: IdentityQueue,
    turns: VecDeque<Turn>,
    dispatcher: NotificationDispatcher,
    batches: HashMap<StoreId, BatchSession>,
    /// Highest request id resolved so far.
    resolved_through: Option<RequestId>,
    finished_tx: Sender<Finished>,
    finished_rx: Receiver<Finished>,
    results: Vec<ExchangeResult>,
}

impl Session {
    pub fn new(registry: StoreRegistry, transport: Arc<dyn Transport>) -> Self {
        Self::with_config(registry, transport, SessionConfig::default())
    }

    pub fn with_config(registry: StoreRegistry, transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (finished_tx, finished_rx) = mpsc::channel();
        let notifier: Arc<dyn NotifyListener> = Arc::new(StoreNotifier::new(registry.clone()));
        Session {
            config,
            registry,
            transport,
            pending: HashMap::new(),
            queue: IdentityQueue::new(),
            turns: VecDeque::new(),
            dispatcher: NotificationDispatcher::with_listener(notifier),
            batches: HashMap::new(),
            resolved_through: None,
            finished_tx,
            finished_rx,
            results: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    /// Replace the default store-routing push listener.
    pub fn set_notify_listener(&mut self, listener: Arc<dyn NotifyListener>) {
        self.dispatcher.set_listener(listener);
    }

    /// Send every pending change of `store`.
    ///
    /// Batched stores send their whole record list as one request and refuse
    /// a new save while the previous batch is being sent.
    pub fn save(&mut self, store: &StoreHandle) -> Result<Vec<RequestId>, SyncError> {
        let strategy = store.options().strategy.clone();
        if strategy.is_batched() {
            if let Some(batch) = self.batches.get(&store.id()) {
                batch.check_idle()?;
            }
        }

        let changes = store.read(|s| s.pending_changes())?;
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        store.with(|s| s.queue_before_save(changes.clone()))?;

        let options = store.options();
        let plans = if strategy.is_batched() {
            let records: Vec<_> = store.read(|s| s.iter().cloned().collect())?;
            strategy.plan(Action::Update, &records, options)
        } else {
            [Action::Create, Action::Update, Action::Destroy]
                .into_iter()
                .flat_map(|action| strategy.plan(action, changes.records(action), options))
                .collect()
        };

        let reader = strategy.reader();
        let mut issued = Vec::with_capacity(plans.len());
        for plan in plans {
            issued.push(self.issue(store, plan, reader.clone(), strategy.is_batched())?);
        }
        Ok(issued)
    }

    /// List the store's collection, replacing its persisted records.
    pub fn load(&mut self, store: &StoreHandle, params: Value) -> Result<RequestId, SyncError> {
        let strategy = store.options().strategy.clone();
        let plan = if strategy.is_batched() {
            let mut plans = strategy.plan(Action::Open, &[], store.options());
            plans.pop().ok_or_else(|| SyncError::Config("strategy produced no open request".to_string()))?
        } else {
            RequestPlan::list(store.options(), params)
        };

        if self.config.cancel_previous_reads {
            self.cancel_requests(store, plan.action);
        }
        self.issue(store, plan, strategy.reader(), strategy.is_batched())
    }

    /// Fetch the full data of one record.
    pub fn open(&mut self, store: &StoreHandle, key: &RecordId) -> Result<RequestId, SyncError> {
        let record = store
            .get(key)?
            .ok_or_else(|| SyncError::RecordNotFound(key.clone()))?;

        if self.config.cancel_previous_reads {
            let stale: Vec<RequestId> = self
                .pending
                .iter()
                .filter(|(_, p)| {
                    p.store == *store
                        && p.plan.action == Action::Open
                        && p.status != RequestStatus::Cancelled
                        && p.plan.records.iter().any(|r| &r.key == key)
                })
                .map(|(id, _)| *id)
                .collect();
            for id in stale {
                self.cancel(id);
            }
        }

        let strategy = store.options().strategy.clone();
        let mut plans = strategy.plan(Action::Open, std::slice::from_ref(&record), store.options());
        let plan = plans
            .pop()
            .ok_or_else(|| SyncError::Config("strategy produced no open request".to_string()))?;
        self.issue(store, plan, strategy.reader(), strategy.is_batched())
    }

    /// Queue the transport's answer to `request`.
    pub fn deliver_response(&mut self, request: RequestId, body: Value, received: Timestamp) {
        self.turns.push_back(Turn::Response {
            request,
            body,
            received,
        });
    }

    /// Queue a transport failure for `request`.
    pub fn deliver_failure(&mut self, request: RequestId, error: TransportError, received: Timestamp) {
        self.turns.push_back(Turn::Failure {
            request,
            error,
            received,
        });
    }

    /// Queue a server push.
    pub fn deliver_push(&mut self, module: impl Into<String>, body: Value, received: Timestamp) {
        self.turns.push_back(Turn::Push {
            module: module.into(),
            body,
            received,
        });
    }

    /// Cancel one request. A held request is resolved right away; an
    /// in-flight one still resolves when its response arrives, without
    /// touching the store.
    pub fn cancel(&mut self, request: RequestId) -> bool {
        let Some(pending) = self.pending.get_mut(&request) else {
            return false;
        };
        pending.cancelled.store(true, Ordering::Release);

        match pending.status {
            RequestStatus::Cancelled => false,
            RequestStatus::InFlight => {
                pending.status = RequestStatus::Cancelled;
                debug!(%request, "in-flight request cancelled");
                true
            }
            RequestStatus::Held => {
                pending.correlator.fail(TransportError::Cancelled, now_millis());
                self.finalize(request);
                true
            }
        }
    }

    /// Cancel every outstanding `action` request of `store`.
    pub fn cancel_requests(&mut self, store: &StoreHandle, action: Action) -> usize {
        let ids: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.store == *store && p.plan.action == action && p.status != RequestStatus::Cancelled)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Whether `store` has an outstanding, uncancelled `action` request.
    pub fn is_executing(&self, store: &StoreHandle, action: Action) -> bool {
        self.pending
            .values()
            .any(|p| p.store == *store && p.plan.action == action && p.status != RequestStatus::Cancelled)
    }

    pub fn status(&self, request: RequestId) -> Option<RequestStatus> {
        self.pending.get(&request).map(|p| p.status)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.turns.is_empty()
    }

    /// The batch edit session of a batched store, once it has saved.
    pub fn batch(&self, store: StoreId) -> Option<&BatchSession> {
        self.batches.get(&store)
    }

    /// Results of every exchange resolved since the last call.
    pub fn take_results(&mut self) -> Vec<ExchangeResult> {
        std::mem::take(&mut self.results)
    }

    /// Process one queued turn. Returns false when there was none.
    pub fn turn(&mut self) -> bool {
        let Some(turn) = self.turns.pop_front() else {
            return false;
        };
        match turn {
            Turn::Response {
                request,
                body,
                received,
            } => self.handle_response(request, body, received),
            Turn::Failure {
                request,
                error,
                received,
            } => self.handle_failure(request, error, received),
            Turn::Push {
                module,
                body,
                received,
            } => self.handle_push(&module, &body, received),
        }
        true
    }

    /// Process turns until none are left, including those queued while
    /// running. Returns the number processed.
    pub fn run_until_idle(&mut self) -> usize {
        let mut processed = 0;
        while processed < self.config.max_turns_per_run && self.turn() {
            processed += 1;
        }
        if !self.turns.is_empty() {
            warn!(remaining = self.turns.len(), "turn limit reached");
        }
        processed
    }

    fn issue(
        &mut self,
        store: &StoreHandle,
        plan: RequestPlan,
        reader: Arc<dyn ResponseReader>,
        batched: bool,
    ) -> Result<RequestId, SyncError> {
        let request = RequestId::next();
        if batched && plan.action.is_mutating() {
            self.batches
                .entry(store.id())
                .or_insert_with(|| BatchSession::new(store.id()))
                .begin(request)?;
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let mut correlator = RequestCorrelator::new(request, plan.action, plan.records.clone())
            .with_target(self.completion_target(store, cancelled.clone()));
        if batched {
            correlator = correlator.batched();
        }

        let keys: Vec<RecordId> = plan.records.iter().map(|r| r.key.clone()).collect();
        let action = plan.action;
        self.pending.insert(
            request,
            PendingRequest {
                store: store.clone(),
                plan,
                correlator,
                reader,
                status: RequestStatus::Held,
                cancelled,
            },
        );

        let ready = !action.is_mutating() || self.queue.enqueue(request, &keys);
        if ready {
            self.send(request);
        } else {
            debug!(%request, store = %store.id(), %action, "request held behind earlier write");
        }
        Ok(request)
    }

    fn completion_target(
        &self,
        store: &StoreHandle,
        cancelled: Arc<AtomicBool>,
    ) -> impl FnOnce(ExchangeResult) + Send + 'static {
        let store = store.clone();
        let registry = self.registry.clone();
        let finished = self.finished_tx.clone();
        move |result: ExchangeResult| {
            let live = !store.is_destroyed() && (store.is_standalone() || registry.is_registered(store.id()));
            let mut rekeyed = Vec::new();
            if cancelled.load(Ordering::Acquire) {
                debug!(request = %result.request_id, "request was cancelled, result not applied");
            } else if !live {
                debug!(request = %result.request_id, store = %store.id(), "store is gone, result not applied");
            } else {
                match store.with(|s| s.apply_result(&result)) {
                    Ok(keys) => rekeyed = keys,
                    Err(err) => error!(request = %result.request_id, %err, "cannot apply result"),
                }
            }
            let _ = finished.send(Finished { result, rekeyed });
        }
    }

    fn send(&mut self, request: RequestId) {
        let Some(pending) = self.pending.get_mut(&request) else {
            return;
        };
        pending.status = RequestStatus::InFlight;

        let outgoing = OutgoingRequest {
            request_id: request,
            store: pending.store.id(),
            module: format!("{}{}", self.config.module_prefix, pending.plan.module),
            action: pending.plan.action,
            server_action: pending.plan.action.server_action(),
            payload: pending.plan.payload.clone(),
        };
        if let Err(err) = self.transport.send(&outgoing) {
            warn!(%request, %err, "transport refused request");
            self.turns.push_back(Turn::Failure {
                request,
                error: err,
                received: now_millis(),
            });
        }
    }

    fn handle_response(&mut self, request: RequestId, body: Value, received: Timestamp) {
        let Some(pending) = self.pending.get_mut(&request) else {
            if self.was_resolved(request) {
                error!(%request, "response for an already resolved request ignored");
            } else {
                warn!(%request, "response for an unknown request ignored");
            }
            return;
        };
        if pending.status == RequestStatus::Held {
            warn!(%request, "response for a request that was never sent ignored");
            return;
        }

        let module_id = pending.store.id().to_string();
        if pending
            .correlator
            .start(&pending.plan.module, &module_id, &body, received)
        {
            let success = pending.reader.read(&body, &mut pending.correlator);
            pending.correlator.done(success);
        } else {
            pending.correlator.fail(
                SyncError::MalformedPayload("response body is not an object".to_string()),
                received,
            );
        }
        self.finalize(request);
    }

    fn handle_failure(&mut self, request: RequestId, error: TransportError, received: Timestamp) {
        let Some(pending) = self.pending.get_mut(&request) else {
            if self.was_resolved(request) {
                error!(%request, %error, "failure for an already resolved request ignored");
            }
            return;
        };
        pending.correlator.fail(&error, received);
        self.finalize(request);
    }

    fn handle_push(&mut self, module: &str, body: &Value, received: Timestamp) {
        if !self.dispatcher.start(module, module, body, received) {
            return;
        }
        decode_push(&mut self.dispatcher, body);
        let success = body.get("success").and_then(Value::as_bool).unwrap_or(true);
        self.dispatcher.done(success);
    }

    /// Ids are issued in increasing order and stay in `pending` until
    /// resolved, so anything not pending at or below the watermark is done.
    fn was_resolved(&self, request: RequestId) -> bool {
        self.resolved_through.is_some_and(|through| request <= through)
    }

    fn finalize(&mut self, request: RequestId) {
        let Some(pending) = self.pending.remove(&request) else {
            return;
        };
        self.resolved_through = self.resolved_through.max(Some(request));

        let mut rekeyed = Vec::new();
        while let Ok(finished) = self.finished_rx.try_recv() {
            if finished.result.batch {
                if let Some(batch) = self.batches.get_mut(&pending.store.id()) {
                    batch.finish(&finished.result);
                }
            }
            rekeyed.extend(finished.rekeyed);
            self.results.push(finished.result);
        }

        for (from, to) in &rekeyed {
            self.queue.rename(from, to);
            let held = self
                .pending
                .values_mut()
                .filter(|p| p.store == pending.store && p.status == RequestStatus::Held);
            for sent in held.flat_map(|p| p.plan.records.iter_mut()) {
                if &sent.key == from {
                    sent.key = to.clone();
                }
            }
        }

        for next in self.queue.release(request) {
            if self.refresh(next) {
                debug!(request = %next, "held request released");
                self.send(next);
            }
        }
    }

    /// Rebuild a held write from the current state of its records, which may
    /// have been created or committed while it waited. Returns false when
    /// nothing is left to write and the request was resolved instead.
    fn refresh(&mut self, request: RequestId) -> bool {
        let Some(pending) = self.pending.get(&request) else {
            return false;
        };
        if pending.correlator.is_batch() || !matches!(pending.plan.action, Action::Create | Action::Update) {
            return true;
        }

        let store = pending.store.clone();
        let cancelled = pending.cancelled.clone();
        let keys: Vec<RecordId> = pending.plan.records.iter().map(|r| r.key.clone()).collect();
        let records = store.read(|s| {
            keys.iter()
                .filter_map(|key| s.get(key))
                .filter(|record| record.is_phantom() || record.is_dirty())
                .cloned()
                .collect::<Vec<Record>>()
        });
        let records = match records {
            Ok(records) => records,
            Err(err) => {
                warn!(%request, %err, "cannot rebuild held request, sending it as issued");
                return true;
            }
        };
        if records.is_empty() {
            debug!(%request, "held request has nothing left to write");
            self.cancel(request);
            return false;
        }

        let action = if records.iter().any(Record::is_phantom) {
            Action::Create
        } else {
            Action::Update
        };
        let mut plans = store.options().strategy.plan(action, &records, store.options());
        let plan = match (plans.pop(), plans.is_empty()) {
            (Some(plan), true) => plan,
            _ => {
                warn!(%request, "strategy split a held request, sending it as issued");
                return true;
            }
        };

        let correlator = RequestCorrelator::new(request, plan.action, plan.records.clone())
            .with_target(self.completion_target(&store, cancelled));
        if let Some(pending) = self.pending.get_mut(&request) {
            pending.plan = plan;
            pending.correlator = correlator;
        }
        true
    }
}
