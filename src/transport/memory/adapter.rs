//! In-memory transport adapter.
//!
//! Simulates a broker entirely within the process. This is the
//! **reference implementation** of the adapter dispatch semantics —
//! admission-gated concurrency, ack-after-completion, reject →
//! redeliver-once → dead-letter — and the vehicle for the integration
//! tests. The real adapters approximate this behavior as closely as
//! their brokers allow.
//!
//! ## Semantics
//!
//! - `publish()` enqueues a message for a bound endpoint; delivery
//!   starts after `start_receiving()`.
//! - A rejected message is redelivered exactly once (`redelivered`
//!   set); a rejected redelivery is dead-lettered when the binding
//!   names a dead-letter exchange, otherwise requeued again.
//! - Shutdown cancels the receive loops, waits for in-flight handlers
//!   up to the timeout, then aborts stragglers — the in-process
//!   equivalent of forcibly closing the broker connection.
//!
//! ## Non-Goals
//!
//! - Persistence, network behavior, or failure injection
//! - Exact emulation of AMQP or managed-queue semantics

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::{BoundEndpoint, DrainOutcome, EndpointTopology, TransportAdapter};
use crate::gate::AdmissionGate;
use crate::observer::{EventSinkPtr, LifecycleEvent, TracingSink};
use crate::{
    Ack, ConsumerBinding, ConsumerPtr, Delivery, Result, TransportKind, WorkerError,
};

#[derive(Clone)]
struct MemoryMessage {
    id: u64,
    payload: Bytes,
    correlation_id: Option<String>,
    redelivered: bool,
}

struct EndpointEntry {
    binding: ConsumerBinding,
    consumer: ConsumerPtr,
    gate: AdmissionGate,
    tx: mpsc::UnboundedSender<MemoryMessage>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<MemoryMessage>>>,
}

/// Per-message bookkeeping, exposed for assertions.
#[derive(Default)]
struct Ledger {
    acked: Vec<u64>,
    nacks: std::collections::HashMap<u64, u32>,
    dead_lettered: Vec<u64>,
}

/// Acquire mutex guard, ignoring poisoning.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-memory adapter. See the module docs for semantics.
pub struct MemoryAdapter {
    observer: EventSinkPtr,
    cancel: CancellationToken,
    connected: AtomicBool,
    next_id: AtomicU64,
    entries: RwLock<Vec<Arc<EndpointEntry>>>,
    ledger: Arc<Mutex<Ledger>>,
    receive_tasks: Mutex<Vec<JoinHandle<()>>>,
    handler_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MemoryAdapter {
    pub fn new() -> Arc<Self> {
        Self::with_observer(Arc::new(TracingSink))
    }

    pub fn with_observer(observer: EventSinkPtr) -> Arc<Self> {
        Arc::new(Self {
            observer,
            cancel: CancellationToken::new(),
            connected: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
            ledger: Arc::new(Mutex::new(Ledger::default())),
            receive_tasks: Mutex::new(Vec::new()),
            handler_tasks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Enqueue a message for a bound endpoint. Returns the message id
    /// used by the ledger accessors.
    pub async fn publish(&self, endpoint: &str, payload: Bytes) -> Result<u64> {
        self.publish_with_correlation(endpoint, payload, None).await
    }

    /// Enqueue a message carrying a correlation identifier.
    pub async fn publish_with_correlation(
        &self,
        endpoint: &str,
        payload: Bytes,
        correlation_id: Option<String>,
    ) -> Result<u64> {
        // ---
        let entries = self.entries.read().await;
        let entry = entries
            .iter()
            .find(|e| e.binding.endpoint_name == endpoint)
            .ok_or_else(|| {
                WorkerError::Transport(format!("publish to unbound endpoint '{endpoint}'"))
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entry
            .tx
            .send(MemoryMessage {
                id,
                payload,
                correlation_id,
                redelivered: false,
            })
            .map_err(|_| WorkerError::Transport(format!("endpoint '{endpoint}' queue closed")))?;

        Ok(id)
    }

    /// Message ids acknowledged so far.
    pub fn acked(&self) -> Vec<u64> {
        lock_ignore_poison(&self.ledger).acked.clone()
    }

    /// Negative-acknowledge count for one message.
    pub fn nack_count(&self, id: u64) -> u32 {
        lock_ignore_poison(&self.ledger)
            .nacks
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    /// Message ids routed to the dead-letter ledger.
    pub fn dead_lettered(&self) -> Vec<u64> {
        lock_ignore_poison(&self.ledger).dead_lettered.clone()
    }

    fn spawn_receive_loop(&self, entry: Arc<EndpointEntry>) -> Result<JoinHandle<()>> {
        // ---
        let mut rx = lock_ignore_poison(&entry.rx).take().ok_or_else(|| {
            WorkerError::Transport(format!(
                "endpoint '{}' already receiving",
                entry.binding.endpoint_name
            ))
        })?;

        let cancel = self.cancel.clone();
        let ledger = Arc::clone(&self.ledger);
        let handler_tasks = Arc::clone(&self.handler_tasks);
        let observer = self.observer.clone();

        Ok(tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(msg) => msg,
                        None => break,
                    },
                };

                // Admission gate: the (N+1)-th dispatch waits here while
                // N handlers are outstanding.
                let permit = tokio::select! {
                    _ = cancel.cancelled() => {
                        // Drain began while waiting; put the message back.
                        let _ = entry.tx.send(msg);
                        break;
                    }
                    permit = entry.gate.admit() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let consumer = entry.consumer.clone();
                let requeue_tx = entry.tx.clone();
                let endpoint = entry.binding.endpoint_name.clone();
                let dead_letter = entry.binding.dead_letter_exchange.clone();
                let ledger = Arc::clone(&ledger);
                let observer = observer.clone();

                let handle = tokio::spawn(async move {
                    let delivery = Delivery {
                        endpoint: endpoint.clone(),
                        payload: msg.payload.clone(),
                        correlation_id: msg.correlation_id.clone(),
                        redelivered: msg.redelivered,
                    };

                    observer.emit(&LifecycleEvent::MessageDispatched {
                        endpoint: endpoint.clone(),
                        correlation_id: msg.correlation_id.clone(),
                    });

                    match consumer.consume(delivery).await {
                        Ok(Ack) => {
                            lock_ignore_poison(&ledger).acked.push(msg.id);
                        }
                        Err(reject) => {
                            {
                                let mut ledger = lock_ignore_poison(&ledger);
                                *ledger.nacks.entry(msg.id).or_insert(0) += 1;
                            }

                            observer.emit(&LifecycleEvent::MessageRejected {
                                endpoint,
                                correlation_id: msg.correlation_id.clone(),
                                reason: reject.reason,
                            });

                            if msg.redelivered && dead_letter.is_some() {
                                lock_ignore_poison(&ledger).dead_lettered.push(msg.id);
                            } else {
                                // Broker-native redelivery.
                                let _ = requeue_tx.send(MemoryMessage {
                                    redelivered: true,
                                    ..msg
                                });
                            }
                        }
                    }

                    drop(permit);
                });

                lock_ignore_poison(&handler_tasks).push(handle);
            }
        }))
    }
}

#[async_trait::async_trait]
impl TransportAdapter for MemoryAdapter {
    // ---
    fn kind(&self) -> TransportKind {
        TransportKind::QueueBroker
    }

    async fn connect(&self, topology: EndpointTopology) -> Result<()> {
        // ---
        self.connected.store(true, Ordering::SeqCst);

        if let Some(node) = topology.nodes.first() {
            self.observer.emit(&LifecycleEvent::ConnectionEstablished {
                node: node.to_string(),
            });
        }

        Ok(())
    }

    async fn bind(&self, binding: &ConsumerBinding, consumer: ConsumerPtr) -> Result<()> {
        // ---
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WorkerError::Bind("bind before connect".into()));
        }

        let mut entries = self.entries.write().await;

        if let Some(existing) = entries
            .iter()
            .find(|e| e.binding.endpoint_name == binding.endpoint_name)
        {
            // Idempotent redeclare with identical parameters is a no-op;
            // conflicting parameters are a topology error.
            let same = existing.binding.prefetch_count == binding.prefetch_count
                && existing.binding.max_concurrent_messages == binding.max_concurrent_messages
                && existing.binding.dead_letter_exchange == binding.dead_letter_exchange;

            return if same {
                Ok(())
            } else {
                Err(WorkerError::TopologyConflict(format!(
                    "endpoint '{}' already declared with different parameters",
                    binding.endpoint_name
                )))
            };
        }

        let (tx, rx) = mpsc::unbounded_channel();
        entries.push(Arc::new(EndpointEntry {
            binding: binding.clone(),
            consumer,
            gate: AdmissionGate::new(binding.max_concurrent_messages),
            tx,
            rx: Mutex::new(Some(rx)),
        }));

        Ok(())
    }

    async fn start_receiving(&self) -> Result<()> {
        // ---
        let entries = self.entries.read().await;

        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries.iter() {
            tasks.push(self.spawn_receive_loop(Arc::clone(entry))?);
        }

        lock_ignore_poison(&self.receive_tasks).extend(tasks);
        Ok(())
    }

    async fn shutdown(&self, timeout: Duration) -> Result<DrainOutcome> {
        // ---
        self.cancel.cancel();

        let receive_tasks: Vec<_> = lock_ignore_poison(&self.receive_tasks).drain(..).collect();
        for task in receive_tasks {
            let _ = task.await;
        }

        let deadline = Instant::now() + timeout;
        let mut completed = true;
        let mut abandoned = 0;

        let entries = self.entries.read().await;
        for entry in entries.iter() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !entry.gate.drain(remaining).await {
                completed = false;
                abandoned += entry.gate.in_flight();
            }
        }

        if !completed {
            // Forcible close: stragglers lose their slots and their
            // messages stay unacknowledged.
            let handlers: Vec<_> = lock_ignore_poison(&self.handler_tasks).drain(..).collect();
            for handle in handlers {
                handle.abort();
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        Ok(DrainOutcome {
            completed,
            abandoned,
        })
    }

    async fn bound_endpoints(&self) -> Vec<BoundEndpoint> {
        // ---
        self.entries
            .read()
            .await
            .iter()
            .map(|e| BoundEndpoint {
                consumer_id: e.binding.consumer_id.clone(),
                endpoint: e.binding.endpoint_name.clone(),
                prefetch_count: e.binding.prefetch_count,
                max_concurrent_messages: e.binding.max_concurrent_messages,
            })
            .collect()
    }
}

/// Create a new in-memory adapter.
///
/// Always available; requires no external resources.
pub fn create_memory_adapter() -> Arc<MemoryAdapter> {
    // ---
    MemoryAdapter::new()
}
