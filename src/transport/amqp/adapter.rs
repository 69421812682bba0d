//! Queue-broker adapter backed by AMQP via `lapin`.
//!
//! Follows an **actor-based concurrency model**: a single background
//! actor task owns the AMQP connection and all channels. The actor is
//! responsible for declaring queues, starting consumers, reconnecting
//! after a lost connection, and clean shutdown. All interaction with
//! the AMQP client is serialized through this actor; no other task ever
//! touches the connection directly.
//!
//! ## Channel and queue semantics
//!
//! - One channel per consumer binding, so each binding gets its own
//!   `basic_qos` prefetch window.
//! - Queues are declared durable. Redeclaring an existing queue with
//!   identical parameters is a broker-side no-op; conflicting
//!   parameters surface as PRECONDITION_FAILED and map to
//!   `TopologyConflict`.
//! - Deliveries are manually acknowledged after the handler completes.
//!   A rejected message is nacked with requeue on first failure; a
//!   rejected redelivery is nacked without requeue when the binding
//!   names a dead-letter exchange, handing it to the broker's
//!   dead-letter routing.
//!
//! ## Connection behavior
//!
//! `connect()` walks the resolved nodes in priority order and retries
//! the whole pass with exponential backoff. A consumer stream that dies
//! in steady state signals the actor, which reconnects with the same
//! policy and re-establishes every binding; exhausted retries stop the
//! actor for operator intervention.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_lite::stream::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::{BoundEndpoint, DrainOutcome, EndpointTopology, TransportAdapter};
use crate::gate::AdmissionGate;
use crate::observer::{EventSinkPtr, LifecycleEvent};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::topology::NodeAddress;
use crate::{
    Ack, ConsumerBinding, ConsumerPtr, Delivery, Result, TransportKind, WorkerError,
};

/// AMQP reply code for PRECONDITION_FAILED (conflicting declare).
const PRECONDITION_FAILED: u16 = 406;

//
// Actor commands
//

enum Cmd {
    Bind {
        binding: ConsumerBinding,
        consumer: ConsumerPtr,
        resp: oneshot::Sender<Result<()>>,
    },
    StartReceiving {
        resp: oneshot::Sender<Result<()>>,
    },
    /// Internal: a consumer stream died; re-establish the connection.
    Reconnect,
    Shutdown {
        timeout: Duration,
        resp: oneshot::Sender<Result<DrainOutcome>>,
    },
}

/// Queue-broker adapter. Cheap to share; `Send + Sync`.
pub struct AmqpAdapter {
    retry: RetryConfig,
    observer: EventSinkPtr,
    cmd_tx: RwLock<Option<mpsc::Sender<Cmd>>>,
    bound: RwLock<Vec<BoundEndpoint>>,
}

impl AmqpAdapter {
    fn new(retry: RetryConfig, observer: EventSinkPtr) -> Self {
        Self {
            retry,
            observer,
            cmd_tx: RwLock::new(None),
            bound: RwLock::new(Vec::new()),
        }
    }

    async fn send_cmd<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Cmd,
    ) -> Result<T> {
        // ---
        let tx = self
            .cmd_tx
            .read()
            .await
            .clone()
            .ok_or_else(|| WorkerError::InvalidState("adapter not connected".into()))?;

        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(make(resp_tx))
            .await
            .map_err(|_| WorkerError::Transport("adapter actor stopped".into()))?;

        resp_rx
            .await
            .map_err(|_| WorkerError::Transport("adapter actor dropped response".into()))?
    }
}

#[async_trait::async_trait]
impl TransportAdapter for AmqpAdapter {
    // ---
    fn kind(&self) -> TransportKind {
        TransportKind::QueueBroker
    }

    async fn connect(&self, topology: EndpointTopology) -> Result<()> {
        // ---
        let connection = connect_with_retry(&self.retry, &topology.nodes, &self.observer).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let actor = Actor {
            topology,
            retry: self.retry.clone(),
            observer: self.observer.clone(),
            connection,
            cmd_rx,
            cmd_tx: cmd_tx.clone(),
            entries: Vec::new(),
            receiving: false,
            cancel: CancellationToken::new(),
            receive_tasks: Vec::new(),
        };

        tokio::spawn(actor.run());

        *self.cmd_tx.write().await = Some(cmd_tx);
        Ok(())
    }

    async fn bind(&self, binding: &ConsumerBinding, consumer: ConsumerPtr) -> Result<()> {
        // ---
        let binding = binding.clone();
        self.send_cmd(|resp| Cmd::Bind {
            binding: binding.clone(),
            consumer,
            resp,
        })
        .await?;

        self.bound.write().await.push(BoundEndpoint {
            consumer_id: binding.consumer_id,
            endpoint: binding.endpoint_name,
            prefetch_count: binding.prefetch_count,
            max_concurrent_messages: binding.max_concurrent_messages,
        });

        Ok(())
    }

    async fn start_receiving(&self) -> Result<()> {
        // ---
        self.send_cmd(|resp| Cmd::StartReceiving { resp }).await
    }

    async fn shutdown(&self, timeout: Duration) -> Result<DrainOutcome> {
        // ---
        let outcome = self
            .send_cmd(|resp| Cmd::Shutdown { timeout, resp })
            .await?;

        *self.cmd_tx.write().await = None;
        Ok(outcome)
    }

    async fn bound_endpoints(&self) -> Vec<BoundEndpoint> {
        self.bound.read().await.clone()
    }
}

//
// Actor
//

struct BindingEntry {
    binding: ConsumerBinding,
    consumer: ConsumerPtr,
    gate: AdmissionGate,
    channel: Channel,
}

/// Background task owning the AMQP connection and channels.
struct Actor {
    topology: EndpointTopology,
    retry: RetryConfig,
    observer: EventSinkPtr,
    connection: Connection,
    cmd_rx: mpsc::Receiver<Cmd>,
    cmd_tx: mpsc::Sender<Cmd>,
    entries: Vec<BindingEntry>,
    receiving: bool,
    cancel: CancellationToken,
    receive_tasks: Vec<JoinHandle<()>>,
}

impl Actor {
    async fn run(mut self) {
        // ---
        tracing::debug!("amqp adapter actor started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Cmd::Bind {
                    binding,
                    consumer,
                    resp,
                } => {
                    let result = self.do_bind(binding, consumer).await;
                    let _ = resp.send(result);
                }
                Cmd::StartReceiving { resp } => {
                    let result = self.do_start_receiving().await;
                    let _ = resp.send(result);
                }
                Cmd::Reconnect => {
                    if self.connection.status().connected() {
                        // A burst of reconnect signals from several dead
                        // streams; the first one already did the work.
                        continue;
                    }
                    if let Err(err) = self.do_reconnect().await {
                        tracing::error!(
                            "amqp reconnect failed, stopping adapter: {err}"
                        );
                        break;
                    }
                }
                Cmd::Shutdown { timeout, resp } => {
                    let result = self.do_shutdown(timeout).await;
                    let _ = resp.send(result);
                    break;
                }
            }
        }

        tracing::debug!("amqp adapter actor stopped");
    }

    async fn do_bind(&mut self, binding: ConsumerBinding, consumer: ConsumerPtr) -> Result<()> {
        // ---
        let channel = self.connection.create_channel().await.map_err(|err| {
            WorkerError::Bind(format!(
                "channel creation failed for '{}': {err}",
                binding.endpoint_name
            ))
        })?;

        channel
            .basic_qos(binding.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|err| {
                WorkerError::Bind(format!(
                    "basic_qos({}) failed for '{}': {err}",
                    binding.prefetch_count, binding.endpoint_name
                ))
            })?;

        let mut arguments = FieldTable::default();
        if let Some(exchange) = &binding.dead_letter_exchange {
            arguments.insert(
                ShortString::from("x-dead-letter-exchange"),
                AMQPValue::LongString(exchange.clone().into()),
            );
        }

        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };

        channel
            .queue_declare(&binding.endpoint_name, options, arguments)
            .await
            .map_err(|err| classify_declare_error(&binding.endpoint_name, err))?;

        self.entries.push(BindingEntry {
            gate: AdmissionGate::new(binding.max_concurrent_messages),
            binding,
            consumer,
            channel,
        });

        Ok(())
    }

    async fn do_start_receiving(&mut self) -> Result<()> {
        // ---
        if self.receiving {
            return Ok(());
        }

        for entry in &self.entries {
            let task = Self::spawn_receive_loop(entry, &self.cancel, &self.cmd_tx, &self.observer)
                .await?;
            self.receive_tasks.push(task);
        }

        self.receiving = true;
        Ok(())
    }

    async fn spawn_receive_loop(
        entry: &BindingEntry,
        cancel: &CancellationToken,
        cmd_tx: &mpsc::Sender<Cmd>,
        observer: &EventSinkPtr,
    ) -> Result<JoinHandle<()>> {
        // ---
        let consumer_tag = format!("{}-worker", entry.binding.endpoint_name);
        let mut stream = entry
            .channel
            .basic_consume(
                &entry.binding.endpoint_name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                WorkerError::Transport(format!(
                    "basic_consume failed for '{}': {err}",
                    entry.binding.endpoint_name
                ))
            })?;

        let binding = entry.binding.clone();
        let consumer = entry.consumer.clone();
        let gate = entry.gate.clone();
        let cancel = cancel.clone();
        let cmd_tx = cmd_tx.clone();
        let observer = observer.clone();

        Ok(tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(delivery)) => delivery,
                        Some(Err(err)) => {
                            tracing::error!(
                                endpoint = %binding.endpoint_name,
                                "consumer stream error: {err}"
                            );
                            let _ = cmd_tx.try_send(Cmd::Reconnect);
                            break;
                        }
                        None => {
                            if !cancel.is_cancelled() {
                                let _ = cmd_tx.try_send(Cmd::Reconnect);
                            }
                            break;
                        }
                    },
                };

                // Admission gate: at most max_concurrent_messages handler
                // invocations for this binding, regardless of prefetch.
                let permit = tokio::select! {
                    // The unacked delivery requeues when the channel closes.
                    _ = cancel.cancelled() => break,
                    permit = gate.admit() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let consumer = consumer.clone();
                let observer = observer.clone();
                let endpoint = binding.endpoint_name.clone();
                let has_dead_letter = binding.dead_letter_exchange.is_some();

                tokio::spawn(async move {
                    let correlation_id = delivery
                        .properties
                        .correlation_id()
                        .as_ref()
                        .map(|id| id.as_str().to_string());

                    let message = Delivery {
                        endpoint: endpoint.clone(),
                        payload: Bytes::copy_from_slice(&delivery.data),
                        correlation_id: correlation_id.clone(),
                        redelivered: delivery.redelivered,
                    };

                    observer.emit(&LifecycleEvent::MessageDispatched {
                        endpoint: endpoint.clone(),
                        correlation_id: correlation_id.clone(),
                    });

                    match consumer.consume(message).await {
                        Ok(Ack) => {
                            if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                                tracing::error!(%endpoint, "ack failed: {err}");
                            }
                        }
                        Err(reject) => {
                            observer.emit(&LifecycleEvent::MessageRejected {
                                endpoint: endpoint.clone(),
                                correlation_id,
                                reason: reject.reason,
                            });

                            // First failure requeues; a failed redelivery
                            // routes to the dead-letter exchange when the
                            // binding has one, and otherwise requeues so
                            // the message is never dropped.
                            let requeue = !delivery.redelivered || !has_dead_letter;
                            let options = BasicNackOptions {
                                requeue,
                                ..BasicNackOptions::default()
                            };
                            if let Err(err) = delivery.nack(options).await {
                                tracing::error!(%endpoint, "nack failed: {err}");
                            }
                        }
                    }

                    drop(permit);
                });
            }
        }))
    }

    async fn do_reconnect(&mut self) -> Result<()> {
        // ---
        tracing::warn!("amqp connection lost, reconnecting");

        for task in self.receive_tasks.drain(..) {
            task.abort();
        }

        self.connection =
            connect_with_retry(&self.retry, &self.topology.nodes, &self.observer).await?;

        // Re-establish every binding on fresh channels. In-flight
        // handlers from the old connection finish against dead channels;
        // their messages return via broker redelivery.
        let previous = std::mem::take(&mut self.entries);
        for entry in previous {
            self.do_bind(entry.binding, entry.consumer).await?;
        }

        if self.receiving {
            self.receiving = false;
            self.do_start_receiving().await?;
        }

        Ok(())
    }

    async fn do_shutdown(&mut self, timeout: Duration) -> Result<DrainOutcome> {
        // ---
        self.cancel.cancel();

        for task in self.receive_tasks.drain(..) {
            let _ = task.await;
        }

        let deadline = Instant::now() + timeout;
        let mut completed = true;
        let mut abandoned = 0;

        for entry in &self.entries {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !entry.gate.drain(remaining).await {
                completed = false;
                abandoned += entry.gate.in_flight();
            }
        }

        // Closing the connection forcibly ends stragglers' channels;
        // their unacked messages requeue broker-side.
        for entry in &self.entries {
            let _ = entry.channel.close(200, "worker shutdown").await;
        }
        let _ = self.connection.close(200, "worker shutdown").await;

        Ok(DrainOutcome {
            completed,
            abandoned,
        })
    }
}

/// Try each node in priority order; retry the whole pass with backoff.
async fn connect_with_retry(
    retry: &RetryConfig,
    nodes: &[NodeAddress],
    observer: &EventSinkPtr,
) -> Result<Connection> {
    // ---
    let attempts = AtomicU32::new(0);

    retry_with_backoff(retry, || {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed);
        let nodes = nodes.to_vec();
        let observer = observer.clone();

        async move {
            match connect_any(&nodes, &observer).await {
                Ok(connection) => Ok(connection),
                Err(err) => {
                    observer.emit(&LifecycleEvent::ConnectionRetry {
                        attempt,
                        reason: err.to_string(),
                    });
                    Err(err)
                }
            }
        }
    })
    .await
}

/// One pass over the node list in failover priority order.
async fn connect_any(nodes: &[NodeAddress], observer: &EventSinkPtr) -> Result<Connection> {
    // ---
    for node in nodes {
        match Connection::connect(&node.amqp_uri(), ConnectionProperties::default()).await {
            Ok(connection) => {
                observer.emit(&LifecycleEvent::ConnectionEstablished {
                    node: node.to_string(),
                });
                return Ok(connection);
            }
            Err(err) => {
                tracing::warn!(node = %node, "amqp connect failed: {err}");
            }
        }
    }

    Err(WorkerError::ConnectionRetryable(
        "all broker nodes unreachable".into(),
    ))
}

fn classify_declare_error(endpoint: &str, err: lapin::Error) -> WorkerError {
    // ---
    if let lapin::Error::ProtocolError(ref amqp_err) = err {
        if amqp_err.get_id() == PRECONDITION_FAILED {
            return WorkerError::TopologyConflict(format!(
                "queue '{endpoint}' already exists with conflicting parameters"
            ));
        }
    }

    WorkerError::Bind(format!("queue declare failed for '{endpoint}': {err}"))
}

/// Create a queue-broker adapter.
///
/// Connection happens later, at
/// [`connect()`](crate::domain::TransportAdapter::connect).
pub fn create_amqp_adapter(retry: RetryConfig, observer: EventSinkPtr) -> Arc<AmqpAdapter> {
    // ---
    Arc::new(AmqpAdapter::new(retry, observer))
}
