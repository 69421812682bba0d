//! Managed-queue adapter backed by AWS SQS.
//!
//! Unlike the queue-broker variant there is no persistent channel: each
//! binding runs a long-poll receive loop. A failed poll is re-issued
//! with exponential backoff; a successful poll resets the backoff.
//!
//! ## Mapping of binding knobs
//!
//! - `prefetch_count` → poll batch size (`max_number_of_messages`,
//!   clamped to the service limit of 1..=10).
//! - `max_concurrent_messages` → admission gate around handler
//!   invocations drawn from the batch.
//! - `dead_letter_exchange` is ignored: dead-lettering is the queue's
//!   native redrive policy, configured on the queue itself.
//!
//! ## Acknowledge semantics
//!
//! `Ack` deletes the message; `Reject` zeroes its visibility timeout so
//! the queue redelivers immediately and its redrive policy counts the
//! receive. Nothing is deleted before the handler completes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aws_sdk_sqs::types::MessageSystemAttributeName;
use aws_sdk_sqs::Client;
use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::domain::{BoundEndpoint, DrainOutcome, EndpointTopology, TransportAdapter};
use crate::gate::AdmissionGate;
use crate::observer::{EventSinkPtr, LifecycleEvent};
use crate::retry::{apply_jitter, RetryConfig};
use crate::{
    Ack, ConsumerBinding, ConsumerPtr, Delivery, Result, TransportKind, WorkerError,
};

/// SQS long-poll wait. The service maximum; keeps empty-queue polling
/// cheap without adding shutdown latency (loops select on cancel).
const WAIT_TIME_SECONDS: i32 = 20;

struct QueueEntry {
    binding: ConsumerBinding,
    consumer: ConsumerPtr,
    queue_url: String,
    gate: AdmissionGate,
}

/// Managed-queue adapter.
pub struct SqsAdapter {
    retry: RetryConfig,
    observer: EventSinkPtr,
    cancel: CancellationToken,
    client: RwLock<Option<Client>>,
    entries: RwLock<Vec<Arc<QueueEntry>>>,
    poll_tasks: Mutex<Vec<JoinHandle<()>>>,
    handler_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SqsAdapter {
    fn new(retry: RetryConfig, observer: EventSinkPtr) -> Self {
        Self {
            retry,
            observer,
            cancel: CancellationToken::new(),
            client: RwLock::new(None),
            entries: RwLock::new(Vec::new()),
            poll_tasks: Mutex::new(Vec::new()),
            handler_tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn active_client(&self) -> Result<Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| WorkerError::InvalidState("adapter not connected".into()))
    }
}

#[async_trait::async_trait]
impl TransportAdapter for SqsAdapter {
    // ---
    fn kind(&self) -> TransportKind {
        TransportKind::ManagedQueueBroker
    }

    async fn connect(&self, topology: EndpointTopology) -> Result<()> {
        // ---
        let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;

        let mut builder = aws_sdk_sqs::config::Builder::from(&base);

        // For the managed family the node list names the service
        // endpoint; the first entry wins (dev stacks point this at a
        // local emulator).
        if let Some(node) = topology.nodes.first() {
            builder = builder.endpoint_url(node.service_url());
            self.observer.emit(&LifecycleEvent::ConnectionEstablished {
                node: node.to_string(),
            });
        }

        *self.client.write().await = Some(Client::from_conf(builder.build()));
        Ok(())
    }

    async fn bind(&self, binding: &ConsumerBinding, consumer: ConsumerPtr) -> Result<()> {
        // ---
        let client = self.active_client().await?;

        // Declare idempotently: resolve the queue URL, creating the
        // queue when the service doesn't know it yet.
        let queue_url = match client
            .get_queue_url()
            .queue_name(&binding.endpoint_name)
            .send()
            .await
        {
            Ok(output) => output.queue_url().map(str::to_string),
            Err(_) => {
                let created = client
                    .create_queue()
                    .queue_name(&binding.endpoint_name)
                    .send()
                    .await
                    .map_err(|err| {
                        WorkerError::Bind(format!(
                            "queue '{}' could not be resolved or created: {err}",
                            binding.endpoint_name
                        ))
                    })?;
                created.queue_url().map(str::to_string)
            }
        };

        let queue_url = queue_url.ok_or_else(|| {
            WorkerError::Bind(format!(
                "service returned no URL for queue '{}'",
                binding.endpoint_name
            ))
        })?;

        self.entries.write().await.push(Arc::new(QueueEntry {
            gate: AdmissionGate::new(binding.max_concurrent_messages),
            binding: binding.clone(),
            consumer,
            queue_url,
        }));

        Ok(())
    }

    async fn start_receiving(&self) -> Result<()> {
        // ---
        let client = self.active_client().await?;
        let entries = self.entries.read().await;

        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries.iter() {
            tasks.push(spawn_poll_loop(
                client.clone(),
                Arc::clone(entry),
                self.retry.clone(),
                self.cancel.clone(),
                self.observer.clone(),
                Arc::clone(&self.handler_tasks),
            ));
        }

        self.poll_tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(tasks);

        Ok(())
    }

    async fn shutdown(&self, timeout: Duration) -> Result<DrainOutcome> {
        // ---
        self.cancel.cancel();

        let poll_tasks: Vec<_> = {
            let mut guard = self
                .poll_tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.drain(..).collect()
        };
        for task in poll_tasks {
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
            // Stragglers must not delete their messages after the
            // deadline; the visibility timeout hands them back to the
            // queue.
            let handlers: Vec<_> = {
                let mut guard = self
                    .handler_tasks
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.drain(..).collect()
            };
            for handle in handlers {
                handle.abort();
            }
        }

        *self.client.write().await = None;
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

fn spawn_poll_loop(
    client: Client,
    entry: Arc<QueueEntry>,
    retry: RetryConfig,
    cancel: CancellationToken,
    observer: EventSinkPtr,
    handler_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
) -> JoinHandle<()> {
    // ---
    let batch_size = i32::from(entry.binding.prefetch_count.clamp(1, 10));

    tokio::spawn(async move {
        let mut delay = retry.initial_delay;
        let mut attempt: u32 = 0;

        'poll: loop {
            if cancel.is_cancelled() {
                break;
            }

            let request = client
                .receive_message()
                .queue_url(&entry.queue_url)
                .max_number_of_messages(batch_size)
                .wait_time_seconds(WAIT_TIME_SECONDS)
                .message_attribute_names("All")
                .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
                .send();

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = request => result,
            };

            match result {
                Ok(output) => {
                    delay = retry.initial_delay;
                    attempt = 0;

                    for message in output.messages.unwrap_or_default() {
                        // Admission gate: the rest of the batch waits
                        // while max_concurrent_messages handlers run.
                        let permit = tokio::select! {
                            // Undispatched messages simply become visible
                            // again after the visibility timeout.
                            _ = cancel.cancelled() => break 'poll,
                            permit = entry.gate.admit() => match permit {
                                Ok(permit) => permit,
                                Err(_) => break 'poll,
                            },
                        };

                        let handle = tokio::spawn(handle_message(
                            client.clone(),
                            Arc::clone(&entry),
                            message,
                            observer.clone(),
                            permit,
                        ));

                        handler_tasks
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .push(handle);
                    }
                }
                Err(err) => {
                    attempt += 1;
                    observer.emit(&LifecycleEvent::ConnectionRetry {
                        attempt,
                        reason: err.to_string(),
                    });

                    let jittered = apply_jitter(delay);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(jittered) => {}
                    }
                    delay = retry.next_delay(delay);
                }
            }
        }
    })
}

async fn handle_message(
    client: Client,
    entry: Arc<QueueEntry>,
    message: aws_sdk_sqs::types::Message,
    observer: EventSinkPtr,
    permit: crate::gate::SlotPermit,
) {
    // ---
    let endpoint = entry.binding.endpoint_name.clone();

    let Some(receipt_handle) = message.receipt_handle().map(str::to_string) else {
        tracing::warn!(%endpoint, "received message without receipt handle");
        return;
    };

    let correlation_id = message
        .message_attributes()
        .and_then(|attrs| attrs.get("CorrelationId"))
        .and_then(|attr| attr.string_value())
        .map(str::to_string);

    let receive_count = message
        .attributes()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse::<u32>().ok())
        .unwrap_or(1);

    let delivery = Delivery {
        endpoint: endpoint.clone(),
        payload: Bytes::from(message.body().unwrap_or_default().as_bytes().to_vec()),
        correlation_id: correlation_id.clone(),
        redelivered: receive_count > 1,
    };

    observer.emit(&LifecycleEvent::MessageDispatched {
        endpoint: endpoint.clone(),
        correlation_id: correlation_id.clone(),
    });

    match entry.consumer.consume(delivery).await {
        Ok(Ack) => {
            if let Err(err) = client
                .delete_message()
                .queue_url(&entry.queue_url)
                .receipt_handle(&receipt_handle)
                .send()
                .await
            {
                tracing::error!(%endpoint, "delete_message failed: {err}");
            }
        }
        Err(reject) => {
            observer.emit(&LifecycleEvent::MessageRejected {
                endpoint: endpoint.clone(),
                correlation_id,
                reason: reject.reason,
            });

            // Make the message visible again immediately; the queue's
            // redrive policy dead-letters it after enough receives.
            if let Err(err) = client
                .change_message_visibility()
                .queue_url(&entry.queue_url)
                .receipt_handle(&receipt_handle)
                .visibility_timeout(0)
                .send()
                .await
            {
                tracing::error!(%endpoint, "change_message_visibility failed: {err}");
            }
        }
    }

    drop(permit);
}

/// Create a managed-queue adapter.
///
/// Client construction happens at
/// [`connect()`](crate::domain::TransportAdapter::connect).
pub fn create_sqs_adapter(retry: RetryConfig, observer: EventSinkPtr) -> Arc<SqsAdapter> {
    // ---
    Arc::new(SqsAdapter::new(retry, observer))
}
