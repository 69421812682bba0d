// tests/supervisor_memory.rs

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use mq_worker::{
    // ---
    Ack,
    BindingLimits,
    BindingRegistry,
    BrokerNode,
    Delivery,
    Disposition,
    EventSink,
    LifecycleEvent,
    MemoryAdapter,
    MessageConsumer,
    Reject,
    SupervisorBuilder,
    SupervisorState,
    TransportAdapter,
    TransportDescriptor,
    TransportKind,
    WorkerError,
};

fn order_descriptor() -> TransportDescriptor {
    TransportDescriptor::new(TransportKind::QueueBroker, "order-queue")
        .with_node(BrokerNode::new("mq1", 5672))
}

async fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    // ---
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}

/// Consumer that records its concurrency high-water mark.
struct InstrumentedConsumer {
    current: AtomicUsize,
    high_water: AtomicUsize,
    hold: Duration,
}

impl InstrumentedConsumer {
    fn new(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            current: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            hold,
        })
    }
}

#[async_trait::async_trait]
impl MessageConsumer for InstrumentedConsumer {
    fn consumer_id(&self) -> &str {
        "OrderConsumer"
    }

    async fn consume(&self, _delivery: Delivery) -> Disposition {
        // ---
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.hold).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(Ack)
    }
}

/// Sink that records every lifecycle event.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingSink {
    fn states(&self) -> Vec<(SupervisorState, SupervisorState)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                LifecycleEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &LifecycleEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[tokio::test]
async fn bind_reports_kebab_endpoint_with_prefetch() {
    // ---
    // Arrange
    // ---
    let adapter = MemoryAdapter::new();

    let mut registry = BindingRegistry::with_default_naming();
    registry
        .register(
            InstrumentedConsumer::new(Duration::from_millis(1)),
            BindingLimits::new(2, 4),
        )
        .expect("register failed");

    let mut supervisor = SupervisorBuilder::new()
        .descriptor(order_descriptor())
        .registry(registry)
        .adapter(adapter.clone())
        .build()
        .expect("build failed");

    // ---
    // Act
    // ---
    supervisor.resolve_topology().expect("resolve failed");
    supervisor.bind().await.expect("bind failed");

    // ---
    // Assert
    // ---
    assert_eq!(supervisor.state(), SupervisorState::AdaptersBound);

    let endpoints = adapter.bound_endpoints().await;
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].consumer_id, "OrderConsumer");
    assert_eq!(endpoints[0].endpoint, "order-consumer");
    assert_eq!(endpoints[0].prefetch_count, 4);
    assert_eq!(endpoints[0].max_concurrent_messages, 2);
}

#[tokio::test]
async fn handler_concurrency_never_exceeds_binding_limit() {
    // ---
    // Arrange
    // ---
    let adapter = MemoryAdapter::new();
    let consumer = InstrumentedConsumer::new(Duration::from_millis(10));

    let mut registry = BindingRegistry::with_default_naming();
    registry
        .register(consumer.clone(), BindingLimits::new(3, 8))
        .expect("register failed");

    let mut supervisor = SupervisorBuilder::new()
        .descriptor(order_descriptor())
        .registry(registry)
        .adapter(adapter.clone())
        .build()
        .expect("build failed");

    supervisor.start().await.expect("start failed");

    // ---
    // Act
    // ---
    for i in 0..20 {
        adapter
            .publish("order-consumer", Bytes::from(format!("order-{i}")))
            .await
            .expect("publish failed");
    }

    let all_processed = wait_for(|| adapter.acked().len() == 20, Duration::from_secs(5)).await;

    // ---
    // Assert
    // ---
    assert!(all_processed, "not all messages were acknowledged");
    assert!(
        consumer.high_water.load(Ordering::SeqCst) <= 3,
        "concurrency exceeded the binding limit: {}",
        consumer.high_water.load(Ordering::SeqCst)
    );

    supervisor.shutdown().await.expect("shutdown failed");
}

/// Rejects the first attempt, acknowledges the redelivery.
struct RejectFirstAttempt {
    saw_redelivered: AtomicBool,
}

#[async_trait::async_trait]
impl MessageConsumer for RejectFirstAttempt {
    fn consumer_id(&self) -> &str {
        "OrderConsumer"
    }

    async fn consume(&self, delivery: Delivery) -> Disposition {
        // ---
        if delivery.redelivered {
            self.saw_redelivered.store(true, Ordering::SeqCst);
            Ok(Ack)
        } else {
            Err(Reject::new("transient handler failure"))
        }
    }
}

#[tokio::test]
async fn rejected_message_is_nacked_once_then_redelivered() {
    // ---
    // Arrange
    // ---
    let adapter = MemoryAdapter::new();
    let consumer = Arc::new(RejectFirstAttempt {
        saw_redelivered: AtomicBool::new(false),
    });

    let mut registry = BindingRegistry::with_default_naming();
    registry
        .register(consumer.clone(), BindingLimits::new(1, 1))
        .expect("register failed");

    let mut supervisor = SupervisorBuilder::new()
        .descriptor(order_descriptor())
        .registry(registry)
        .adapter(adapter.clone())
        .build()
        .expect("build failed");

    supervisor.start().await.expect("start failed");

    // ---
    // Act
    // ---
    let id = adapter
        .publish("order-consumer", Bytes::from_static(b"order-42"))
        .await
        .expect("publish failed");

    let acked = wait_for(|| adapter.acked().contains(&id), Duration::from_secs(5)).await;

    // ---
    // Assert
    // ---
    assert!(acked, "redelivered message was never acknowledged");
    assert_eq!(adapter.nack_count(id), 1, "expected exactly one nack");
    assert!(consumer.saw_redelivered.load(Ordering::SeqCst));

    supervisor.shutdown().await.expect("shutdown failed");
}

#[tokio::test]
async fn twice_rejected_message_is_dead_lettered() {
    // ---
    // Arrange
    // ---
    struct AlwaysReject;

    #[async_trait::async_trait]
    impl MessageConsumer for AlwaysReject {
        fn consumer_id(&self) -> &str {
            "OrderConsumer"
        }

        async fn consume(&self, _delivery: Delivery) -> Disposition {
            Err(Reject::new("permanent handler failure"))
        }
    }

    let adapter = MemoryAdapter::new();

    let mut registry = BindingRegistry::with_default_naming();
    registry
        .register(
            Arc::new(AlwaysReject),
            BindingLimits::new(1, 1).with_dead_letter_exchange("order-dlx"),
        )
        .expect("register failed");

    let mut supervisor = SupervisorBuilder::new()
        .descriptor(order_descriptor())
        .registry(registry)
        .adapter(adapter.clone())
        .build()
        .expect("build failed");

    supervisor.start().await.expect("start failed");

    // ---
    // Act
    // ---
    let id = adapter
        .publish("order-consumer", Bytes::from_static(b"order-13"))
        .await
        .expect("publish failed");

    let dead_lettered =
        wait_for(|| adapter.dead_lettered().contains(&id), Duration::from_secs(5)).await;

    // ---
    // Assert
    // ---
    assert!(dead_lettered, "message never reached the dead-letter ledger");
    assert_eq!(adapter.nack_count(id), 2);
    assert!(adapter.acked().is_empty());

    supervisor.shutdown().await.expect("shutdown failed");
}

#[tokio::test]
async fn consumer_can_bind_at_the_configured_order_queue() {
    // ---
    // Arrange: bind at the descriptor's configured default endpoint
    // instead of the derived kebab name.
    // ---
    let adapter = MemoryAdapter::new();
    let descriptor = order_descriptor();
    let consumer = InstrumentedConsumer::new(Duration::from_millis(1));

    let mut registry = BindingRegistry::with_default_naming();
    registry
        .register_at(
            consumer,
            descriptor.default_endpoint_name.clone(),
            BindingLimits::new(2, 4),
        )
        .expect("register failed");

    let mut supervisor = SupervisorBuilder::new()
        .descriptor(descriptor)
        .registry(registry)
        .adapter(adapter.clone())
        .build()
        .expect("build failed");

    supervisor.start().await.expect("start failed");

    // ---
    // Act
    // ---
    adapter
        .publish("order-queue", Bytes::from_static(b"order-1"))
        .await
        .expect("publish failed");

    let processed = wait_for(|| adapter.acked().len() == 1, Duration::from_secs(5)).await;

    // ---
    // Assert
    // ---
    assert!(processed);
    let endpoints = adapter.bound_endpoints().await;
    assert_eq!(endpoints[0].endpoint, "order-queue");

    supervisor.shutdown().await.expect("shutdown failed");
}

#[tokio::test]
async fn supervisor_walks_the_full_state_machine() {
    // ---
    // Arrange
    // ---
    let adapter = MemoryAdapter::new();
    let sink = Arc::new(RecordingSink::default());

    let mut registry = BindingRegistry::with_default_naming();
    registry
        .register(
            InstrumentedConsumer::new(Duration::from_millis(1)),
            BindingLimits::new(2, 4),
        )
        .expect("register failed");

    let mut supervisor = SupervisorBuilder::new()
        .descriptor(order_descriptor())
        .registry(registry)
        .adapter(adapter)
        .observer(sink.clone())
        .build()
        .expect("build failed");

    // ---
    // Act
    // ---
    supervisor.start().await.expect("start failed");
    supervisor.shutdown().await.expect("shutdown failed");

    // ---
    // Assert
    // ---
    use SupervisorState::*;
    assert_eq!(
        sink.states(),
        vec![
            (Created, TopologyResolved),
            (TopologyResolved, AdaptersBound),
            (AdaptersBound, Receiving),
            (Receiving, Draining),
            (Draining, Stopped),
        ]
    );
}

#[tokio::test]
async fn out_of_order_transitions_are_rejected() {
    // ---
    let adapter = MemoryAdapter::new();

    let mut registry = BindingRegistry::with_default_naming();
    registry
        .register(
            InstrumentedConsumer::new(Duration::from_millis(1)),
            BindingLimits::new(1, 0),
        )
        .expect("register failed");

    let mut supervisor = SupervisorBuilder::new()
        .descriptor(order_descriptor())
        .registry(registry)
        .adapter(adapter)
        .build()
        .expect("build failed");

    // bind() before resolve_topology()
    let err = supervisor.bind().await.unwrap_err();
    assert!(matches!(err, WorkerError::InvalidState(_)));

    // shutdown() before receiving
    let err = supervisor.shutdown().await.unwrap_err();
    assert!(matches!(err, WorkerError::InvalidState(_)));

    assert_eq!(supervisor.state(), SupervisorState::Created);
}

#[tokio::test]
async fn empty_registry_fails_topology_resolution() {
    // ---
    let mut supervisor = SupervisorBuilder::new()
        .descriptor(order_descriptor())
        .registry(BindingRegistry::with_default_naming())
        .adapter(MemoryAdapter::new())
        .build()
        .expect("build failed");

    let err = supervisor.resolve_topology().unwrap_err();
    assert!(matches!(err, WorkerError::Configuration(_)));
    assert_eq!(supervisor.state(), SupervisorState::Created);
}

#[tokio::test]
async fn malformed_node_fails_topology_resolution() {
    // ---
    let descriptor = TransportDescriptor::new(TransportKind::QueueBroker, "order-queue")
        .with_node(BrokerNode::from_endpoint("not-an-endpoint"));

    let mut registry = BindingRegistry::with_default_naming();
    registry
        .register(
            InstrumentedConsumer::new(Duration::from_millis(1)),
            BindingLimits::new(1, 0),
        )
        .expect("register failed");

    let mut supervisor = SupervisorBuilder::new()
        .descriptor(descriptor)
        .registry(registry)
        .adapter(MemoryAdapter::new())
        .build()
        .expect("build failed");

    let err = supervisor.resolve_topology().unwrap_err();
    assert!(matches!(err, WorkerError::Configuration(_)));
}

#[tokio::test]
async fn correlation_id_reaches_the_observer() {
    // ---
    // Arrange
    // ---
    let adapter = MemoryAdapter::new();
    let sink = Arc::new(RecordingSink::default());

    let mut registry = BindingRegistry::with_default_naming();
    registry
        .register(
            InstrumentedConsumer::new(Duration::from_millis(1)),
            BindingLimits::new(1, 1),
        )
        .expect("register failed");

    let mut supervisor = SupervisorBuilder::new()
        .descriptor(order_descriptor())
        .registry(registry)
        .adapter(adapter.clone())
        .observer(sink.clone())
        .build()
        .expect("build failed");

    supervisor.start().await.expect("start failed");

    // ---
    // Act
    // ---
    adapter
        .publish_with_correlation(
            "order-consumer",
            Bytes::from_static(b"order-7"),
            Some("corr-7".to_string()),
        )
        .await
        .expect("publish failed");

    wait_for(|| adapter.acked().len() == 1, Duration::from_secs(5)).await;

    // ---
    // Assert
    // ---
    let dispatched: Vec<Option<String>> = sink
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            LifecycleEvent::MessageDispatched { correlation_id, .. } => {
                Some(correlation_id.clone())
            }
            _ => None,
        })
        .collect();

    assert_eq!(dispatched, vec![Some("corr-7".to_string())]);

    supervisor.shutdown().await.expect("shutdown failed");
}
