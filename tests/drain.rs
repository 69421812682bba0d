// tests/drain.rs
//
// Shutdown drain behavior: in-flight handlers finish inside the drain
// timeout, stragglers past the deadline are abandoned to broker-native
// redelivery.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use mq_worker::{
    // ---
    Ack,
    BindingLimits,
    BindingRegistry,
    BrokerNode,
    Delivery,
    Disposition,
    MemoryAdapter,
    MessageConsumer,
    SupervisorBuilder,
    SupervisorState,
    TransportDescriptor,
    TransportKind,
};

fn order_descriptor() -> TransportDescriptor {
    TransportDescriptor::new(TransportKind::QueueBroker, "order-queue")
        .with_node(BrokerNode::new("mq1", 5672))
}

/// Consumer that holds each message for a fixed time.
struct SlowConsumer {
    hold: Duration,
}

#[async_trait::async_trait]
impl MessageConsumer for SlowConsumer {
    fn consumer_id(&self) -> &str {
        "OrderConsumer"
    }

    async fn consume(&self, _delivery: Delivery) -> Disposition {
        // ---
        tokio::time::sleep(self.hold).await;
        Ok(Ack)
    }
}

async fn started_supervisor(
    adapter: Arc<MemoryAdapter>,
    hold: Duration,
    max_concurrent: usize,
    drain_timeout: Duration,
) -> mq_worker::ConsumptionSupervisor {
    // ---
    let mut registry = BindingRegistry::with_default_naming();
    registry
        .register(Arc::new(SlowConsumer { hold }), BindingLimits::new(max_concurrent, 4))
        .expect("register failed");

    let mut supervisor = SupervisorBuilder::new()
        .descriptor(order_descriptor())
        .registry(registry)
        .adapter(adapter)
        .drain_timeout(drain_timeout)
        .build()
        .expect("build failed");

    supervisor.start().await.expect("start failed");
    supervisor
}

#[tokio::test]
async fn drain_finishes_early_when_in_flight_work_completes() {
    // ---
    // Arrange: three in-flight messages that each take ~200ms, against
    // a 5 second drain timeout.
    // ---
    let adapter = MemoryAdapter::new();
    let mut supervisor = started_supervisor(
        adapter.clone(),
        Duration::from_millis(200),
        3,
        Duration::from_secs(5),
    )
    .await;

    for i in 0..3 {
        adapter
            .publish("order-consumer", Bytes::from(format!("order-{i}")))
            .await
            .expect("publish failed");
    }

    // Let all three dispatches start.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // ---
    // Act
    // ---
    let start = Instant::now();
    let outcome = supervisor.shutdown().await.expect("shutdown failed");
    let elapsed = start.elapsed();

    // ---
    // Assert: stopped as soon as the handlers finished, not at the
    // timeout.
    // ---
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(outcome.completed);
    assert_eq!(outcome.abandoned, 0);
    assert!(
        elapsed < Duration::from_secs(2),
        "drain should finish with the handlers, took {elapsed:?}"
    );
    assert_eq!(adapter.acked().len(), 3, "all in-flight messages acknowledged");
}

#[tokio::test]
async fn drain_timeout_abandons_straggler_unacknowledged() {
    // ---
    // Arrange: one in-flight message that takes 10 seconds, against a
    // 500ms drain timeout.
    // ---
    let adapter = MemoryAdapter::new();
    let mut supervisor = started_supervisor(
        adapter.clone(),
        Duration::from_secs(10),
        1,
        Duration::from_millis(500),
    )
    .await;

    adapter
        .publish("order-consumer", Bytes::from_static(b"order-slow"))
        .await
        .expect("publish failed");

    // Let the dispatch start.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // ---
    // Act
    // ---
    let start = Instant::now();
    let outcome = supervisor.shutdown().await.expect("shutdown failed");
    let elapsed = start.elapsed();

    // ---
    // Assert: stopped at the deadline; the message was never
    // acknowledged and is left to broker-native redelivery.
    // ---
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(!outcome.completed);
    assert_eq!(outcome.abandoned, 1);
    assert!(
        elapsed >= Duration::from_millis(500) && elapsed < Duration::from_secs(2),
        "drain should stop at the timeout, took {elapsed:?}"
    );
    assert!(adapter.acked().is_empty(), "straggler must not be acknowledged");
}

#[tokio::test]
async fn messages_published_after_drain_are_not_dispatched() {
    // ---
    // Arrange
    // ---
    let adapter = MemoryAdapter::new();
    let mut supervisor = started_supervisor(
        adapter.clone(),
        Duration::from_millis(10),
        2,
        Duration::from_secs(5),
    )
    .await;

    // ---
    // Act
    // ---
    supervisor.shutdown().await.expect("shutdown failed");

    let publish_result = adapter
        .publish("order-consumer", Bytes::from_static(b"late-order"))
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    // ---
    // Assert: whether the enqueue succeeded or the queue was already
    // closed, nothing is dispatched after draining.
    // ---
    if publish_result.is_ok() {
        assert!(adapter.acked().is_empty());
    }
}
