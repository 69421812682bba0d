//! Broker-agnostic message consumption with bounded concurrency.
//!
//! This library binds logical message consumers to broker endpoints and
//! supervises their lifecycle, presenting one consumer programming
//! model over structurally different broker semantics: a
//! connection-oriented queue broker (AMQP) and a polling-based managed
//! queue service (SQS). Per-binding admission gates and prefetch depths
//! protect handler logic from overload; shutdown drains in-flight work
//! under a bounded timeout and abandons stragglers to broker-native
//! redelivery.
//!
//! # Example
//!
//! ```no_run
//! use mq_worker::{
//!     Ack, BindingLimits, BindingRegistry, BrokerNode, Delivery, Disposition,
//!     MessageConsumer, SupervisorBuilder, TransportDescriptor, TransportKind,
//! };
//! use std::sync::Arc;
//!
//! struct OrderConsumer;
//!
//! #[async_trait::async_trait]
//! impl MessageConsumer for OrderConsumer {
//!     fn consumer_id(&self) -> &str {
//!         "OrderConsumer"
//!     }
//!
//!     async fn consume(&self, delivery: Delivery) -> Disposition {
//!         // decode and process the order event...
//!         let _ = delivery.payload;
//!         Ok(Ack)
//!     }
//! }
//!
//! # async fn example() -> mq_worker::Result<()> {
//! let descriptor = TransportDescriptor::new(TransportKind::QueueBroker, "order-queue")
//!     .with_node(BrokerNode::new("mq1", 5672));
//!
//! let mut registry = BindingRegistry::with_default_naming();
//! registry.register(Arc::new(OrderConsumer), BindingLimits::new(2, 4))?;
//!
//! let mut supervisor = SupervisorBuilder::new()
//!     .descriptor(descriptor)
//!     .registry(registry)
//!     .build()?;
//!
//! supervisor.start().await?;
//! // ... until the process receives its shutdown signal:
//! supervisor.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod binding;
mod consumer;
mod descriptor;
mod domain;
mod error;
mod gate;
mod naming;
mod observer;
mod retry;
mod supervisor;
mod supervisor_builder;
mod transport;

pub mod topology;

// Re-export main types
pub use error::{Result, WorkerError};

pub use descriptor::{BrokerNode, TransportDescriptor, TransportKind};

pub use binding::{BindingLimits, BindingRegistry, ConsumerBinding};
pub use naming::{EndpointNaming, KebabCaseNaming, NamingPtr};

pub use consumer::{Ack, ConsumerPtr, Delivery, Disposition, MessageConsumer, Reject};

pub use supervisor::{ConsumptionSupervisor, SupervisorState};
pub use supervisor_builder::SupervisorBuilder;

pub use observer::{EventSink, EventSinkPtr, LifecycleEvent, TracingSink};
pub use retry::RetryConfig;

// --- public re-exports
pub use domain::{
    //
    AdapterPtr,
    BoundEndpoint,
    DrainOutcome,
    EndpointTopology,
    TransportAdapter,
};

pub use transport::{create_adapter, create_memory_adapter, MemoryAdapter};

#[cfg(feature = "transport_amqp")]
pub use transport::{create_amqp_adapter, AmqpAdapter};

#[cfg(feature = "transport_sqs")]
pub use transport::{create_sqs_adapter, SqsAdapter};
