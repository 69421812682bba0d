//! Transport adapter abstraction.
//!
//! Defines the capability interface every broker family implements. It
//! intentionally avoids any reference to concrete protocols, brokers,
//! or client libraries; concrete implementations live under
//! `src/transport/`.
//!
//! Adapters must guarantee:
//! - a message is acknowledged/deleted only after its handler
//!   invocation completes with an ack;
//! - a rejected message produces exactly one negative-acknowledge
//!   signal and is redelivered or dead-lettered by broker-native
//!   policy, never dropped;
//! - no more than a binding's `max_concurrent_messages` handler
//!   invocations run at once.
//!
//! The broker connection is owned exclusively by its adapter instance;
//! no other component issues broker calls directly.

use std::sync::Arc;
use std::time::Duration;

use crate::topology::NodeAddress;
use crate::{ConsumerBinding, ConsumerPtr, Result, TransportKind};

/// Resolved, transport-specific view of the endpoints an adapter will
/// serve. Built once by the supervisor and moved into the active
/// adapter; never shared across adapter instances.
#[derive(Debug, Clone)]
pub struct EndpointTopology {
    pub kind: TransportKind,

    /// Connection endpoints in failover priority order.
    pub nodes: Vec<NodeAddress>,

    /// Endpoint name for consumers registered without an explicit one.
    pub default_endpoint_name: String,
}

/// Introspection record for one applied binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundEndpoint {
    pub consumer_id: String,
    pub endpoint: String,
    pub prefetch_count: u16,
    pub max_concurrent_messages: usize,
}

/// Result of a graceful shutdown.
#[derive(Debug, Clone, Copy)]
pub struct DrainOutcome {
    /// Whether every in-flight handler finished inside the deadline.
    pub completed: bool,

    /// Handler invocations still running when the deadline elapsed.
    /// Their messages are left unacknowledged for broker-native
    /// redelivery.
    pub abandoned: usize,
}

/// Capability interface implemented per broker family.
///
/// Lifecycle: `connect` → `bind` (once per registered binding) →
/// `start_receiving` → `shutdown`. The supervisor drives these in
/// order; adapters may assume that sequencing.
#[async_trait::async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Broker family this adapter serves.
    fn kind(&self) -> TransportKind;

    /// Establish the broker connection, walking the topology's nodes in
    /// order. Transient failures are retried internally with backoff;
    /// a returned error means retries were exhausted.
    async fn connect(&self, topology: EndpointTopology) -> Result<()>;

    /// Declare/attach one consumer binding. Endpoint declaration is
    /// idempotent; conflicting parameters fail with
    /// [`WorkerError::TopologyConflict`](crate::WorkerError::TopologyConflict).
    async fn bind(&self, binding: &ConsumerBinding, consumer: ConsumerPtr) -> Result<()>;

    /// Begin delivering messages to the bound consumers.
    async fn start_receiving(&self) -> Result<()>;

    /// Stop accepting deliveries, wait for in-flight handlers up to
    /// `timeout`, then release broker resources.
    async fn shutdown(&self, timeout: Duration) -> Result<DrainOutcome>;

    /// Bindings currently applied, for observer events and tests.
    async fn bound_endpoints(&self) -> Vec<BoundEndpoint>;
}

/// Shared adapter pointer.
pub type AdapterPtr = Arc<dyn TransportAdapter>;
