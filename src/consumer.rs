//! Consumer-facing delivery types.
//!
//! This is the interface boundary to handler business logic: the
//! subsystem delivers opaque payload bytes and the handler answers with
//! an acknowledge/reject decision. Handlers must be safe to invoke
//! concurrently up to their binding's `max_concurrent_messages`.

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::Result;

/// One message handed to a consumer.
///
/// The payload is not interpreted by the transport layer; decoding is
/// the handler's concern.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Endpoint the message was received from.
    pub endpoint: String,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Correlation identifier propagated from the broker message, used
    /// by the caller's span pipeline. `None` when the producer set none.
    pub correlation_id: Option<String>,

    /// Whether the broker has delivered this message before.
    pub redelivered: bool,
}

impl Delivery {
    /// Decode the payload as JSON into a typed message.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Positive handler outcome: the message may be acknowledged/deleted.
#[derive(Debug, Clone, Copy)]
pub struct Ack;

/// Negative handler outcome: the message must be redelivered or
/// dead-lettered by broker-native retry policy, never dropped.
#[derive(Debug, Clone)]
pub struct Reject {
    /// Human-readable failure reason, surfaced to the observability sink.
    pub reason: String,
}

impl Reject {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Handler decision for one delivery.
pub type Disposition = std::result::Result<Ack, Reject>;

/// A logical message consumer.
///
/// Implementations hold the business logic for one message kind (e.g.
/// an order-event handler). The transport adapter invokes [`consume`]
/// once per delivered message and acknowledges only on [`Ack`].
///
/// [`consume`]: MessageConsumer::consume
#[async_trait::async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Stable logical identity, the input to endpoint naming.
    fn consumer_id(&self) -> &str;

    /// Process one delivery. Invoked concurrently up to the binding's
    /// concurrency limit.
    async fn consume(&self, delivery: Delivery) -> Disposition;
}

/// Shared consumer pointer.
pub type ConsumerPtr = Arc<dyn MessageConsumer>;
