//! Transport adapter implementations.
//!
//! Concrete implementations of the domain-level [`TransportAdapter`]
//! trait. The broker-backed adapters sit behind feature flags; the
//! in-memory adapter is always available and serves as the reference
//! implementation for tests.
//!
//! Domain code must not depend on adapter-specific types.
//!
//! [`TransportAdapter`]: crate::domain::TransportAdapter

mod memory;

#[cfg(feature = "transport_amqp")]
mod amqp;

#[cfg(feature = "transport_sqs")]
mod sqs;

pub use memory::{create_memory_adapter, MemoryAdapter};

#[cfg(feature = "transport_amqp")]
pub use amqp::{create_amqp_adapter, AmqpAdapter};

#[cfg(feature = "transport_sqs")]
pub use sqs::{create_sqs_adapter, SqsAdapter};

use crate::domain::AdapterPtr;
use crate::observer::EventSinkPtr;
use crate::retry::RetryConfig;
use crate::{Result, TransportKind};

#[cfg(not(all(feature = "transport_amqp", feature = "transport_sqs")))]
use crate::WorkerError;

/// Select the adapter variant matching the descriptor kind.
///
/// A kind whose transport feature is not compiled in fails with a
/// configuration error rather than silently falling back.
pub fn create_adapter(
    kind: TransportKind,
    retry: RetryConfig,
    observer: EventSinkPtr,
) -> Result<AdapterPtr> {
    // ---
    match kind {
        #[cfg(feature = "transport_amqp")]
        TransportKind::QueueBroker => Ok(create_amqp_adapter(retry, observer)),

        #[cfg(feature = "transport_sqs")]
        TransportKind::ManagedQueueBroker => Ok(create_sqs_adapter(retry, observer)),

        #[cfg(not(feature = "transport_amqp"))]
        TransportKind::QueueBroker => Err(WorkerError::Configuration(
            "queue-broker support not compiled in (enable feature transport_amqp)".into(),
        )),

        #[cfg(not(feature = "transport_sqs"))]
        TransportKind::ManagedQueueBroker => Err(WorkerError::Configuration(
            "managed-queue-broker support not compiled in (enable feature transport_sqs)".into(),
        )),
    }
}
