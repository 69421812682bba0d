//! Consumer binding registry.
//!
//! Associates each logical consumer with its receive endpoint, its
//! concurrency ceiling, and its prefetch depth. The registry is built
//! once at startup and handed to the supervisor; it enforces the
//! binding invariants at registration time rather than trusting setup
//! code to get them right.

use crate::naming::{KebabCaseNaming, NamingPtr};
use crate::{ConsumerPtr, Result, WorkerError};
use std::sync::Arc;

/// Per-binding tuning knobs.
///
/// `max_concurrent_messages` is a safety contract, not a hint: the
/// registry rejects zero instead of clamping it.
#[derive(Debug, Clone)]
pub struct BindingLimits {
    /// Maximum handler invocations in flight at once. Must be ≥ 1.
    pub max_concurrent_messages: usize,

    /// Messages the broker may deliver ahead of processing capacity.
    /// Queue-broker: channel prefetch. Managed-queue: poll batch size.
    pub prefetch_count: u16,

    /// Optional dead-letter exchange for the queue-broker variant.
    /// The managed-queue variant relies on the queue's native redrive
    /// policy and ignores this field.
    pub dead_letter_exchange: Option<String>,
}

impl BindingLimits {
    pub fn new(max_concurrent_messages: usize, prefetch_count: u16) -> Self {
        Self {
            max_concurrent_messages,
            prefetch_count,
            dead_letter_exchange: None,
        }
    }

    /// Route twice-failed messages to the named dead-letter exchange
    /// instead of requeueing indefinitely.
    pub fn with_dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }
}

/// One registered consumer binding.
#[derive(Debug, Clone)]
pub struct ConsumerBinding {
    /// Unique logical consumer identity.
    pub consumer_id: String,

    /// Physical endpoint name, derived via the naming strategy or set
    /// explicitly. Stable across restarts.
    pub endpoint_name: String,

    /// Concurrency ceiling for handler invocations. Always ≥ 1.
    pub max_concurrent_messages: usize,

    /// Prefetch depth.
    pub prefetch_count: u16,

    /// Optional dead-letter exchange (queue-broker only).
    pub dead_letter_exchange: Option<String>,
}

/// Registry of consumer bindings, one per consumer id per process.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use mq_worker::{BindingLimits, BindingRegistry, ConsumerPtr};
/// # fn example(order_consumer: ConsumerPtr) -> mq_worker::Result<()> {
/// let mut registry = BindingRegistry::with_default_naming();
/// registry.register(order_consumer, BindingLimits::new(2, 4))?;
/// # Ok(())
/// # }
/// ```
pub struct BindingRegistry {
    naming: NamingPtr,
    entries: Vec<(ConsumerBinding, ConsumerPtr)>,
}

impl BindingRegistry {
    /// Create a registry with an explicit naming strategy.
    pub fn new(naming: NamingPtr) -> Self {
        Self {
            naming,
            entries: Vec::new(),
        }
    }

    /// Create a registry using [`KebabCaseNaming`].
    pub fn with_default_naming() -> Self {
        Self::new(Arc::new(KebabCaseNaming))
    }

    /// Register a consumer at the endpoint derived from its id.
    pub fn register(&mut self, consumer: ConsumerPtr, limits: BindingLimits) -> Result<()> {
        // ---
        let endpoint = self.naming.name_for(consumer.consumer_id());
        self.register_at(consumer, endpoint, limits)
    }

    /// Register a consumer at an explicitly named endpoint (e.g. a
    /// queue name fixed by configuration).
    ///
    /// # Errors
    ///
    /// - [`WorkerError::InvalidBinding`] if `max_concurrent_messages`
    ///   is zero. Never silently coerced.
    /// - [`WorkerError::DuplicateBinding`] if the consumer id is
    ///   already registered. The registry is unchanged after a failed
    ///   call.
    pub fn register_at(
        &mut self,
        consumer: ConsumerPtr,
        endpoint_name: impl Into<String>,
        limits: BindingLimits,
    ) -> Result<()> {
        // ---
        let consumer_id = consumer.consumer_id().to_string();

        if limits.max_concurrent_messages == 0 {
            return Err(WorkerError::InvalidBinding(format!(
                "consumer '{consumer_id}': max_concurrent_messages must be >= 1"
            )));
        }

        if self.entries.iter().any(|(b, _)| b.consumer_id == consumer_id) {
            return Err(WorkerError::DuplicateBinding(consumer_id));
        }

        let binding = ConsumerBinding {
            consumer_id,
            endpoint_name: endpoint_name.into(),
            max_concurrent_messages: limits.max_concurrent_messages,
            prefetch_count: limits.prefetch_count,
            dead_letter_exchange: limits.dead_letter_exchange,
        };

        self.entries.push((binding, consumer));
        Ok(())
    }

    /// All registered bindings with their consumers, in registration
    /// order.
    pub fn bindings(&self) -> &[(ConsumerBinding, ConsumerPtr)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
