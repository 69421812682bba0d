//! Supervisor builder.
//!
//! Fluent construction with clear separation between required inputs
//! (descriptor, bindings) and optional tuning (observer, retry, drain
//! timeout, adapter override). Validation happens at `build()`.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::AdapterPtr;
use crate::observer::{EventSinkPtr, TracingSink};
use crate::retry::RetryConfig;
use crate::{BindingRegistry, ConsumptionSupervisor, Result, TransportDescriptor, WorkerError};

/// Builder for [`ConsumptionSupervisor`].
///
/// # Example
///
/// ```no_run
/// use mq_worker::{
///     BindingLimits, BindingRegistry, BrokerNode, ConsumerPtr, SupervisorBuilder,
///     TransportDescriptor, TransportKind,
/// };
/// use std::time::Duration;
///
/// # async fn example(order_consumer: ConsumerPtr) -> mq_worker::Result<()> {
/// let descriptor = TransportDescriptor::new(TransportKind::QueueBroker, "order-queue")
///     .with_node(BrokerNode::new("mq1", 5672));
///
/// let mut registry = BindingRegistry::with_default_naming();
/// registry.register(order_consumer, BindingLimits::new(2, 4))?;
///
/// let mut supervisor = SupervisorBuilder::new()
///     .descriptor(descriptor)
///     .registry(registry)
///     .drain_timeout(Duration::from_secs(10))
///     .build()?;
///
/// supervisor.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct SupervisorBuilder {
    descriptor: Option<TransportDescriptor>,
    registry: Option<BindingRegistry>,
    adapter: Option<AdapterPtr>,
    observer: Option<EventSinkPtr>,
    retry: Option<RetryConfig>,
    drain_timeout: Option<Duration>,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self {
            descriptor: None,
            registry: None,
            adapter: None,
            observer: None,
            retry: None,
            drain_timeout: None,
        }
    }

    /// Set the transport descriptor (required).
    pub fn descriptor(mut self, descriptor: TransportDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Set the binding registry (required).
    pub fn registry(mut self, registry: BindingRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Inject a pre-built adapter instead of selecting one from the
    /// descriptor kind. Used by tests and custom transports.
    pub fn adapter(mut self, adapter: AdapterPtr) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Set the lifecycle event sink.
    ///
    /// Default: [`TracingSink`].
    pub fn observer(mut self, observer: EventSinkPtr) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Set the connection retry policy used by the adapter.
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Bound the drain phase of shutdown.
    ///
    /// Default: 30 seconds.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Build the supervisor (consumes self).
    ///
    /// # Errors
    ///
    /// [`WorkerError::Configuration`] when a required field is missing.
    /// Broker I/O does not happen here; connection starts at
    /// [`bind()`](ConsumptionSupervisor::bind).
    pub fn build(self) -> Result<ConsumptionSupervisor> {
        // ---
        let descriptor = self
            .descriptor
            .ok_or_else(|| WorkerError::Configuration("descriptor is required".into()))?;
        let registry = self
            .registry
            .ok_or_else(|| WorkerError::Configuration("binding registry is required".into()))?;

        let observer = self.observer.unwrap_or_else(|| Arc::new(TracingSink));
        let retry = self.retry.unwrap_or_default();
        let drain_timeout = self.drain_timeout.unwrap_or(Duration::from_secs(30));

        Ok(ConsumptionSupervisor::new(
            descriptor,
            registry,
            observer,
            retry,
            drain_timeout,
            self.adapter,
        ))
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
