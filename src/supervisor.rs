//! Consumption supervisor.
//!
//! Top-level orchestrator: resolves node topology, selects the
//! transport adapter variant matching the descriptor, applies every
//! registered binding, starts receiving, and owns the shutdown
//! sequence.
//!
//! ## State machine
//!
//! `Created → TopologyResolved → AdaptersBound → Receiving → Draining →
//! Stopped`, driven by [`resolve_topology`], [`bind`],
//! [`start_receiving`] and [`shutdown`]. Calling a transition out of
//! order fails with
//! [`WorkerError::InvalidState`](crate::WorkerError::InvalidState);
//! startup-phase errors are fatal and leave the supervisor in its
//! pre-transition state.
//!
//! [`resolve_topology`]: ConsumptionSupervisor::resolve_topology
//! [`bind`]: ConsumptionSupervisor::bind
//! [`start_receiving`]: ConsumptionSupervisor::start_receiving
//! [`shutdown`]: ConsumptionSupervisor::shutdown

use std::time::Duration;

use crate::domain::{AdapterPtr, DrainOutcome, EndpointTopology};
use crate::observer::{EventSinkPtr, LifecycleEvent};
use crate::retry::RetryConfig;
use crate::{topology, BindingRegistry, Result, TransportDescriptor, WorkerError};

/// Supervisor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Constructed; nothing validated yet.
    Created,
    /// Descriptor validated, connection endpoints resolved.
    TopologyResolved,
    /// Adapter connected and every binding applied.
    AdaptersBound,
    /// Long-lived operating state; messages flowing.
    Receiving,
    /// Shutdown signalled; in-flight handlers finishing.
    Draining,
    /// Terminal.
    Stopped,
}

/// Orchestrates one transport adapter over the registered bindings.
///
/// Built via [`SupervisorBuilder`](crate::SupervisorBuilder).
pub struct ConsumptionSupervisor {
    descriptor: TransportDescriptor,
    registry: BindingRegistry,
    observer: EventSinkPtr,
    retry: RetryConfig,
    drain_timeout: Duration,

    /// Adapter injected at build time (tests, custom transports);
    /// otherwise the variant is selected from `descriptor.kind` during
    /// `bind()`.
    adapter_override: Option<AdapterPtr>,

    state: SupervisorState,
    resolved: Option<EndpointTopology>,
    adapter: Option<AdapterPtr>,
}

impl ConsumptionSupervisor {
    pub(crate) fn new(
        descriptor: TransportDescriptor,
        registry: BindingRegistry,
        observer: EventSinkPtr,
        retry: RetryConfig,
        drain_timeout: Duration,
        adapter_override: Option<AdapterPtr>,
    ) -> Self {
        Self {
            descriptor,
            registry,
            observer,
            retry,
            drain_timeout,
            adapter_override,
            state: SupervisorState::Created,
            resolved: None,
            adapter: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// `Created → TopologyResolved`: validate the descriptor and build
    /// the endpoint topology. Pure; no broker I/O.
    ///
    /// # Errors
    ///
    /// Fatal [`WorkerError::Configuration`] on an empty/malformed node
    /// list or an empty binding registry — the process must not start
    /// consuming against an invalid topology.
    pub fn resolve_topology(&mut self) -> Result<()> {
        // ---
        self.expect_state(SupervisorState::Created, "resolve_topology")?;

        if self.registry.is_empty() {
            return Err(WorkerError::Configuration(
                "no consumer bindings registered".into(),
            ));
        }

        let nodes = topology::resolve(&self.descriptor)?;

        self.resolved = Some(EndpointTopology {
            kind: self.descriptor.kind,
            nodes,
            default_endpoint_name: self.descriptor.default_endpoint_name.clone(),
        });

        self.transition(SupervisorState::TopologyResolved);
        Ok(())
    }

    /// `TopologyResolved → AdaptersBound`: select the adapter variant
    /// matching the descriptor kind, connect, and apply every
    /// registered binding.
    ///
    /// # Errors
    ///
    /// Any bind error aborts startup — a partial binding set would
    /// produce ambiguous delivery.
    pub async fn bind(&mut self) -> Result<()> {
        // ---
        self.expect_state(SupervisorState::TopologyResolved, "bind")?;

        let topology = self
            .resolved
            .take()
            .ok_or_else(|| WorkerError::InvalidState("topology missing after resolve".into()))?;

        let adapter = match &self.adapter_override {
            Some(adapter) => adapter.clone(),
            None => crate::transport::create_adapter(
                self.descriptor.kind,
                self.retry.clone(),
                self.observer.clone(),
            )?,
        };

        adapter.connect(topology).await?;

        for (binding, consumer) in self.registry.bindings() {
            match adapter.bind(binding, consumer.clone()).await {
                Ok(()) => {
                    self.observer.emit(&LifecycleEvent::EndpointBound {
                        consumer_id: binding.consumer_id.clone(),
                        endpoint: binding.endpoint_name.clone(),
                        prefetch_count: binding.prefetch_count,
                        max_concurrent_messages: binding.max_concurrent_messages,
                    });
                }
                Err(err) => {
                    self.observer.emit(&LifecycleEvent::BindFailed {
                        consumer_id: binding.consumer_id.clone(),
                        endpoint: binding.endpoint_name.clone(),
                        reason: err.to_string(),
                    });
                    return Err(err);
                }
            }
        }

        self.adapter = Some(adapter);
        self.transition(SupervisorState::AdaptersBound);
        Ok(())
    }

    /// `AdaptersBound → Receiving`: begin message delivery. This is the
    /// long-lived operating state.
    pub async fn start_receiving(&mut self) -> Result<()> {
        // ---
        self.expect_state(SupervisorState::AdaptersBound, "start_receiving")?;

        self.active_adapter()?.start_receiving().await?;
        self.transition(SupervisorState::Receiving);
        Ok(())
    }

    /// Convenience: run the three startup transitions in order.
    pub async fn start(&mut self) -> Result<()> {
        // ---
        self.resolve_topology()?;
        self.bind().await?;
        self.start_receiving().await
    }

    /// `Receiving → Draining → Stopped`: stop accepting deliveries, let
    /// in-flight handlers finish up to the drain timeout, then release
    /// broker resources.
    ///
    /// Handlers still running at the deadline are abandoned; their
    /// messages stay unacknowledged and return via broker-native
    /// redelivery.
    pub async fn shutdown(&mut self) -> Result<DrainOutcome> {
        // ---
        self.expect_state(SupervisorState::Receiving, "shutdown")?;

        self.transition(SupervisorState::Draining);

        let outcome = self.active_adapter()?.shutdown(self.drain_timeout).await?;

        if !outcome.completed {
            self.observer.emit(&LifecycleEvent::DrainTimedOut {
                in_flight: outcome.abandoned,
            });
        }

        self.transition(SupervisorState::Stopped);
        Ok(outcome)
    }

    fn active_adapter(&self) -> Result<AdapterPtr> {
        self.adapter
            .clone()
            .ok_or_else(|| WorkerError::InvalidState("no active adapter".into()))
    }

    fn expect_state(&self, expected: SupervisorState, operation: &str) -> Result<()> {
        // ---
        if self.state == expected {
            Ok(())
        } else {
            Err(WorkerError::InvalidState(format!(
                "{operation}() requires {expected:?}, supervisor is {:?}",
                self.state
            )))
        }
    }

    fn transition(&mut self, to: SupervisorState) {
        // ---
        let from = self.state;
        self.state = to;
        self.observer
            .emit(&LifecycleEvent::StateChanged { from, to });
    }
}
