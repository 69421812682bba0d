//! Injected observability boundary.
//!
//! The supervisor and adapters report lifecycle events through an
//! [`EventSink`] handed in at build time; the core never configures a
//! process-global logger or exporter. Format and transport of the
//! events are the caller's concern.

use std::sync::Arc;

use crate::SupervisorState;

/// Lifecycle and per-message events emitted by the subsystem.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Supervisor state machine transition.
    StateChanged {
        from: SupervisorState,
        to: SupervisorState,
    },

    /// A broker connection was established.
    ConnectionEstablished { node: String },

    /// A transient connection failure is being retried.
    ConnectionRetry { attempt: u32, reason: String },

    /// A consumer was bound to its endpoint.
    EndpointBound {
        consumer_id: String,
        endpoint: String,
        prefetch_count: u16,
        max_concurrent_messages: usize,
    },

    /// Binding a consumer failed; startup aborts.
    BindFailed {
        consumer_id: String,
        endpoint: String,
        reason: String,
    },

    /// A message was handed to a consumer. Carries the correlation
    /// identifier for the caller's span pipeline.
    MessageDispatched {
        endpoint: String,
        correlation_id: Option<String>,
    },

    /// A consumer rejected a message; it goes back to the broker.
    MessageRejected {
        endpoint: String,
        correlation_id: Option<String>,
        reason: String,
    },

    /// Drain deadline elapsed with handlers still running; their
    /// messages are abandoned to broker-native redelivery.
    DrainTimedOut { in_flight: usize },
}

/// Sink for lifecycle events.
///
/// Implementations must be cheap and non-blocking; they are called from
/// receive loops.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

/// Shared sink pointer.
pub type EventSinkPtr = Arc<dyn EventSink>;

/// Default sink: forwards events to `tracing` at conventional levels.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &LifecycleEvent) {
        // ---
        match event {
            LifecycleEvent::StateChanged { from, to } => {
                tracing::info!(?from, ?to, "supervisor state changed");
            }
            LifecycleEvent::ConnectionEstablished { node } => {
                tracing::info!(%node, "broker connection established");
            }
            LifecycleEvent::ConnectionRetry { attempt, reason } => {
                tracing::warn!(attempt, %reason, "retrying broker connection");
            }
            LifecycleEvent::EndpointBound {
                consumer_id,
                endpoint,
                prefetch_count,
                max_concurrent_messages,
            } => {
                tracing::info!(
                    %consumer_id,
                    %endpoint,
                    prefetch_count,
                    max_concurrent_messages,
                    "endpoint bound"
                );
            }
            LifecycleEvent::BindFailed {
                consumer_id,
                endpoint,
                reason,
            } => {
                tracing::error!(%consumer_id, %endpoint, %reason, "endpoint bind failed");
            }
            LifecycleEvent::MessageDispatched {
                endpoint,
                correlation_id,
            } => {
                tracing::debug!(%endpoint, ?correlation_id, "message dispatched");
            }
            LifecycleEvent::MessageRejected {
                endpoint,
                correlation_id,
                reason,
            } => {
                tracing::warn!(%endpoint, ?correlation_id, %reason, "message rejected");
            }
            LifecycleEvent::DrainTimedOut { in_flight } => {
                tracing::warn!(in_flight, "drain timed out, abandoning in-flight messages");
            }
        }
    }
}
