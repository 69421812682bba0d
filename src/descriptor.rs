//! Transport descriptor: which broker family is active and how to reach it.
//!
//! This type intentionally contains no transport-specific concepts
//! (channels, queue URLs, client options). Transport adapters are
//! responsible for interpreting the descriptor into concrete connection
//! settings.
//!
//! The descriptor is built once at startup from configuration and is
//! immutable thereafter; the broker family cannot be hot-swapped.

use std::str::FromStr;

use crate::{Result, WorkerError};

/// Broker family selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Connection-oriented broker with exchange/queue binding semantics
    /// (AMQP). Messages are pushed over a persistent channel.
    QueueBroker,

    /// Cloud-managed queue service consumed via long-poll receive calls.
    /// No persistent channel; failures re-issue polls.
    ManagedQueueBroker,
}

impl FromStr for TransportKind {
    type Err = WorkerError;

    /// Parse the configuration form of the transport kind.
    ///
    /// Accepts `"queue-broker"` and `"managed-queue-broker"`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queue-broker" => Ok(TransportKind::QueueBroker),
            "managed-queue-broker" => Ok(TransportKind::ManagedQueueBroker),
            other => Err(WorkerError::Configuration(format!(
                "unrecognized transport kind: {other}, valid values: queue-broker, managed-queue-broker"
            ))),
        }
    }
}

/// One broker node as written in configuration.
///
/// The endpoint is kept in its raw `host:port` form; parsing and
/// validation happen in [`topology::resolve`](crate::topology::resolve)
/// so that a malformed entry surfaces as a fatal configuration error at
/// startup rather than a constructor panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerNode {
    /// Raw `host:port` endpoint string.
    pub endpoint: String,

    /// Opaque reference to a credentials entry held by the caller's
    /// secret store. Never the credential itself.
    pub credentials_ref: Option<String>,
}

impl BrokerNode {
    /// Create a node from a typed host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: format!("{}:{port}", host.into()),
            credentials_ref: None,
        }
    }

    /// Create a node from a raw `host:port` string.
    pub fn from_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials_ref: None,
        }
    }

    /// Attach a credentials reference.
    pub fn with_credentials_ref(mut self, reference: impl Into<String>) -> Self {
        self.credentials_ref = Some(reference.into());
        self
    }
}

/// Immutable description of the active transport.
///
/// # Example
///
/// ```
/// use mq_worker::{BrokerNode, TransportDescriptor, TransportKind};
///
/// let descriptor = TransportDescriptor::new(TransportKind::QueueBroker, "order-queue")
///     .with_node(BrokerNode::new("mq1", 5672))
///     .with_node(BrokerNode::new("mq2", 5672).with_credentials_ref("mq2-creds"));
/// ```
#[derive(Debug, Clone)]
pub struct TransportDescriptor {
    /// Active broker family. Fixed for the process lifetime.
    pub kind: TransportKind,

    /// Broker nodes in failover priority order. Must be non-empty by
    /// the time topology is resolved.
    pub nodes: Vec<BrokerNode>,

    /// Default endpoint name for consumers registered without an
    /// explicit one (e.g. the configured order queue).
    pub default_endpoint_name: String,
}

impl TransportDescriptor {
    /// Create a descriptor with an empty node list.
    pub fn new(kind: TransportKind, default_endpoint_name: impl Into<String>) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
            default_endpoint_name: default_endpoint_name.into(),
        }
    }

    /// Append one broker node. Order is failover priority.
    pub fn with_node(mut self, node: BrokerNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Replace the node list wholesale.
    pub fn with_nodes(mut self, nodes: impl IntoIterator<Item = BrokerNode>) -> Self {
        self.nodes = nodes.into_iter().collect();
        self
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn kind_parses_config_strings() {
        // ---
        assert_eq!(
            "queue-broker".parse::<TransportKind>().unwrap(),
            TransportKind::QueueBroker
        );
        assert_eq!(
            "managed-queue-broker".parse::<TransportKind>().unwrap(),
            TransportKind::ManagedQueueBroker
        );
    }

    #[test]
    fn kind_rejects_unknown_value() {
        // ---
        let err = "kafka".parse::<TransportKind>().unwrap_err();
        assert!(matches!(err, WorkerError::Configuration(_)));
    }

    #[test]
    fn node_builders_agree_on_endpoint_form() {
        // ---
        let typed = BrokerNode::new("mq1", 5672);
        let raw = BrokerNode::from_endpoint("mq1:5672");
        assert_eq!(typed.endpoint, raw.endpoint);
    }
}
