//! Node topology resolution.
//!
//! Turns the raw node list of a [`TransportDescriptor`] into an ordered
//! sequence of parsed connection endpoints. Pure function of the
//! descriptor; no I/O. Callers must treat the output order as failover
//! priority: attempt connection in order, falling back on failure, so
//! that failover behavior is deterministic and reproducible.

use crate::{Result, TransportDescriptor, WorkerError};

/// A parsed, connectable broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
    pub credentials_ref: Option<String>,
}

impl NodeAddress {
    /// Render the address as an AMQP connection URI.
    pub fn amqp_uri(&self) -> String {
        format!("amqp://{}:{}/%2f", self.host, self.port)
    }

    /// Render the address as an HTTP service endpoint URL.
    ///
    /// Port 443 selects `https`; anything else is treated as a plain
    /// development endpoint.
    pub fn service_url(&self) -> String {
        let scheme = if self.port == 443 { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolve the descriptor's node list into connection endpoints.
///
/// # Errors
///
/// Returns [`WorkerError::Configuration`] if the node list is empty or
/// any entry has an unparseable `host:port` endpoint. Both are fatal:
/// the process must not start consuming with an invalid topology.
pub fn resolve(descriptor: &TransportDescriptor) -> Result<Vec<NodeAddress>> {
    // ---
    if descriptor.nodes.is_empty() {
        return Err(WorkerError::Configuration(
            "transport descriptor has an empty node list".into(),
        ));
    }

    descriptor
        .nodes
        .iter()
        .map(|node| {
            let (host, port) = parse_endpoint(&node.endpoint)?;
            Ok(NodeAddress {
                host,
                port,
                credentials_ref: node.credentials_ref.clone(),
            })
        })
        .collect()
}

/// Split `host:port`, validating both halves.
fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    // ---
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(|| {
        WorkerError::Configuration(format!("malformed broker endpoint '{endpoint}': expected host:port"))
    })?;

    if host.is_empty() {
        return Err(WorkerError::Configuration(format!(
            "malformed broker endpoint '{endpoint}': empty host"
        )));
    }

    let port: u16 = port.parse().map_err(|_| {
        WorkerError::Configuration(format!(
            "malformed broker endpoint '{endpoint}': invalid port '{port}'"
        ))
    })?;

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{BrokerNode, TransportKind};

    fn descriptor(nodes: Vec<BrokerNode>) -> TransportDescriptor {
        TransportDescriptor::new(TransportKind::QueueBroker, "order-queue").with_nodes(nodes)
    }

    #[test]
    fn resolve_preserves_input_order() {
        // ---
        let resolved = resolve(&descriptor(vec![
            BrokerNode::new("mq1", 5672),
            BrokerNode::new("mq2", 5673),
            BrokerNode::new("mq3", 5674),
        ]))
        .unwrap();

        let hosts: Vec<&str> = resolved.iter().map(|n| n.host.as_str()).collect();
        assert_eq!(hosts, vec!["mq1", "mq2", "mq3"]);
        assert_eq!(resolved[1].port, 5673);
    }

    #[test]
    fn resolve_rejects_empty_node_list() {
        // ---
        let err = resolve(&descriptor(vec![])).unwrap_err();
        assert!(matches!(err, WorkerError::Configuration(_)));
    }

    #[test]
    fn resolve_rejects_malformed_endpoint() {
        // ---
        for bad in ["mq1", "mq1:", ":5672", "mq1:no-port", "mq1:99999"] {
            let err = resolve(&descriptor(vec![BrokerNode::from_endpoint(bad)])).unwrap_err();
            assert!(
                matches!(err, WorkerError::Configuration(_)),
                "expected Configuration error for '{bad}'"
            );
        }
    }

    #[test]
    fn resolve_carries_credentials_reference() {
        // ---
        let resolved = resolve(&descriptor(vec![
            BrokerNode::new("mq1", 5672).with_credentials_ref("primary-creds"),
        ]))
        .unwrap();

        assert_eq!(resolved[0].credentials_ref.as_deref(), Some("primary-creds"));
    }

    #[test]
    fn amqp_uri_form() {
        // ---
        let resolved = resolve(&descriptor(vec![BrokerNode::new("mq1", 5672)])).unwrap();
        assert_eq!(resolved[0].amqp_uri(), "amqp://mq1:5672/%2f");
    }
}
