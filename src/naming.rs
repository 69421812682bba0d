//! Endpoint naming strategy.
//!
//! Maps a logical consumer identity to a physical queue/endpoint name.
//! The mapping must be deterministic and total: the same consumer id
//! always yields the same name within a process version, so redelivery
//! and competing-consumer semantics survive restarts.
//!
//! Strategies are pure (no I/O, no side effects) and unit-testable
//! without any broker.

use std::sync::Arc;

/// Pluggable consumer-id → endpoint-name mapping.
pub trait EndpointNaming: Send + Sync {
    /// Derive the endpoint name for a consumer id. Deterministic.
    fn name_for(&self, consumer_id: &str) -> String;
}

/// Shared naming strategy pointer.
pub type NamingPtr = Arc<dyn EndpointNaming>;

/// Default strategy: stable kebab form.
///
/// Lower-cases the consumer identity and hyphenates on case boundaries
/// and non-alphanumeric runs (`OrderConsumer` → `order-consumer`).
/// Kebab names are portable across both transport families, which have
/// different casing and character restrictions.
#[derive(Debug, Clone, Copy, Default)]
pub struct KebabCaseNaming;

impl EndpointNaming for KebabCaseNaming {
    fn name_for(&self, consumer_id: &str) -> String {
        // ---
        let chars: Vec<char> = consumer_id.chars().collect();
        let mut out = String::with_capacity(consumer_id.len() + 4);

        for (i, &c) in chars.iter().enumerate() {
            if !c.is_alphanumeric() {
                // Collapse separator runs into a single hyphen.
                if !out.is_empty() && !out.ends_with('-') {
                    out.push('-');
                }
                continue;
            }

            if c.is_uppercase() {
                // A word boundary sits before an uppercase letter that
                // follows lowercase/digit, or before the last capital of
                // an acronym run ("HTTPServer" → "http-server").
                let prev = i.checked_sub(1).map(|p| chars[p]);
                let next = chars.get(i + 1);
                let boundary = match prev {
                    Some(p) if p.is_lowercase() || p.is_numeric() => true,
                    Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                    _ => false,
                };

                if boundary && !out.is_empty() && !out.ends_with('-') {
                    out.push('-');
                }
                out.extend(c.to_lowercase());
            } else {
                out.push(c);
            }
        }

        out.trim_matches('-').to_string()
    }
}
