//! Domain abstractions shared by the supervisor and the transport
//! adapters.

mod adapter;

pub use adapter::{AdapterPtr, BoundEndpoint, DrainOutcome, EndpointTopology, TransportAdapter};
