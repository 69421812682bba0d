mod adapter;

pub use adapter::{create_amqp_adapter, AmqpAdapter};
