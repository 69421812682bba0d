mod adapter;

pub use adapter::{create_sqs_adapter, SqsAdapter};
