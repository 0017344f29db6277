/// MQTT broker integration module
///
/// Provides the single-topic subscription that feeds the ingest handler

pub mod subscriber;
pub mod topic;

pub use subscriber::{BrokerSubscriber, InboundMessage, Subscription};
pub use topic::topic_matches;
