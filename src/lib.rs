//! # smartbin-bridge: MQTT to MongoDB telemetry relay
//!
//! Subscribes to one MQTT topic carrying smart-bin sensor readings, decodes
//! each payload as a JSON object, stamps it with the server receive time and
//! inserts it into a MongoDB collection.
//!
//! ```text
//!  MQTT topic (bin/data)
//!       |
//!       v
//!  +--------------+   raw bytes   +---------------+   Document   +-----------+
//!  | Subscription | ------------> | BridgeContext | -----------> | MongoSink |
//!  +--------------+               |   ::ingest    |              +-----------+
//!                                 +---------------+
//! ```
//!
//! ## Behaviour
//!
//! - **One message at a time**: the insert for a message completes before
//!   the next one is received.
//! - **Pass-through**: device fields are stored unchanged, plus one
//!   `timestamp` field holding a BSON date.
//! - **Best effort**: malformed payloads and failed inserts are logged and
//!   dropped; nothing is retried.
//!
//! ## Example
//!
//! ```ignore
//! use smartbin_bridge::{Bridge, BridgeConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let mut config = BridgeConfig::load_or_default("bridge.yaml")?;
//! config.apply_env()?;
//! Bridge::new(config).run(CancellationToken::new()).await?;
//! ```

pub mod bridge;
pub mod broker;
pub mod config;
pub mod error;
pub mod health;
pub mod ingest;
pub mod record;
pub mod store;

pub use bridge::{relay, Bridge};
pub use broker::{BrokerSubscriber, InboundMessage, Subscription};
pub use config::{BridgeConfig, BrokerConfig, HealthConfig, IngestConfig, StoreConfig};
pub use error::{BridgeError, Result};
pub use ingest::{BridgeContext, Clock, ConnectionStatus, IngestOutcome, IngestStats, StatsSnapshot};
pub use record::{decode_payload, EnrichedRecord, TelemetryRecord};
pub use store::{MongoSink, RecordSink, UnavailableSink};
