//! Per-message ingest: decode, stamp, insert.
//!
//! [`BridgeContext`] carries everything the handler needs (the sink, the
//! clock, the timestamp field name, shared connection state and counters)
//! so nothing here relies on process-wide state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::broker::InboundMessage;
use crate::record::{decode_payload, EnrichedRecord};
use crate::store::RecordSink;

/// Source of the server-side timestamp
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Result of handling one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Inserted; carries the store-assigned id
    Saved { id: String },
    /// Payload could not be decoded or encoded; nothing was written
    Rejected { reason: String },
    /// Store insert failed; the message is dropped
    Failed { reason: String },
}

/// Connection state of the two external services
#[derive(Debug, Default)]
pub struct ConnectionStatus {
    broker_connected: AtomicBool,
    store_reachable: AtomicBool,
}

impl ConnectionStatus {
    pub fn set_broker_connected(&self, connected: bool) {
        self.broker_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_store_reachable(&self, reachable: bool) {
        self.store_reachable.store(reachable, Ordering::Relaxed);
    }

    pub fn broker_connected(&self) -> bool {
        self.broker_connected.load(Ordering::Relaxed)
    }

    pub fn store_reachable(&self) -> bool {
        self.store_reachable.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.broker_connected() && self.store_reachable()
    }
}

/// Running message counters
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    saved: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub saved: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl IngestStats {
    fn record(&self, outcome: &IngestOutcome) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            IngestOutcome::Saved { .. } => &self.saved,
            IngestOutcome::Rejected { .. } => &self.rejected,
            IngestOutcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            saved: self.saved.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Service context shared by the relay loop and the health probe
#[derive(Clone)]
pub struct BridgeContext {
    sink: Arc<dyn RecordSink>,
    timestamp_field: String,
    clock: Clock,
    status: Arc<ConnectionStatus>,
    stats: Arc<IngestStats>,
}

impl BridgeContext {
    pub fn new(sink: Arc<dyn RecordSink>, timestamp_field: impl Into<String>) -> Self {
        Self {
            sink,
            timestamp_field: timestamp_field.into(),
            clock: Arc::new(Utc::now),
            status: Arc::new(ConnectionStatus::default()),
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// Replace the wall clock, e.g. with a fixed instant in tests
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn status(&self) -> &Arc<ConnectionStatus> {
        &self.status
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// Verify the store at startup and record the result.
    ///
    /// Failure is logged, not returned: the bridge keeps running and every
    /// later insert reports its own error.
    pub async fn check_store(&self) -> bool {
        match self.sink.ping().await {
            Ok(()) => {
                tracing::info!("Connected to MongoDB ({})", self.sink.target());
                self.status.set_store_reachable(true);
                true
            }
            Err(e) => {
                tracing::error!("MongoDB connection error: {}", e);
                self.status.set_store_reachable(false);
                false
            }
        }
    }

    /// Handle one broker message. Never fails; the outcome is logged.
    pub async fn ingest(&self, message: &InboundMessage) -> IngestOutcome {
        let payload_text = message.payload_text();
        tracing::info!(message_id = %message.id, topic = %message.topic, "Received: {}", payload_text);

        let outcome = self.process(message, &payload_text).await;
        self.stats.record(&outcome);
        outcome
    }

    /// Handle a bare payload, as if delivered on the subscribed topic
    pub async fn ingest_payload(&self, payload: &[u8]) -> IngestOutcome {
        self.ingest(&InboundMessage::new("", payload.to_vec())).await
    }

    async fn process(&self, message: &InboundMessage, payload_text: &str) -> IngestOutcome {
        let fields = match decode_payload(&message.payload) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::error!(
                    message_id = %message.id,
                    "Error processing message: {} (payload: {})",
                    e,
                    payload_text
                );
                return IngestOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };

        let record = EnrichedRecord::new(fields, self.timestamp_field.clone(), (self.clock)());
        if record.shadows_device_field() {
            tracing::warn!(
                message_id = %message.id,
                "Payload field '{}' replaced by server timestamp",
                self.timestamp_field
            );
        }

        match self.sink.insert(&record).await {
            Ok(id) => {
                self.status.set_store_reachable(true);
                tracing::info!(message_id = %message.id, "Saved to MongoDB with ID: {}", id);
                IngestOutcome::Saved { id }
            }
            // the record itself could not be encoded; the store was not involved
            Err(e) if e.is_payload_error() => {
                tracing::error!(
                    message_id = %message.id,
                    "Error processing message: {} (payload: {})",
                    e,
                    payload_text
                );
                IngestOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                self.status.set_store_reachable(false);
                tracing::error!(message_id = %message.id, "Failed to save message: {}", e);
                IngestOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
