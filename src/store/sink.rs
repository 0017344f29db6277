use async_trait::async_trait;

use crate::error::{BridgeError, Result};
use crate::record::EnrichedRecord;

/// Destination for enriched records.
///
/// Implementations perform exactly one attempt per call; retry policy, if
/// any, belongs to the underlying driver.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Insert one record and return the store-assigned identifier as text.
    async fn insert(&self, record: &EnrichedRecord) -> Result<String>;

    /// Lightweight reachability check.
    async fn ping(&self) -> Result<()>;

    /// Human-readable target, e.g. `smart_bin_db.readings`
    fn target(&self) -> String;
}

/// Stand-in used when the store client could not be created at startup.
///
/// Every call fails with the startup error, so the bridge keeps consuming
/// and logging messages the same way it does when the store goes away.
pub struct UnavailableSink {
    target: String,
    reason: String,
}

impl UnavailableSink {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl RecordSink for UnavailableSink {
    async fn insert(&self, _record: &EnrichedRecord) -> Result<String> {
        Err(BridgeError::StoreUnavailable(self.reason.clone()))
    }

    async fn ping(&self) -> Result<()> {
        Err(BridgeError::StoreUnavailable(self.reason.clone()))
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_unavailable_sink_fails_every_call() {
        let sink = UnavailableSink::new("smart_bin_db.readings", "DNS lookup failed");
        let record = EnrichedRecord::new(Default::default(), "timestamp", Utc::now());

        let err = sink.insert(&record).await.unwrap_err();
        assert_eq!(err.to_string(), "store unavailable: DNS lookup failed");
        assert!(sink.ping().await.is_err());
        assert_eq!(sink.target(), "smart_bin_db.readings");
    }
}
