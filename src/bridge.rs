//! Service wiring: startup order, the relay loop and the connectivity check.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerSubscriber, InboundMessage};
use crate::config::{BridgeConfig, StoreConfig};
use crate::error::{BridgeError, Result};
use crate::health;
use crate::ingest::BridgeContext;
use crate::store::{MongoSink, RecordSink, UnavailableSink};

/// Feed every message from `messages` through the ingest handler.
///
/// Strictly sequential: the insert for one message completes before the
/// next one is pulled. Returns `Ok` when the stream ends (cancellation) and
/// the first broker error otherwise.
pub async fn relay<S>(messages: S, ctx: &BridgeContext) -> Result<()>
where
    S: Stream<Item = Result<InboundMessage>>,
{
    futures::pin_mut!(messages);

    while let Some(item) = messages.next().await {
        match item {
            Ok(message) => {
                ctx.ingest(&message).await;
            }
            Err(e) => {
                tracing::error!("Broker subscription ended: {}", e);
                return Err(e);
            }
        }
    }

    Ok(())
}

pub struct Bridge {
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Build the service context backed by MongoDB.
    ///
    /// A client that cannot be created (bad URI, SRV lookup failure) is
    /// logged and replaced by a sink that fails every insert.
    pub async fn context(&self) -> BridgeContext {
        let store = &self.config.store;
        let sink: Arc<dyn RecordSink> = match MongoSink::connect(store).await {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                tracing::error!("MongoDB connection error: {}", e);
                Arc::new(UnavailableSink::new(
                    format!("{}.{}", store.database, store.collection),
                    e.to_string(),
                ))
            }
        };
        BridgeContext::new(sink, self.config.ingest.timestamp_field.clone())
    }

    /// Run until cancelled or until the broker connection is lost.
    ///
    /// A store that cannot be reached at startup is logged and tolerated;
    /// a broker that cannot be reached is fatal.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let ctx = self.context().await;
        self.run_with(ctx, cancel).await
    }

    /// Same as [`run`](Self::run) with a caller-supplied context
    pub async fn run_with(self, ctx: BridgeContext, cancel: CancellationToken) -> Result<()> {
        ctx.check_store().await;

        let health_task = match self.config.health.port {
            Some(port) => match health::bind(&self.config.health.bind, port).await {
                Ok(listener) => Some(tokio::spawn(health::serve(
                    listener,
                    ctx.clone(),
                    cancel.child_token(),
                ))),
                Err(e) => {
                    tracing::error!(
                        "Health server disabled, cannot bind {}:{}: {}",
                        self.config.health.bind,
                        port,
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let subscription = match BrokerSubscriber::connect(&self.config.broker, cancel.clone()).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(
                    "Could not connect to MQTT broker at {}:{}: {}",
                    self.config.broker.host,
                    self.config.broker.port,
                    e
                );
                cancel.cancel();
                return Err(e);
            }
        };
        ctx.status().set_broker_connected(true);

        tracing::info!(
            "Bridge service started. Waiting for sensor data on '{}'...",
            subscription.filter()
        );

        let result = relay(subscription.into_stream(), &ctx).await;
        ctx.status().set_broker_connected(false);

        // stop the health server with the relay
        cancel.cancel();
        if let Some(task) = health_task {
            match task.await {
                Ok(Err(e)) => tracing::warn!("Health server stopped with error: {}", e),
                Err(e) => tracing::warn!("Health server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }

        let stats = ctx.stats().snapshot();
        tracing::info!(
            "Bridge stopped: {} received, {} saved, {} rejected, {} failed",
            stats.received,
            stats.saved,
            stats.rejected,
            stats.failed
        );

        result
    }

    /// Verify both services once, then disconnect
    pub async fn check(self) -> Result<()> {
        let ctx = self.context().await;
        let store_ok = ctx.check_store().await;

        let subscription =
            BrokerSubscriber::connect(&self.config.broker, CancellationToken::new()).await?;
        tracing::info!("MQTT broker reachable, topic '{}'", subscription.filter());
        subscription.disconnect().await;

        if store_ok {
            Ok(())
        } else {
            Err(unreachable_store(&self.config.store))
        }
    }
}

fn unreachable_store(store: &StoreConfig) -> BridgeError {
    BridgeError::StoreUnavailable(format!("{} did not answer ping", store.redacted_uri()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EnrichedRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct OrderedSink {
        levels: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl RecordSink for OrderedSink {
        async fn insert(&self, record: &EnrichedRecord) -> Result<String> {
            // yield so a concurrent loop would interleave
            tokio::task::yield_now().await;
            let mut levels = self.levels.lock().unwrap();
            levels.push(record.fields["level"].clone());
            Ok(levels.len().to_string())
        }

        async fn ping(&self) -> Result<()> {
            Err(BridgeError::Config("unreachable".to_string()))
        }

        fn target(&self) -> String {
            "ordered".to_string()
        }
    }

    fn message(payload: &str) -> Result<InboundMessage> {
        Ok(InboundMessage::new("bin/data", payload.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn test_relay_preserves_receipt_order() {
        let sink = Arc::new(OrderedSink::default());
        let ctx = BridgeContext::new(sink.clone(), "timestamp");

        let messages = futures::stream::iter(vec![
            message(r#"{"level": 1}"#),
            message(r#"{"level": 2}"#),
            message("not json"),
            message(r#"{"level": 3}"#),
        ]);

        relay(messages, &ctx).await.unwrap();

        let levels = sink.levels.lock().unwrap();
        assert_eq!(*levels, vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)]);
        assert_eq!(ctx.stats().snapshot().rejected, 1);
    }

    #[tokio::test]
    async fn test_relay_stops_on_broker_error() {
        let sink = Arc::new(OrderedSink::default());
        let ctx = BridgeContext::new(sink.clone(), "timestamp");

        let messages = futures::stream::iter(vec![
            message(r#"{"level": 1}"#),
            Err(BridgeError::BrokerDisconnected),
            message(r#"{"level": 2}"#),
        ]);

        let err = relay(messages, &ctx).await.unwrap_err();
        assert!(matches!(err, BridgeError::BrokerDisconnected));
        assert_eq!(sink.levels.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_fatal_even_if_store_is_down() {
        let mut config = BridgeConfig::default();
        config.broker.port = 1;
        config.broker.connect_timeout_secs = 5;

        let ctx = BridgeContext::new(Arc::new(OrderedSink::default()), "timestamp");
        let result = Bridge::new(config).run_with(ctx.clone(), CancellationToken::new()).await;

        assert!(result.is_err());
        assert!(!ctx.status().store_reachable());
        assert!(!ctx.status().broker_connected());
    }

    #[tokio::test]
    async fn test_health_port_in_use_is_not_fatal() {
        let occupied = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let mut config = BridgeConfig::default();
        config.health.bind = "127.0.0.1".to_string();
        config.health.port = Some(port);
        config.broker.port = 1;
        config.broker.connect_timeout_secs = 5;

        let ctx = BridgeContext::new(Arc::new(OrderedSink::default()), "timestamp");
        let err = Bridge::new(config).run_with(ctx, CancellationToken::new()).await.unwrap_err();

        // startup got past the health server and failed on the broker
        assert!(!matches!(err, BridgeError::Io(_)));
    }

    #[test]
    fn test_unreachable_store_error_masks_password() {
        let store = StoreConfig {
            username: "bin".to_string(),
            password: "s3cret".to_string(),
            ..StoreConfig::default()
        };
        let err = unreachable_store(&store);

        assert!(matches!(err, BridgeError::StoreUnavailable(_)));
        let message = err.to_string();
        assert!(message.starts_with("store unavailable: mongodb+srv://bin:****@"));
        assert!(!message.contains("s3cret"));
    }
}
