/// MQTT subscriber for the telemetry topic
///
/// Opens one broker connection, subscribes to one topic filter and yields
/// matching publishes as a lazy stream. There is no automatic reconnect:
/// once the connection fails after startup the subscription ends.

use futures::Stream;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet,
    Publish, QoS, SubscribeReasonCode,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::error::{BridgeError, Result};

/// Request channel capacity between client handle and event loop
const REQUEST_CAPACITY: usize = 10;

/// One message delivered by the broker
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Local correlation id for log lines
    pub id: Uuid,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text for logging, invalid UTF-8 replaced
    pub fn payload_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl From<Publish> for InboundMessage {
    fn from(publish: Publish) -> Self {
        Self::new(publish.topic, publish.payload.to_vec())
    }
}

pub struct BrokerSubscriber;

impl BrokerSubscriber {
    /// Connect to the broker and subscribe to the configured topic.
    ///
    /// Fails if the broker is unreachable, refuses the connection, or does
    /// not answer within `connect_timeout_secs`.
    pub async fn connect(config: &BrokerConfig, cancel: CancellationToken) -> Result<Subscription> {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("smartbin-bridge-{}", Uuid::new_v4().simple()));

        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        tracing::info!(
            "Connecting to MQTT broker at {}:{} as '{}'",
            config.host,
            config.port,
            client_id
        );

        let timeout = config.connect_timeout();
        tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| BridgeError::BrokerTimeout(timeout))??;

        tracing::info!("Connected to MQTT broker at {}:{}", config.host, config.port);

        client.subscribe(config.topic.clone(), qos_level(config.qos)).await?;

        Ok(Subscription {
            client,
            eventloop,
            filter: config.topic.clone(),
            cancel,
            closed: false,
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(BridgeError::BrokerRefused(code)),
                };
            }
            Ok(_) => continue,
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(BridgeError::BrokerRefused(code))
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn qos_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// What a single event loop event means for the subscription
#[derive(Debug)]
enum Step {
    Deliver(InboundMessage),
    Subscribed,
    Skip,
    Fail(BridgeError),
}

fn classify(event: Event, filter: &str) -> Step {
    match event {
        Event::Incoming(Packet::Publish(publish)) => {
            if super::topic_matches(filter, &publish.topic) {
                Step::Deliver(InboundMessage::from(publish))
            } else {
                tracing::debug!("Ignoring publish on unmatched topic '{}'", publish.topic);
                Step::Skip
            }
        }
        Event::Incoming(Packet::SubAck(ack)) => {
            if ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure))
            {
                Step::Fail(BridgeError::SubscribeRejected(filter.to_string()))
            } else {
                Step::Subscribed
            }
        }
        Event::Incoming(Packet::Disconnect) => Step::Fail(BridgeError::BrokerDisconnected),
        _ => Step::Skip,
    }
}

/// Live subscription to one topic filter
pub struct Subscription {
    client: AsyncClient,
    eventloop: EventLoop,
    filter: String,
    cancel: CancellationToken,
    closed: bool,
}

impl Subscription {
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Wait for the next matching message.
    ///
    /// Returns `None` once cancelled, and a final `Some(Err(_))` when the
    /// broker connection is lost or the subscription is rejected.
    pub async fn next_message(&mut self) -> Option<Result<InboundMessage>> {
        loop {
            if self.closed {
                return None;
            }

            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                event = self.eventloop.poll() => Some(event),
            };

            let Some(event) = event else {
                self.close().await;
                return None;
            };

            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    self.closed = true;
                    return Some(Err(e.into()));
                }
            };

            match classify(event, &self.filter) {
                Step::Deliver(message) => return Some(Ok(message)),
                Step::Subscribed => {
                    tracing::info!("Subscribed to topic '{}'", self.filter);
                }
                Step::Skip => {}
                Step::Fail(e) => {
                    self.closed = true;
                    return Some(Err(e));
                }
            }
        }
    }

    /// The subscription as an unbounded stream of messages
    pub fn into_stream(self) -> impl Stream<Item = Result<InboundMessage>> {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .next_message()
                .await
                .map(|item| (item, subscription))
        })
    }

    /// End the subscription without waiting for cancellation
    pub async fn disconnect(mut self) {
        self.close().await;
    }

    /// Send DISCONNECT and give the event loop a moment to flush it
    async fn close(&mut self) {
        self.closed = true;
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!("Disconnect request failed: {}", e);
            return;
        }
        let _ = tokio::time::timeout(Duration::from_millis(500), async {
            while self.eventloop.poll().await.is_ok() {}
        })
        .await;
        tracing::info!("Disconnected from MQTT broker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::SubAck;

    fn publish(topic: &str, payload: &[u8]) -> Event {
        Event::Incoming(Packet::Publish(Publish::new(
            topic,
            QoS::AtMostOnce,
            payload.to_vec(),
        )))
    }

    #[test]
    fn test_matching_publish_is_delivered() {
        match classify(publish("bin/data", br#"{"binId":"A1"}"#), "bin/data") {
            Step::Deliver(message) => {
                assert_eq!(message.topic, "bin/data");
                assert_eq!(message.payload_text(), r#"{"binId":"A1"}"#);
            }
            other => panic!("expected delivery, got {:?}", other),
        }
    }

    #[test]
    fn test_wildcard_filter_delivers() {
        assert!(matches!(
            classify(publish("bins/A1/data", b"{}"), "bins/+/data"),
            Step::Deliver(_)
        ));
    }

    #[test]
    fn test_other_topics_are_skipped() {
        assert!(matches!(
            classify(publish("bin/status", b"{}"), "bin/data"),
            Step::Skip
        ));
    }

    #[test]
    fn test_suback_failure_ends_subscription() {
        let ack = SubAck::new(1, vec![SubscribeReasonCode::Failure]);
        match classify(Event::Incoming(Packet::SubAck(ack)), "bin/data") {
            Step::Fail(BridgeError::SubscribeRejected(topic)) => assert_eq!(topic, "bin/data"),
            other => panic!("expected rejection, got {:?}", other),
        }

        let ack = SubAck::new(1, vec![SubscribeReasonCode::Success(QoS::AtMostOnce)]);
        assert!(matches!(
            classify(Event::Incoming(Packet::SubAck(ack)), "bin/data"),
            Step::Subscribed
        ));
    }

    #[test]
    fn test_broker_disconnect_is_failure() {
        assert!(matches!(
            classify(Event::Incoming(Packet::Disconnect), "bin/data"),
            Step::Fail(BridgeError::BrokerDisconnected)
        ));
    }

    #[test]
    fn test_invalid_utf8_payload_text_is_lossy() {
        let message = InboundMessage::new("bin/data", vec![b'{', 0xff, b'}']);
        assert_eq!(message.payload_text(), "{\u{fffd}}");
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_level(0), QoS::AtMostOnce);
        assert_eq!(qos_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_level(2), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_to_connect() {
        // Port 1 on loopback is never an MQTT broker
        let config = BrokerConfig {
            port: 1,
            connect_timeout_secs: 5,
            ..BrokerConfig::default()
        };

        let result = BrokerSubscriber::connect(&config, CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
