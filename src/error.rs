//! Error type shared by every bridge component.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Payload bytes are not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Payload text is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is valid JSON but not an object.
    #[error("payload must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    /// A record could not be converted into a BSON document.
    #[error("document encoding error: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),

    /// Any error reported by the MongoDB driver (network, validation,
    /// duplicate key, server selection).
    #[error("store error: {0}")]
    Store(#[from] mongodb::error::Error),

    /// The store client could not be created at startup
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("broker connection error: {0}")]
    BrokerConnection(#[from] rumqttc::ConnectionError),

    #[error("broker client error: {0}")]
    BrokerClient(#[from] rumqttc::ClientError),

    /// The broker answered CONNACK with a non-success code.
    #[error("broker refused connection: {0:?}")]
    BrokerRefused(rumqttc::ConnectReturnCode),

    #[error("no CONNACK from broker within {0:?}")]
    BrokerTimeout(Duration),

    #[error("broker rejected subscription to '{0}'")]
    SubscribeRejected(String),

    #[error("broker closed the connection")]
    BrokerDisconnected,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True for errors caused by the payload itself rather than a service.
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            BridgeError::Utf8(_)
                | BridgeError::Json(_)
                | BridgeError::NotAnObject(_)
                | BridgeError::Encode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
