//! MongoDB-backed record sink
//!
//! One [`mongodb::Client`] is created at startup and held for the process
//! lifetime. TLS uses the driver's bundled root certificates unless a CA
//! bundle file is configured.

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, Tls, TlsOptions};
use mongodb::{Client, Collection};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::record::EnrichedRecord;
use crate::store::RecordSink;

pub struct MongoSink {
    client: Client,
    collection: Collection<Document>,
}

impl MongoSink {
    /// Create the client from configuration.
    ///
    /// This does not contact the server for plain `mongodb://` URIs; use
    /// [`RecordSink::ping`] to verify reachability. `mongodb+srv://` URIs
    /// resolve their SRV records here.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        tracing::info!("Connecting to MongoDB at {}", config.redacted_uri());
        let options = client_options(config).await?;
        let client = Client::with_options(options)?;
        Ok(Self::from_client(client, &config.database, &config.collection))
    }

    pub fn from_client(client: Client, database: &str, collection: &str) -> Self {
        let collection = client.database(database).collection::<Document>(collection);
        Self { client, collection }
    }
}

/// Driver options for the configured connection string
pub async fn client_options(config: &StoreConfig) -> Result<ClientOptions> {
    let mut options = ClientOptions::parse(config.connection_uri()).await?;

    options.server_selection_timeout = Some(config.server_selection_timeout());
    if options.app_name.is_none() {
        options.app_name = Some(config.app_name.clone());
    }
    if let Some(ca_file) = &config.tls_ca_file {
        options.tls = Some(Tls::Enabled(
            TlsOptions::builder().ca_file_path(ca_file.clone()).build(),
        ));
    }

    Ok(options)
}

/// Render an inserted id for logging
pub fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl RecordSink for MongoSink {
    async fn insert(&self, record: &EnrichedRecord) -> Result<String> {
        let document = record.to_document()?;
        let result = self.collection.insert_one(document).await?;
        Ok(id_to_string(&result.inserted_id))
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    fn target(&self) -> String {
        self.collection.namespace().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;
    use mongodb::options::Acknowledgment;
    use std::path::PathBuf;
    use std::time::Duration;

    fn local_store() -> StoreConfig {
        StoreConfig {
            srv: false,
            cluster_host: "localhost:27017".to_string(),
            server_selection_timeout_secs: 2,
            ..StoreConfig::default()
        }
    }

    #[tokio::test]
    async fn test_client_options_from_parts() {
        let options = client_options(&local_store()).await.unwrap();

        assert_eq!(options.app_name.as_deref(), Some("SmartBin"));
        assert_eq!(options.retry_writes, Some(true));
        assert_eq!(
            options.write_concern.clone().and_then(|wc| wc.w),
            Some(Acknowledgment::Majority)
        );
        assert_eq!(options.server_selection_timeout, Some(Duration::from_secs(2)));
        assert!(options.tls.is_none());
    }

    #[tokio::test]
    async fn test_client_options_with_ca_bundle() {
        let config = StoreConfig {
            tls_ca_file: Some(PathBuf::from("/etc/ssl/certs/ca-bundle.pem")),
            ..local_store()
        };
        let options = client_options(&config).await.unwrap();

        match options.tls {
            Some(Tls::Enabled(tls)) => assert_eq!(
                tls.ca_file_path,
                Some(PathBuf::from("/etc/ssl/certs/ca-bundle.pem"))
            ),
            other => panic!("expected TLS enabled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_uri_is_store_error() {
        let config = StoreConfig {
            uri: Some("postgres://not-mongo".to_string()),
            ..StoreConfig::default()
        };
        assert!(matches!(
            client_options(&config).await,
            Err(crate::BridgeError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_target_names_collection() {
        let options = client_options(&local_store()).await.unwrap();
        let client = Client::with_options(options).unwrap();
        let sink = MongoSink::from_client(client, "smart_bin_db", "readings");
        assert_eq!(sink.target(), "smart_bin_db.readings");
    }

    #[test]
    fn test_id_rendering() {
        let oid = ObjectId::parse_str("65e1c2a4f1d2b3c4d5e6f708").unwrap();
        assert_eq!(id_to_string(&Bson::ObjectId(oid)), "65e1c2a4f1d2b3c4d5e6f708");
        assert_eq!(id_to_string(&Bson::String("A1-0001".to_string())), "A1-0001");
        assert_eq!(id_to_string(&Bson::Int32(7)), "7");
    }
}
