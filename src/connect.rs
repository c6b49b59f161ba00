//! Connection handling: one owned transport channel plus the two service
//! stubs, exposing the stream flavours behind the transport seams.

use crate::config::ConfigError;
use crate::error::DpError;
use async_trait::async_trait;
use dp_wire::{
    AckStream, DpIngestionServiceClient, DpQueryServiceClient, IngestRequestStream,
    IngestTransport, QueryTransport, RequestStream, ResponseStream, StubOptions,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tonic::Status;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::info;

/// TLS configuration for a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    #[default]
    Off,
    /// System trust roots, no client certificate.
    SystemDefault,
    /// Explicit PEM material for server trust and client identity.
    FromFiles {
        trusted_certs: PathBuf,
        client_cert_chain: PathBuf,
        client_key: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
    /// When true, TLS is disabled regardless of `tls`.
    pub plain_text: bool,
    pub keep_alive_without_calls: bool,
    pub keepalive_interval: Option<Duration>,
    /// Applies after any HTTP/2 ping.
    pub keepalive_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    /// Must be a power of two.
    pub max_message_bytes: u32,
    pub gzip_compression: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_owned(),
            port: 50051,
            tls: TlsMode::Off,
            plain_text: true,
            keep_alive_without_calls: false,
            keepalive_interval: None,
            keepalive_timeout: None,
            connect_timeout: Some(Duration::from_secs(10)),
            max_message_bytes: 4 * 1024 * 1024,
            gzip_compression: false,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("connection host is empty".to_owned()));
        }
        if !self.max_message_bytes.is_power_of_two() {
            return Err(ConfigError::InvalidValue(format!(
                "max_message_bytes must be a power of two, got {}",
                self.max_message_bytes
            )));
        }
        Ok(())
    }

    fn use_tls(&self) -> bool {
        !self.plain_text && self.tls != TlsMode::Off
    }

    fn endpoint(&self) -> Result<Endpoint, DpError> {
        self.validate().map_err(DpError::Config)?;
        let scheme = if self.use_tls() { "https" } else { "http" };
        let uri = format!("{scheme}://{}:{}", self.host, self.port);
        let mut endpoint = Endpoint::from_shared(uri.clone()).map_err(|e| {
            DpError::Config(ConfigError::InvalidValue(format!(
                "connection uri '{uri}': {e}"
            )))
        })?;
        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(interval) = self.keepalive_interval {
            endpoint = endpoint.http2_keep_alive_interval(interval);
        }
        if let Some(timeout) = self.keepalive_timeout {
            endpoint = endpoint.keep_alive_timeout(timeout);
        }
        endpoint = endpoint.keep_alive_while_idle(self.keep_alive_without_calls);

        if self.use_tls() {
            let tls = match &self.tls {
                TlsMode::Off => unreachable!("use_tls checked above"),
                TlsMode::SystemDefault => ClientTlsConfig::new(),
                TlsMode::FromFiles {
                    trusted_certs,
                    client_cert_chain,
                    client_key,
                } => {
                    let ca = read_pem(trusted_certs)?;
                    let cert = read_pem(client_cert_chain)?;
                    let key = read_pem(client_key)?;
                    ClientTlsConfig::new()
                        .ca_certificate(Certificate::from_pem(ca))
                        .identity(Identity::from_pem(cert, key))
                }
            };
            endpoint = endpoint.tls_config(tls).map_err(|e| {
                DpError::Config(ConfigError::InvalidValue(format!("tls config: {e}")))
            })?;
        }
        Ok(endpoint)
    }

    fn stub_options(&self) -> StubOptions {
        StubOptions {
            max_message_bytes: self.max_message_bytes as usize,
            gzip: self.gzip_compression,
        }
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, DpError> {
    std::fs::read(path).map_err(|e| {
        DpError::Config(ConfigError::Io(format!(
            "reading PEM file '{}': {e}",
            path.display()
        )))
    })
}

/// One owned channel to a service endpoint, with both stubs attached.
///
/// The query and ingestion services usually live behind different
/// endpoints; build one `Connection` per configured endpoint.
#[derive(Debug, Clone)]
pub struct Connection {
    query: DpQueryServiceClient,
    ingestion: DpIngestionServiceClient,
}

impl Connection {
    /// Connect eagerly; fails if the endpoint is unreachable.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, DpError> {
        let endpoint = config.endpoint()?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| DpError::Transport(Status::unavailable(e.to_string())))?;
        info!(host = %config.host, port = config.port, tls = config.use_tls(), "connected");
        Ok(Self::from_channel(channel, config))
    }

    /// Build on a lazily-connecting channel: the first RPC dials.
    pub fn connect_lazy(config: &ConnectionConfig) -> Result<Self, DpError> {
        let endpoint = config.endpoint()?;
        Ok(Self::from_channel(endpoint.connect_lazy(), config))
    }

    fn from_channel(channel: Channel, config: &ConnectionConfig) -> Self {
        let options = config.stub_options();
        Connection {
            query: DpQueryServiceClient::with_options(channel.clone(), options),
            ingestion: DpIngestionServiceClient::with_options(channel, options),
        }
    }

    pub fn query_client(&self) -> DpQueryServiceClient {
        self.query.clone()
    }

    pub fn ingestion_client(&self) -> DpIngestionServiceClient {
        self.ingestion.clone()
    }
}

#[async_trait]
impl QueryTransport for Connection {
    async fn unary(
        &self,
        request: dp_wire::QueryDataRequest,
    ) -> Result<dp_wire::QueryDataResponse, Status> {
        let mut client = self.query.clone();
        Ok(client.query_data(request).await?.into_inner())
    }

    async fn server_stream(
        &self,
        request: dp_wire::QueryDataRequest,
    ) -> Result<ResponseStream, Status> {
        let mut client = self.query.clone();
        let response = client.query_data_stream(request).await?;
        Ok(Box::pin(response.into_inner()))
    }

    async fn bidi_stream(&self, requests: RequestStream) -> Result<ResponseStream, Status> {
        let mut client = self.query.clone();
        let response = client.query_data_bidi(requests).await?;
        Ok(Box::pin(response.into_inner()))
    }
}

#[async_trait]
impl IngestTransport for Connection {
    async fn ingest(
        &self,
        request: dp_wire::IngestDataRequest,
    ) -> Result<dp_wire::IngestDataResponse, Status> {
        let mut client = self.ingestion.clone();
        Ok(client.ingest_data(request).await?.into_inner())
    }

    async fn ingest_stream(&self, requests: IngestRequestStream) -> Result<AckStream, Status> {
        let mut client = self.ingestion.clone();
        let response = client.ingest_data_stream(requests).await?;
        Ok(Box::pin(response.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_power_of_two_message_size_is_rejected() {
        let config = ConnectionConfig {
            max_message_bytes: 3_000_000,
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(
            ConnectionConfig::default().validate().is_ok(),
            "default size is a power of two"
        );
    }

    #[test]
    fn plain_text_overrides_tls_selection() {
        let config = ConnectionConfig {
            plain_text: true,
            tls: TlsMode::SystemDefault,
            ..ConnectionConfig::default()
        };
        assert!(!config.use_tls());
    }

    #[tokio::test]
    async fn lazy_connection_builds_without_a_live_endpoint() {
        let config = ConnectionConfig {
            host: "127.0.0.1".to_owned(),
            port: 1,
            ..ConnectionConfig::default()
        };
        assert!(Connection::connect_lazy(&config).is_ok());
    }
}
