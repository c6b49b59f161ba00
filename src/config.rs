//! Client configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/dp-client/client.toml`.
//!
//! Every field is validated eagerly into the final config tree; section
//! defaults apply when a whole section is missing.  The schema converges
//! the historical overlapping response/recovery config roots into one
//! document:
//!
//! - `[connections.query]`, `[connections.ingestion]`
//! - `[query.data.request.decompose]`
//! - `[query.data.response.multistream]`, `[query.data.response.buffer]`
//! - `[query.data.recovery.stream]`, `[query.data.recovery.correlate]`
//! - `[query.data.table.construction]`
//! - `[query.timeout]`, `[query.logging]`
//! - `[ingest.multistream]`, `[ingest.buffer]`, `[ingest.provider]`,
//!   `[ingest.timeout]`, `[ingest.logging]`

use crate::buffer::BufferConfig;
use crate::channel::{
    DecompositionPolicy, IngestionChannelConfig, QueryChannelConfig, StreamType,
};
use crate::connect::{ConnectionConfig, TlsMode};
use crate::correlate::CorrelatorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Final config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub connections: ConnectionsConfig,
    pub query: QueryConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionsConfig {
    pub query: ConnectionConfig,
    pub ingestion: ConnectionConfig,
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub decompose: DecomposeConfig,
    pub multistream: MultistreamConfig,
    pub buffer: BufferConfig,
    pub stream_preferred: StreamType,
    pub correlate: CorrelateConfig,
    pub table: TableConfig,
    pub timeout: Duration,
    pub logging: LoggingConfig,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            decompose: DecomposeConfig::default(),
            multistream: MultistreamConfig::default(),
            buffer: BufferConfig::default(),
            stream_preferred: StreamType::Unidirectional,
            correlate: CorrelateConfig::default(),
            table: TableConfig::default(),
            timeout: Duration::from_secs(30),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecomposeConfig {
    pub enabled: bool,
    pub preferred: DecompositionPolicy,
    /// Hard cap on sources per request; 0 means unlimited.
    pub max_sources: usize,
    /// Hard cap on request duration; zero means unlimited.
    pub max_duration: Duration,
}

impl Default for DecomposeConfig {
    fn default() -> Self {
        DecomposeConfig {
            enabled: true,
            preferred: DecompositionPolicy::Auto,
            max_sources: 0,
            max_duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MultistreamConfig {
    pub enabled: bool,
    pub max_streams: usize,
    /// Source-seconds below which a request stays on one stream.
    pub domain_pivot: u64,
}

impl Default for MultistreamConfig {
    fn default() -> Self {
        MultistreamConfig {
            enabled: true,
            max_streams: 4,
            domain_pivot: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelateConfig {
    /// Correlate frames as they arrive instead of after full recovery.
    pub while_streaming: bool,
    pub concurrency_active: bool,
    pub concurrency_pivot: usize,
    pub thread_count: usize,
}

impl Default for CorrelateConfig {
    fn default() -> Self {
        let correlator = CorrelatorConfig::default();
        CorrelateConfig {
            while_streaming: true,
            concurrency_active: correlator.concurrency_enabled,
            concurrency_pivot: correlator.concurrency_pivot,
            thread_count: correlator.max_threads,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableConfig {
    pub error_checking: bool,
    pub domain_collision: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            error_checking: true,
            domain_collision: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            enabled: true,
            level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub multistream: MultistreamConfig,
    pub buffer: BufferConfig,
    pub provider_id: String,
    pub timeout: Duration,
    pub logging: LoggingConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            multistream: MultistreamConfig {
                enabled: true,
                max_streams: 2,
                domain_pivot: 60,
            },
            buffer: BufferConfig::default(),
            provider_id: "dp-client".to_owned(),
            timeout: Duration::from_secs(30),
            logging: LoggingConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

impl ClientConfig {
    /// The channel config the query facade wires up.  Multi-streaming
    /// requires both the multistream switch and decomposition to be on.
    pub fn query_channel_config(&self) -> QueryChannelConfig {
        let max_streams =
            if self.query.multistream.enabled && self.query.decompose.enabled {
                self.query.multistream.max_streams
            } else {
                1
            };
        QueryChannelConfig {
            stream_type: self.query.stream_preferred,
            max_streams,
            multistream_domain_pivot: self.query.multistream.domain_pivot,
            decomposition: self.query.decompose.preferred,
            operation_timeout: self.query.timeout,
        }
    }

    pub fn frame_buffer_config(&self) -> BufferConfig {
        self.query.buffer.clone()
    }

    pub fn correlator_config(&self) -> CorrelatorConfig {
        CorrelatorConfig {
            concurrency_enabled: self.query.correlate.concurrency_active,
            concurrency_pivot: self.query.correlate.concurrency_pivot,
            max_threads: self.query.correlate.thread_count,
            allow_domain_collision: self.query.table.domain_collision,
            error_checking: self.query.table.error_checking,
        }
    }

    pub fn ingestion_channel_config(&self) -> IngestionChannelConfig {
        let max_streams = if self.ingest.multistream.enabled {
            self.ingest.multistream.max_streams
        } else {
            1
        };
        IngestionChannelConfig {
            max_streams,
            operation_timeout: self.ingest.timeout,
            provider_id: self.ingest.provider_id.clone(),
        }
    }

    pub fn supplier_buffer_config(&self) -> BufferConfig {
        self.ingest.buffer.clone()
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    connections: Option<RawConnections>,
    query: Option<RawQuery>,
    ingest: Option<RawIngest>,
}

#[derive(Debug, Deserialize)]
struct RawConnections {
    query: Option<RawConnection>,
    ingestion: Option<RawConnection>,
}

#[derive(Debug, Deserialize)]
struct RawConnection {
    host: Option<String>,
    port: Option<u16>,
    plain_text: Option<bool>,
    tls_mode: Option<String>,
    tls_trusted_certs: Option<String>,
    tls_client_cert_chain: Option<String>,
    tls_client_key: Option<String>,
    keep_alive_without_calls: Option<bool>,
    keepalive_interval_ms: Option<u64>,
    keepalive_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    max_message_bytes: Option<u32>,
    gzip_compression: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawQuery {
    data: Option<RawQueryData>,
    timeout: Option<RawTimeout>,
    logging: Option<RawLogging>,
}

#[derive(Debug, Deserialize)]
struct RawQueryData {
    request: Option<RawQueryRequest>,
    response: Option<RawQueryResponse>,
    recovery: Option<RawQueryRecovery>,
    table: Option<RawQueryTable>,
}

#[derive(Debug, Deserialize)]
struct RawQueryRequest {
    decompose: Option<RawDecompose>,
}

#[derive(Debug, Deserialize)]
struct RawDecompose {
    enabled: Option<bool>,
    preferred: Option<String>,
    max_sources: Option<usize>,
    max_duration_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawQueryResponse {
    multistream: Option<RawMultistream>,
    buffer: Option<RawBuffer>,
}

#[derive(Debug, Deserialize)]
struct RawMultistream {
    enabled: Option<bool>,
    max_streams: Option<usize>,
    domain_pivot: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawBuffer {
    capacity_bytes: Option<u64>,
    allow_offer_block: Option<bool>,
    shutdown_poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawQueryRecovery {
    stream: Option<RawRecoveryStream>,
    correlate: Option<RawCorrelate>,
}

#[derive(Debug, Deserialize)]
struct RawRecoveryStream {
    preferred: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCorrelate {
    while_streaming: Option<bool>,
    concurrency: Option<RawConcurrency>,
}

#[derive(Debug, Deserialize)]
struct RawConcurrency {
    active: Option<bool>,
    pivot_size: Option<usize>,
    thread_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawQueryTable {
    construction: Option<RawTableConstruction>,
}

#[derive(Debug, Deserialize)]
struct RawTableConstruction {
    error_checking: Option<bool>,
    domain_collision: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawTimeout {
    limit: Option<u64>,
    unit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLogging {
    enabled: Option<bool>,
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIngest {
    multistream: Option<RawMultistream>,
    buffer: Option<RawBuffer>,
    provider: Option<RawProvider>,
    timeout: Option<RawTimeout>,
    logging: Option<RawLogging>,
}

#[derive(Debug, Deserialize)]
struct RawProvider {
    id: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load client config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<ClientConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load client config from the default path `/etc/dp-client/client.toml`.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/dp-client/client.toml"))
}

/// Load client config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<ClientConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    // Validate schema_version
    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    let connections = match raw.connections {
        Some(c) => ConnectionsConfig {
            query: build_connection(c.query, "connections.query")?,
            ingestion: build_connection(c.ingestion, "connections.ingestion")?,
        },
        None => ConnectionsConfig::default(),
    };

    let query = build_query(raw.query)?;
    let ingest = build_ingest(raw.ingest)?;

    Ok(ClientConfig {
        connections,
        query,
        ingest,
    })
}

// ---------------------------------------------------------------------------
// Section builders
// ---------------------------------------------------------------------------

fn build_connection(
    raw: Option<RawConnection>,
    section: &str,
) -> Result<ConnectionConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(ConnectionConfig::default());
    };
    let defaults = ConnectionConfig::default();
    let tls = match raw.tls_mode.as_deref() {
        None | Some("off") => TlsMode::Off,
        Some("system") => TlsMode::SystemDefault,
        Some("files") => TlsMode::FromFiles {
            trusted_certs: require_path(raw.tls_trusted_certs, section, "tls_trusted_certs")?,
            client_cert_chain: require_path(
                raw.tls_client_cert_chain,
                section,
                "tls_client_cert_chain",
            )?,
            client_key: require_path(raw.tls_client_key, section, "tls_client_key")?,
        },
        Some(other) => {
            return Err(ConfigError::InvalidValue(format!(
                "{section}.tls_mode must be one of off/system/files, got '{other}'"
            )));
        }
    };
    let config = ConnectionConfig {
        host: raw.host.unwrap_or(defaults.host),
        port: raw.port.unwrap_or(defaults.port),
        tls,
        plain_text: raw.plain_text.unwrap_or(defaults.plain_text),
        keep_alive_without_calls: raw
            .keep_alive_without_calls
            .unwrap_or(defaults.keep_alive_without_calls),
        keepalive_interval: raw.keepalive_interval_ms.map(Duration::from_millis),
        keepalive_timeout: raw.keepalive_timeout_ms.map(Duration::from_millis),
        connect_timeout: raw
            .connect_timeout_ms
            .map(Duration::from_millis)
            .or(defaults.connect_timeout),
        max_message_bytes: raw.max_message_bytes.unwrap_or(defaults.max_message_bytes),
        gzip_compression: raw.gzip_compression.unwrap_or(defaults.gzip_compression),
    };
    config.validate()?;
    Ok(config)
}

fn require_path(
    value: Option<String>,
    section: &str,
    field: &str,
) -> Result<PathBuf, ConfigError> {
    value
        .map(PathBuf::from)
        .ok_or_else(|| ConfigError::MissingField(format!("{section}.{field}")))
}

fn build_query(raw: Option<RawQuery>) -> Result<QueryConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(QueryConfig::default());
    };
    let data = raw.data;
    let decompose = build_decompose(data.as_ref().and_then(|d| d.request.as_ref()))?;
    let (multistream, buffer) = match data.as_ref().and_then(|d| d.response.as_ref()) {
        Some(response) => (
            build_multistream(
                response.multistream.as_ref(),
                MultistreamConfig::default(),
                "query.data.response.multistream",
            )?,
            build_buffer(response.buffer.as_ref()),
        ),
        None => (MultistreamConfig::default(), BufferConfig::default()),
    };
    let (stream_preferred, correlate) = match data.as_ref().and_then(|d| d.recovery.as_ref()) {
        Some(recovery) => (
            build_stream_preferred(recovery.stream.as_ref())?,
            build_correlate(recovery.correlate.as_ref())?,
        ),
        None => (StreamType::Unidirectional, CorrelateConfig::default()),
    };
    let table = match data
        .as_ref()
        .and_then(|d| d.table.as_ref())
        .and_then(|t| t.construction.as_ref())
    {
        Some(t) => TableConfig {
            error_checking: t.error_checking.unwrap_or(true),
            domain_collision: t.domain_collision.unwrap_or(false),
        },
        None => TableConfig::default(),
    };

    Ok(QueryConfig {
        decompose,
        multistream,
        buffer,
        stream_preferred,
        correlate,
        table,
        timeout: build_timeout(raw.timeout.as_ref(), "query.timeout")?,
        logging: build_logging(raw.logging.as_ref(), "query.logging")?,
    })
}

fn build_decompose(raw: Option<&RawQueryRequest>) -> Result<DecomposeConfig, ConfigError> {
    let defaults = DecomposeConfig::default();
    let Some(raw) = raw.and_then(|r| r.decompose.as_ref()) else {
        return Ok(defaults);
    };
    let preferred = match raw.preferred.as_deref() {
        None | Some("auto") => DecompositionPolicy::Auto,
        Some("horizontal") => DecompositionPolicy::Horizontal,
        Some("vertical") => DecompositionPolicy::Vertical,
        Some("grid") => DecompositionPolicy::Grid,
        Some(other) => {
            return Err(ConfigError::InvalidValue(format!(
                "query.data.request.decompose.preferred must be one of \
                 horizontal/vertical/grid/auto, got '{other}'"
            )));
        }
    };
    Ok(DecomposeConfig {
        enabled: raw.enabled.unwrap_or(defaults.enabled),
        preferred,
        max_sources: raw.max_sources.unwrap_or(defaults.max_sources),
        max_duration: raw
            .max_duration_secs
            .map_or(defaults.max_duration, Duration::from_secs),
    })
}

fn build_multistream(
    raw: Option<&RawMultistream>,
    defaults: MultistreamConfig,
    section: &str,
) -> Result<MultistreamConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(defaults);
    };
    let max_streams = raw.max_streams.unwrap_or(defaults.max_streams);
    if max_streams == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{section}.max_streams must be at least 1"
        )));
    }
    Ok(MultistreamConfig {
        enabled: raw.enabled.unwrap_or(defaults.enabled),
        max_streams,
        domain_pivot: raw.domain_pivot.unwrap_or(defaults.domain_pivot),
    })
}

fn build_buffer(raw: Option<&RawBuffer>) -> BufferConfig {
    let defaults = BufferConfig::default();
    let Some(raw) = raw else {
        return defaults;
    };
    BufferConfig {
        capacity_bytes: raw.capacity_bytes.unwrap_or(defaults.capacity_bytes),
        allow_offer_block: raw.allow_offer_block.unwrap_or(defaults.allow_offer_block),
        shutdown_poll_interval: raw
            .shutdown_poll_interval_ms
            .map_or(defaults.shutdown_poll_interval, Duration::from_millis),
    }
}

fn build_stream_preferred(raw: Option<&RawRecoveryStream>) -> Result<StreamType, ConfigError> {
    match raw.and_then(|r| r.preferred.as_deref()) {
        None | Some("unidirectional") => Ok(StreamType::Unidirectional),
        Some("bidirectional") => Ok(StreamType::Bidirectional),
        Some(other) => Err(ConfigError::InvalidValue(format!(
            "query.data.recovery.stream.preferred must be unidirectional or \
             bidirectional, got '{other}'"
        ))),
    }
}

fn build_correlate(raw: Option<&RawCorrelate>) -> Result<CorrelateConfig, ConfigError> {
    let defaults = CorrelateConfig::default();
    let Some(raw) = raw else {
        return Ok(defaults);
    };
    let concurrency = raw.concurrency.as_ref();
    let thread_count = concurrency
        .and_then(|c| c.thread_count)
        .unwrap_or(defaults.thread_count);
    if thread_count == 0 {
        return Err(ConfigError::InvalidValue(
            "query.data.recovery.correlate.concurrency.thread_count must be at least 1"
                .to_owned(),
        ));
    }
    Ok(CorrelateConfig {
        while_streaming: raw.while_streaming.unwrap_or(defaults.while_streaming),
        concurrency_active: concurrency
            .and_then(|c| c.active)
            .unwrap_or(defaults.concurrency_active),
        concurrency_pivot: concurrency
            .and_then(|c| c.pivot_size)
            .unwrap_or(defaults.concurrency_pivot),
        thread_count,
    })
}

fn build_timeout(raw: Option<&RawTimeout>, section: &str) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Duration::from_secs(30));
    };
    let limit = raw
        .limit
        .ok_or_else(|| ConfigError::MissingField(format!("{section}.limit")))?;
    match raw.unit.as_deref() {
        None | Some("s") => Ok(Duration::from_secs(limit)),
        Some("ms") => Ok(Duration::from_millis(limit)),
        Some("m") => Ok(Duration::from_secs(limit * 60)),
        Some(other) => Err(ConfigError::InvalidValue(format!(
            "{section}.unit must be one of ms/s/m, got '{other}'"
        ))),
    }
}

fn build_logging(raw: Option<&RawLogging>, section: &str) -> Result<LoggingConfig, ConfigError> {
    let defaults = LoggingConfig::default();
    let Some(raw) = raw else {
        return Ok(defaults);
    };
    let level = raw.level.clone().unwrap_or(defaults.level);
    match level.as_str() {
        "error" | "warn" | "info" | "debug" | "trace" => {}
        other => {
            return Err(ConfigError::InvalidValue(format!(
                "{section}.level must be a tracing level, got '{other}'"
            )));
        }
    }
    Ok(LoggingConfig {
        enabled: raw.enabled.unwrap_or(defaults.enabled),
        level,
    })
}

fn build_ingest(raw: Option<RawIngest>) -> Result<IngestConfig, ConfigError> {
    let defaults = IngestConfig::default();
    let Some(raw) = raw else {
        return Ok(defaults);
    };
    Ok(IngestConfig {
        multistream: build_multistream(
            raw.multistream.as_ref(),
            defaults.multistream,
            "ingest.multistream",
        )?,
        buffer: build_buffer(raw.buffer.as_ref()),
        provider_id: raw
            .provider
            .and_then(|p| p.id)
            .unwrap_or(defaults.provider_id),
        timeout: build_timeout(raw.timeout.as_ref(), "ingest.timeout")?,
        logging: build_logging(raw.logging.as_ref(), "ingest.logging")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_every_default() {
        let config = load_config_from_str("schema_version = 1").unwrap();
        assert_eq!(config.connections.query.port, 50051);
        assert_eq!(config.query.multistream.max_streams, 4);
        assert_eq!(config.query.timeout, Duration::from_secs(30));
        assert!(config.query.table.error_checking);
        assert_eq!(config.ingest.provider_id, "dp-client");
    }

    #[test]
    fn missing_schema_version_is_an_error() {
        let err = load_config_from_str("").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn wrong_schema_version_is_an_error() {
        let err = load_config_from_str("schema_version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn full_document_parses_into_the_tree() {
        let toml = r#"
            schema_version = 1

            [connections.query]
            host = "dp.example.org"
            port = 50052
            plain_text = false
            tls_mode = "system"
            keepalive_interval_ms = 30000
            keepalive_timeout_ms = 10000
            max_message_bytes = 8388608
            gzip_compression = true

            [connections.ingestion]
            host = "dp-ingest.example.org"

            [query.data.request.decompose]
            enabled = true
            preferred = "grid"
            max_sources = 500
            max_duration_secs = 3600

            [query.data.response.multistream]
            enabled = true
            max_streams = 8
            domain_pivot = 120

            [query.data.response.buffer]
            capacity_bytes = 1048576
            allow_offer_block = true
            shutdown_poll_interval_ms = 5

            [query.data.recovery.stream]
            preferred = "bidirectional"

            [query.data.recovery.correlate]
            while_streaming = false

            [query.data.recovery.correlate.concurrency]
            active = true
            pivot_size = 32
            thread_count = 3

            [query.data.table.construction]
            error_checking = false
            domain_collision = true

            [query.timeout]
            limit = 500
            unit = "ms"

            [query.logging]
            enabled = true
            level = "debug"

            [ingest.multistream]
            max_streams = 6

            [ingest.provider]
            id = "beamline-7"

            [ingest.timeout]
            limit = 2
            unit = "m"
        "#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.connections.query.host, "dp.example.org");
        assert_eq!(config.connections.query.max_message_bytes, 8_388_608);
        assert!(config.connections.query.gzip_compression);
        assert_eq!(config.connections.ingestion.host, "dp-ingest.example.org");
        assert_eq!(config.query.decompose.preferred, DecompositionPolicy::Grid);
        assert_eq!(config.query.decompose.max_sources, 500);
        assert_eq!(config.query.multistream.max_streams, 8);
        assert_eq!(config.query.buffer.capacity_bytes, 1_048_576);
        assert_eq!(config.query.stream_preferred, StreamType::Bidirectional);
        assert!(!config.query.correlate.while_streaming);
        assert_eq!(config.query.correlate.thread_count, 3);
        assert!(!config.query.table.error_checking);
        assert!(config.query.table.domain_collision);
        assert_eq!(config.query.timeout, Duration::from_millis(500));
        assert_eq!(config.query.logging.level, "debug");
        assert_eq!(config.ingest.multistream.max_streams, 6);
        assert_eq!(config.ingest.provider_id, "beamline-7");
        assert_eq!(config.ingest.timeout, Duration::from_secs(120));
    }

    #[test]
    fn invalid_enumerations_are_rejected_with_the_field_path() {
        let toml = r#"
            schema_version = 1
            [query.data.request.decompose]
            preferred = "diagonal"
        "#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(err.to_string().contains("decompose.preferred"));

        let toml = r#"
            schema_version = 1
            [query.timeout]
            limit = 5
            unit = "hours"
        "#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(err.to_string().contains("query.timeout.unit"));
    }

    #[test]
    fn zero_stream_and_thread_counts_are_rejected() {
        let toml = r#"
            schema_version = 1
            [query.data.response.multistream]
            max_streams = 0
        "#;
        assert!(load_config_from_str(toml).is_err());

        let toml = r#"
            schema_version = 1
            [query.data.recovery.correlate.concurrency]
            thread_count = 0
        "#;
        assert!(load_config_from_str(toml).is_err());
    }

    #[test]
    fn tls_files_mode_requires_all_three_paths() {
        let toml = r#"
            schema_version = 1
            [connections.query]
            tls_mode = "files"
            tls_trusted_certs = "/etc/dp/ca.pem"
        "#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn multistream_switch_off_forces_a_single_stream() {
        let toml = r#"
            schema_version = 1
            [query.data.response.multistream]
            enabled = false
            max_streams = 8
        "#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.query_channel_config().max_streams, 1);
    }

    #[test]
    fn table_construction_feeds_the_correlator_config() {
        let toml = r#"
            schema_version = 1
            [query.data.table.construction]
            error_checking = false
            domain_collision = true
        "#;
        let config = load_config_from_str(toml).unwrap();
        let correlator = config.correlator_config();
        assert!(!correlator.error_checking);
        assert!(correlator.allow_domain_collision);
    }
}
