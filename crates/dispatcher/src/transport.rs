//! Transport - HTTP seam between the retry engine and the backend

use std::time::Duration;

use reqwest::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use contracts::LIBRARY_VERSION;

/// Fixed client identifier sent with shard routing headers
pub const CLIENT_ID: &str = "serverSDK";

/// Status the backend answers with when the cluster topology changed
pub const TOPOLOGY_CHANGED_STATUS: u16 = 451;

const TARGET_NODE_HEADER: &str = "RS-targetNode";
const NODE_COUNT_HEADER: &str = "RS-nodeCount";
const CLIENT_ID_HEADER: &str = "RS-userAgent";

/// Network-layer failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Failure raised by non-HTTP transports (tests, custom backends)
    #[error("connection error: {message}")]
    Connection { message: String },
}

impl TransportError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

/// Shard a request is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardTarget {
    pub index: usize,
    pub node_count: usize,
}

/// One batch upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub body: Vec<u8>,
    /// Body is gzip encoded
    pub compressed: bool,
    /// Routing headers, omitted when proxy support is off
    pub target: Option<ShardTarget>,
}

/// Backend answer to an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    /// Only read for non-2xx answers
    pub body: String,
}

impl UploadResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// `GET /cluster-info` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ClusterInfo {
    #[serde(rename = "nodeCount")]
    pub node_count: usize,
}

/// Backend access used by the retry engine and topology resolver
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Send one batch
    ///
    /// # Errors
    /// Network failures and unreadable error bodies. Non-2xx answers are
    /// returned as `Ok` with their status.
    async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, TransportError>;

    /// Query the current node count
    async fn cluster_info(&self) -> Result<ClusterInfo, TransportError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    write_key: String,
}

impl HttpTransport {
    /// # Errors
    /// Fails if the TLS backend cannot be initialized
    pub fn new(
        endpoint: &str,
        write_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            write_key: write_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Build the batch POST without sending it
    pub fn build_upload_request(&self, request: UploadRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(self.url("/v1/batch"))
            .basic_auth(&self.write_key, None::<&str>)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, request.body.len());

        if request.compressed {
            builder = builder.header(CONTENT_ENCODING, "gzip");
        }
        if let Some(target) = request.target {
            builder = builder
                .header(TARGET_NODE_HEADER, target.index)
                .header(NODE_COUNT_HEADER, target.node_count)
                .header(CLIENT_ID_HEADER, CLIENT_ID);
        }
        builder.body(request.body)
    }
}

impl Transport for HttpTransport {
    #[instrument(name = "http_upload", skip_all, fields(bytes = request.body.len()))]
    async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, TransportError> {
        let response = self.build_upload_request(request).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(UploadResponse {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        let body = response.text().await?;
        debug!(status = status.as_u16(), %body, "Upload rejected");
        Ok(UploadResponse {
            status: status.as_u16(),
            body,
        })
    }

    #[instrument(name = "http_cluster_info", skip_all)]
    async fn cluster_info(&self) -> Result<ClusterInfo, TransportError> {
        let response = self
            .client
            .get(self.url("/cluster-info"))
            .basic_auth(&self.write_key, None::<&str>)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::UnexpectedStatus {
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// `User-Agent` value
pub fn user_agent() -> String {
    format!("analytics-rust (version: {LIBRARY_VERSION})")
}
