use super::target::ConnectionTarget;
use crate::config::ConnectionConfig;
use crate::error::{Result, StreamError};
use crate::parser::{boundary_from_content_type, is_multipart_replace};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

/// Opens byte streams for connection targets
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Connect and return once the response headers have arrived
    async fn open(&self, target: &ConnectionTarget) -> std::result::Result<Box<dyn ByteStream>, StreamError>;
}

/// An open response body delivered in arbitrary chunks
#[async_trait]
pub trait ByteStream: Send {
    /// Boundary token announced by the server, if any
    fn boundary(&self) -> Option<&str>;

    /// Next chunk of the body, `None` at end of stream
    async fn next_chunk(&mut self) -> std::result::Result<Option<Bytes>, StreamError>;
}

/// HTTP(S) stream source backed by a shared reqwest client
#[derive(Clone)]
pub struct HttpStreamSource {
    client: reqwest::Client,
}

impl HttpStreamSource {
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(config.user_agent.clone())
            // Every connection must be its own TCP stream
            .pool_max_idle_per_host(0)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl StreamSource for HttpStreamSource {
    async fn open(&self, target: &ConnectionTarget) -> std::result::Result<Box<dyn ByteStream>, StreamError> {
        let response = self
            .client
            .get(&target.stream_url)
            .header(ACCEPT, "multipart/x-mixed-replace")
            .send()
            .await
            .map_err(|e| StreamError::connect(target.stream_url.clone(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::connect(
                target.stream_url.clone(),
                format!("HTTP {}", status),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !is_multipart_replace(&content_type) {
            warn!(
                "{}: unexpected content-type {:?}",
                target.connection_id(),
                content_type
            );
        }

        let boundary = boundary_from_content_type(&content_type);
        debug!(
            "{}: stream opened (boundary {:?})",
            target.connection_id(),
            boundary
        );

        Ok(Box::new(HttpByteStream { response, boundary }))
    }
}

struct HttpByteStream {
    response: reqwest::Response,
    boundary: Option<String>,
}

#[async_trait]
impl ByteStream for HttpByteStream {
    fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    async fn next_chunk(&mut self) -> std::result::Result<Option<Bytes>, StreamError> {
        self.response
            .chunk()
            .await
            .map_err(|e| StreamError::Read {
                details: e.to_string(),
            })
    }
}
