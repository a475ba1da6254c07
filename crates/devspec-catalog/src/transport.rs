//! Raw fetch transport used by the remote catalog

use async_trait::async_trait;
use devspec_core::TransportError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Default user agent sent to the catalog service
pub const DEFAULT_USER_AGENT: &str = concat!("devspec/", env!("CARGO_PKG_VERSION"));

/// Fetches the bytes behind a resource locator
///
/// Implementations must report non-2xx responses as [`TransportError::Status`],
/// decode transfer/content encodings transparently, and return
/// [`TransportError::Cancelled`] once `cancel` fires.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    async fn get(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError>;
}

#[async_trait]
impl<T: FetchTransport + ?Sized> FetchTransport for Arc<T> {
    async fn get(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).get(locator, cancel).await
    }
}

/// HTTP transport backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport; `request_timeout` of `None` leaves requests unbounded
    pub fn new(user_agent: &str, request_timeout: Option<Duration>) -> reqwest::Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent).gzip(true);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wrap an already configured client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let network = |e: reqwest::Error| TransportError::Network {
            url: url.to_string(),
            source: Box::new(e),
        };

        trace!(url = %url, "Sending catalog request");
        let response = self.client.get(url).send().await.map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(network)?;
        debug!(url = %url, bytes = body.len(), "Fetched catalog resource");
        Ok(body.to_vec())
    }
}

#[async_trait]
impl FetchTransport for HttpTransport {
    async fn get(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.fetch(locator) => result,
        }
    }
}
