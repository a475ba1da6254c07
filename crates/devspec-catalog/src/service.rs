//! Resolver service combining catalog sources

use async_trait::async_trait;
use devspec_core::{CatalogRecord, DeviceIdentity, ResolveError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::local::LocalCatalogIndex;
use crate::remote::RemoteCatalog;
use crate::transport::FetchTransport;

/// A source that can resolve a device identity to a catalog record
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn resolve(
        &self,
        identity: &DeviceIdentity,
        cancel: &CancellationToken,
    ) -> Result<CatalogRecord, ResolveError>;
}

#[async_trait]
impl CatalogSource for LocalCatalogIndex {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn resolve(
        &self,
        identity: &DeviceIdentity,
        cancel: &CancellationToken,
    ) -> Result<CatalogRecord, ResolveError> {
        LocalCatalogIndex::resolve(self, identity, cancel).await
    }
}

#[async_trait]
impl<T: FetchTransport> CatalogSource for RemoteCatalog<T> {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn resolve(
        &self,
        identity: &DeviceIdentity,
        cancel: &CancellationToken,
    ) -> Result<CatalogRecord, ResolveError> {
        RemoteCatalog::resolve(self, identity, cancel).await
    }
}

/// Tries catalog sources in order, moving on only when a source has no answer
///
/// A miss (`NoDeviceFound`/`DeviceNotFound`) or an unloaded index passes the
/// request to the next source. Any other failure, including cancellation,
/// ends the resolution.
#[derive(Default, Clone)]
pub struct CatalogService {
    sources: Vec<Arc<dyn CatalogSource>>,
}

impl CatalogService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source; earlier sources are preferred
    pub fn with_source(mut self, source: Arc<dyn CatalogSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub async fn resolve(
        &self,
        identity: &DeviceIdentity,
        cancel: &CancellationToken,
    ) -> Result<CatalogRecord, ResolveError> {
        let mut last_err = ResolveError::NoDeviceFound {
            identity: identity.to_string(),
        };

        for source in &self.sources {
            match source.resolve(identity, cancel).await {
                Ok(record) => {
                    info!(
                        source = source.name(),
                        catalog_id = record.id,
                        "Catalog record resolved"
                    );
                    return Ok(record);
                }
                Err(e) if e.is_not_found() || matches!(e, ResolveError::IndexNotLoaded) => {
                    debug!(source = source.name(), error = %e, "Source has no answer, trying next");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devspec_core::{FirmwareVersion, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        outcome: fn() -> Result<CatalogRecord, ResolveError>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(
            name: &'static str,
            outcome: fn() -> Result<CatalogRecord, ResolveError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CatalogSource for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn resolve(
            &self,
            _identity: &DeviceIdentity,
            _cancel: &CancellationToken,
        ) -> Result<CatalogRecord, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new(12, 0x4447, 0x3036, FirmwareVersion::parse("5.9").unwrap())
    }

    fn record(id: i64) -> Result<CatalogRecord, ResolveError> {
        Ok(CatalogRecord {
            id,
            approved: true,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_miss_falls_through_to_next_source() {
        let local = Scripted::new("local", || {
            Err(ResolveError::DeviceNotFound {
                manufacturer: 12,
                device_ref: "4447:3036".into(),
            })
        });
        let remote = Scripted::new("remote", || record(806));
        let service = CatalogService::new()
            .with_source(local.clone())
            .with_source(remote.clone());

        assert_eq!(service.source_names(), vec!["local", "remote"]);
        let record = service.resolve(&identity(), &CancellationToken::new()).await.unwrap();
        assert_eq!(record.id, 806);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unloaded_index_falls_through() {
        let service = CatalogService::new()
            .with_source(Arc::new(LocalCatalogIndex::new()))
            .with_source(Scripted::new("remote", || record(1040)));
        let record = service.resolve(&identity(), &CancellationToken::new()).await.unwrap();
        assert_eq!(record.id, 1040);
    }

    #[tokio::test]
    async fn test_hard_failure_stops_resolution() {
        let first = Scripted::new("remote", || {
            Err(TransportError::Status {
                url: "https://catalog.test".into(),
                status: 500,
            }
            .into())
        });
        let second = Scripted::new("local", || record(1));
        let service = CatalogService::new()
            .with_source(first)
            .with_source(second.clone());

        let err = service.resolve(&identity(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ResolveError::Transport(_)));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_miss() {
        let first = Scripted::new("remote", || Err(ResolveError::Cancelled));
        let second = Scripted::new("local", || record(1));
        let service = CatalogService::new()
            .with_source(first)
            .with_source(second.clone());

        let err = service.resolve(&identity(), &CancellationToken::new()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_sources_is_not_found() {
        let err = CatalogService::new()
            .resolve(&identity(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
