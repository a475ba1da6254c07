//! Devspec Catalog - Remote and local device catalog sources
//!
//! This crate resolves a device identity to a normalized catalog record:
//! - `transport`: the raw fetch boundary and its reqwest implementation
//! - `remote`: search-then-fetch resolution against the catalog service
//! - `local`: a concurrently loaded index over snapshot files
//! - `service`: ordered fallback across sources

pub mod local;
pub mod remote;
pub mod service;
pub mod transport;

pub use local::{
    CatalogEntryRef, IndexKey, IndexStats, LocalCatalogIndex, DEFAULT_MAX_CONCURRENT_READS,
};
pub use remote::{RemoteCandidate, RemoteCatalog, DEFAULT_BASE_URL};
pub use service::{CatalogService, CatalogSource};
pub use transport::{FetchTransport, HttpTransport, DEFAULT_USER_AGENT};
