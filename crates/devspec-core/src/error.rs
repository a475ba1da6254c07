//! Error taxonomy shared by the parser and both catalog sources

use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn raw catalog bytes into a [`CatalogRecord`](crate::CatalogRecord)
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed catalog JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("Invalid catalog data for record {id}: {reason}")]
    InvalidCatalogData { id: i64, reason: String },
}

/// Failure of the raw fetch layer (network or local file)
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request to {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("Request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Request was cancelled")]
    Cancelled,
}

/// Failure to resolve a device identity to a catalog record
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No catalog device found for {identity}")]
    NoDeviceFound { identity: String },
    #[error("Device {device_ref} of manufacturer {manufacturer} is not in the local catalog")]
    DeviceNotFound { manufacturer: u32, device_ref: String },
    #[error("Catalog transport failed: {0}")]
    Transport(#[source] TransportError),
    /// Search body is not a JSON object; unparseable record bodies surface as `Record`
    #[error("Malformed catalog search response: {0}")]
    MalformedSearchResponse(#[source] serde_json::Error),
    #[error("Catalog record {catalog_id} could not be used: {source}")]
    Record {
        catalog_id: i64,
        #[source]
        source: ParseError,
    },
    #[error("Local catalog index has not been loaded")]
    IndexNotLoaded,
    #[error("Resolution was cancelled")]
    Cancelled,
}

impl ResolveError {
    /// True when the call was aborted rather than failed
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for a plain catalog miss, as opposed to a broken source
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoDeviceFound { .. } | Self::DeviceNotFound { .. })
    }
}

impl From<TransportError> for ResolveError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}

/// Failure to build the local catalog index
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to enumerate snapshot directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Index load was cancelled")]
    Cancelled,
}

impl LoadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
