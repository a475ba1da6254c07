//! Remote catalog source
//!
//! Resolution is two distinct phases:
//! 1. A search by manufacturer/type/id returns candidates, each with a firmware range
//! 2. The selected candidate's full record is fetched and normalized
//!
//! A failure in phase 2 never falls back to a different candidate.

use devspec_core::{
    parse_record, select_by_firmware, CatalogRecord, DeviceIdentity, ResolveError, VersionRange,
    VersionRanged,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::FetchTransport;

/// Base URL of the public device catalog
pub const DEFAULT_BASE_URL: &str = "https://opensmarthouse.org";

const SEARCH_PATH: &str = "dmxConnect/api/zwavedatabase/device/list.php";
const RECORD_PATH: &str = "dmxConnect/api/zwavedatabase/device/read.php";

/// One device listed by a catalog search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCandidate {
    pub id: i64,
    /// Present only when both bounds were published and well-formed
    pub version_range: Option<VersionRange>,
}

impl VersionRanged for RemoteCandidate {
    fn version_range(&self) -> Option<&VersionRange> {
        self.version_range.as_ref()
    }
}

/// Catalog source backed by the remote catalog service
pub struct RemoteCatalog<T> {
    transport: T,
    base_url: String,
}

impl<T: FetchTransport> RemoteCatalog<T> {
    pub fn new(transport: T) -> Self {
        Self::with_base_url(transport, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(transport: T, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Search URL for a device identity
    ///
    /// URL pattern: {base}/.../list.php?filter=manufacturer:0x{MMMM}%20{TTTT}:{IIII}
    pub fn search_url(&self, identity: &DeviceIdentity) -> String {
        format!(
            "{}/{}?filter=manufacturer:0x{:04X}%20{}",
            self.base_url,
            SEARCH_PATH,
            identity.manufacturer_id,
            identity.device_ref()
        )
    }

    /// Full-record URL for a catalog id
    pub fn record_url(&self, catalog_id: i64) -> String {
        format!("{}/{}?device_id={}", self.base_url, RECORD_PATH, catalog_id)
    }

    /// Search phase: list usable candidates in response order
    pub async fn search(
        &self,
        identity: &DeviceIdentity,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteCandidate>, ResolveError> {
        let url = self.search_url(identity);
        debug!(url = %url, identity = %identity, "Searching remote catalog");

        let body = self.transport.get(&url, cancel).await?;
        let candidates = parse_search_response(&body)?;

        if candidates.is_empty() {
            return Err(ResolveError::NoDeviceFound {
                identity: identity.to_string(),
            });
        }
        Ok(candidates)
    }

    /// Fetch phase: download and normalize one catalog record
    pub async fn fetch_record(
        &self,
        catalog_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CatalogRecord, ResolveError> {
        let url = self.record_url(catalog_id);
        debug!(url = %url, catalog_id, "Fetching remote catalog record");

        let body = self.transport.get(&url, cancel).await?;
        parse_record(&body).map_err(|source| ResolveError::Record { catalog_id, source })
    }

    /// Resolve a device identity to its best-matching catalog record
    pub async fn resolve(
        &self,
        identity: &DeviceIdentity,
        cancel: &CancellationToken,
    ) -> Result<CatalogRecord, ResolveError> {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        let candidates = self.search(identity, cancel).await?;
        let selection = select_by_firmware(&candidates, &identity.firmware).ok_or_else(|| {
            ResolveError::NoDeviceFound {
                identity: identity.to_string(),
            }
        })?;

        if selection.matched {
            debug!(
                catalog_id = selection.candidate.id,
                firmware = %identity.firmware,
                "Firmware range matched"
            );
        } else {
            warn!(
                catalog_id = selection.candidate.id,
                firmware = %identity.firmware,
                candidates = candidates.len(),
                "No candidate range contains firmware, using first listed"
            );
        }

        let record = self.fetch_record(selection.candidate.id, cancel).await?;
        info!(
            identity = %identity,
            catalog_id = record.id,
            parameters = record.parameters.len(),
            "Resolved device from remote catalog"
        );
        Ok(record)
    }
}

/// Extract candidates from a search response, dropping entries without a usable id
fn parse_search_response(body: &[u8]) -> Result<Vec<RemoteCandidate>, ResolveError> {
    let response: serde_json::Map<String, Value> =
        serde_json::from_slice(body).map_err(ResolveError::MalformedSearchResponse)?;

    let devices: &[Value] = match response.get("devices") {
        Some(Value::Array(devices)) => devices.as_slice(),
        _ => &[],
    };

    Ok(devices.iter().filter_map(candidate_from_value).collect())
}

fn candidate_from_value(device: &Value) -> Option<RemoteCandidate> {
    let id = match device.get("id")? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };

    let version_range = match (bound(device, "version_min"), bound(device, "version_max")) {
        (Some(min), Some(max)) => match VersionRange::from_bounds(Some(min), Some(max)) {
            Ok(range) => Some(range),
            Err(e) => {
                debug!(catalog_id = id, error = %e, "Ignoring unusable candidate range");
                None
            }
        },
        _ => None,
    };

    Some(RemoteCandidate { id, version_range })
}

fn bound<'a>(device: &'a Value, key: &str) -> Option<&'a str> {
    device
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
