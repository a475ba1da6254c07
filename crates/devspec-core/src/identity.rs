//! Device identity, firmware versions and version-range selection
//!
//! Catalog entries publish the firmware range they apply to as dotted strings
//! ("5.0" .. "5.255"). Versions are compared component by component as
//! integers, with missing trailing components treated as zero.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Empty version string")]
    Empty,
    #[error("Invalid version string: {0}")]
    Invalid(String),
    #[error("Version range minimum {min} is above maximum {max}")]
    InvertedRange { min: String, max: String },
}

/// A dotted numeric firmware version of arbitrary length
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FirmwareVersion {
    components: Vec<u32>,
}

impl FirmwareVersion {
    pub fn new(components: Vec<u32>) -> Self {
        if components.is_empty() {
            return Self::lowest();
        }
        Self { components }
    }

    /// Lowest representable version, used for an unspecified lower bound
    pub fn lowest() -> Self {
        Self {
            components: vec![0],
        }
    }

    /// Highest representable version, used for an unspecified upper bound
    pub fn highest() -> Self {
        Self {
            components: vec![u32::MAX; 3],
        }
    }

    pub fn components(&self) -> &[u32] {
        &self.components
    }

    /// Parse a version string such as "5.13", "v1.2.3" or "1.2.3-beta"
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let mut v = input.trim();
        if v.starts_with('v') || v.starts_with('V') {
            v = &v[1..];
        }
        if v.is_empty() {
            return Err(VersionError::Empty);
        }

        let parsed: Result<Vec<u32>, _> = v.split('.').map(|c| c.trim().parse::<u32>()).collect();
        if let Ok(components) = parsed {
            return Ok(Self { components });
        }

        // Pre-release and build metadata carry no ordering weight for catalog ranges
        let sem = semver::Version::parse(v).map_err(|_| VersionError::Invalid(input.to_string()))?;
        let components = [sem.major, sem.minor, sem.patch]
            .into_iter()
            .map(u32::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionError::Invalid(input.to_string()))?;
        Ok(Self { components })
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FirmwareVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FirmwareVersion {}

impl FromStr for FirmwareVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FirmwareVersion {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FirmwareVersion> for String {
    fn from(value: FirmwareVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Inclusive firmware range; `min <= max` always holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRange {
    min: FirmwareVersion,
    max: FirmwareVersion,
}

impl VersionRange {
    pub fn new(min: FirmwareVersion, max: FirmwareVersion) -> Result<Self, VersionError> {
        if min > max {
            return Err(VersionError::InvertedRange {
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(Self { min, max })
    }

    /// Range covering every representable version
    pub fn unbounded() -> Self {
        Self {
            min: FirmwareVersion::lowest(),
            max: FirmwareVersion::highest(),
        }
    }

    /// Build a range from optional bound strings, widening missing bounds
    pub fn from_bounds(min: Option<&str>, max: Option<&str>) -> Result<Self, VersionError> {
        let min = match min.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => FirmwareVersion::parse(s)?,
            None => FirmwareVersion::lowest(),
        };
        let max = match max.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => FirmwareVersion::parse(s)?,
            None => FirmwareVersion::highest(),
        };
        Self::new(min, max)
    }

    pub fn min(&self) -> &FirmwareVersion {
        &self.min
    }

    pub fn max(&self) -> &FirmwareVersion {
        &self.max
    }

    pub fn contains(&self, version: &FirmwareVersion) -> bool {
        &self.min <= version && version <= &self.max
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Identity of a physical device as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub manufacturer_id: u32,
    pub product_type: u16,
    pub product_id: u16,
    pub firmware: FirmwareVersion,
}

impl DeviceIdentity {
    pub fn new(
        manufacturer_id: u32,
        product_type: u16,
        product_id: u16,
        firmware: FirmwareVersion,
    ) -> Self {
        Self {
            manufacturer_id,
            product_type,
            product_id,
            firmware,
        }
    }

    /// Catalog device reference, e.g. "4447:3036"
    pub fn device_ref(&self) -> String {
        format!("{:04X}:{:04X}", self.product_type, self.product_id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "manufacturer 0x{:04X} device {} firmware {}",
            self.manufacturer_id,
            self.device_ref(),
            self.firmware
        )
    }
}

/// Anything that may carry a firmware range
pub trait VersionRanged {
    fn version_range(&self) -> Option<&VersionRange>;
}

/// Outcome of [`select_by_firmware`]
#[derive(Debug)]
pub struct Selection<'a, T> {
    pub candidate: &'a T,
    pub index: usize,
    /// False when no range contained the firmware and the first candidate was taken
    pub matched: bool,
}

/// Pick the first candidate whose range contains `firmware`, else the first candidate
///
/// Both catalog sources use this so they break ties identically. The fallback
/// is positional, not a closeness heuristic.
pub fn select_by_firmware<'a, T: VersionRanged>(
    candidates: &'a [T],
    firmware: &FirmwareVersion,
) -> Option<Selection<'a, T>> {
    let hit = candidates
        .iter()
        .enumerate()
        .find(|(_, c)| c.version_range().is_some_and(|r| r.contains(firmware)));

    match hit {
        Some((index, candidate)) => Some(Selection {
            candidate,
            index,
            matched: true,
        }),
        None => candidates.first().map(|candidate| Selection {
            candidate,
            index: 0,
            matched: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> FirmwareVersion {
        FirmwareVersion::parse(s).unwrap()
    }

    struct Candidate {
        id: u32,
        range: Option<VersionRange>,
    }

    impl VersionRanged for Candidate {
        fn version_range(&self) -> Option<&VersionRange> {
            self.range.as_ref()
        }
    }

    fn candidate(id: u32, min: &str, max: &str) -> Candidate {
        Candidate {
            id,
            range: Some(VersionRange::new(v(min), v(max)).unwrap()),
        }
    }

    #[test]
    fn test_numeric_component_ordering() {
        assert!(v("5.9") < v("5.13"));
        assert!(v("5.255") > v("5.13"));
        assert!(v("10.0") > v("9.99"));
    }

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(v("5.9"), v("5.9.0"));
        assert!(v("5") < v("5.0.1"));
    }

    #[test]
    fn test_parse_prefix_and_prerelease() {
        assert_eq!(v("v1.2.3").components(), &[1, 2, 3]);
        assert_eq!(v(" 1.2 ").components(), &[1, 2]);
        assert_eq!(v("1.2.3-beta.1").components(), &[1, 2, 3]);
        assert!(FirmwareVersion::parse("").is_err());
        assert!(FirmwareVersion::parse("abc").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(v("5.13").to_string(), "5.13");
    }

    #[test]
    fn test_range_boundaries_inclusive() {
        let range = VersionRange::new(v("5.0"), v("5.12")).unwrap();
        assert!(range.contains(&v("5.0")));
        assert!(range.contains(&v("5.12")));
        assert!(range.contains(&v("5.9")));
        assert!(!range.contains(&v("5.13")));
        assert!(!range.contains(&v("4.255")));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = VersionRange::new(v("5.13"), v("5.0")).unwrap_err();
        assert!(matches!(err, VersionError::InvertedRange { .. }));
    }

    #[test]
    fn test_missing_bounds_widen() {
        let range = VersionRange::from_bounds(None, Some("")).unwrap();
        assert_eq!(range, VersionRange::unbounded());
        assert!(range.contains(&v("0")));
        assert!(range.contains(&v("255.255")));
    }

    #[test]
    fn test_device_ref_zero_padded() {
        let id = DeviceIdentity::new(12, 0x0102, 0x3, v("1.0"));
        assert_eq!(id.device_ref(), "0102:0003");
    }

    #[test]
    fn test_select_first_containing() {
        let candidates = vec![candidate(806, "5.0", "5.12"), candidate(1040, "5.13", "5.255")];
        let sel = select_by_firmware(&candidates, &v("5.13")).unwrap();
        assert_eq!(sel.candidate.id, 1040);
        assert!(sel.matched);
    }

    #[test]
    fn test_select_falls_back_to_first_not_closest() {
        let candidates = vec![candidate(1, "1.0", "1.5"), candidate(2, "6.0", "6.9")];
        // 6.10 is far closer to the second range but the first still wins
        let sel = select_by_firmware(&candidates, &v("6.10")).unwrap();
        assert_eq!(sel.candidate.id, 1);
        assert!(!sel.matched);
    }

    #[test]
    fn test_select_skips_rangeless() {
        let candidates = vec![
            Candidate { id: 1, range: None },
            candidate(2, "1.0", "2.0"),
        ];
        let sel = select_by_firmware(&candidates, &v("1.5")).unwrap();
        assert_eq!(sel.candidate.id, 2);
        assert_eq!(sel.index, 1);
    }

    #[test]
    fn test_select_empty() {
        let candidates: Vec<Candidate> = Vec::new();
        assert!(select_by_firmware(&candidates, &v("1.0")).is_none());
    }
}
