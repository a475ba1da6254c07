//! Devspec Core - Catalog record model, parsing and version matching
//!
//! This crate provides the foundational pieces shared by every catalog source:
//! - Device identity, firmware versions and inclusive version ranges
//! - The shared "first containing range, else first" selection routine
//! - Catalog record parsing with parameter coalescing
//! - The error taxonomy surfaced to callers

pub mod de;
pub mod error;
pub mod identity;
pub mod parse;
pub mod record;

pub use error::{LoadError, ParseError, ResolveError, TransportError};
pub use identity::{
    select_by_firmware, DeviceIdentity, FirmwareVersion, Selection, VersionError, VersionRange,
    VersionRanged,
};
pub use parse::{coalesce_parameters, parse_record};
pub use record::{CatalogRecord, ChannelText, Parameter, ParameterOption};
