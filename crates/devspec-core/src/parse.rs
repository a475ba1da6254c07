//! Catalog record parsing and parameter normalization

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

use crate::de;
use crate::error::ParseError;
use crate::record::{CatalogRecord, ChannelText, Parameter, ParameterOption};

#[derive(Deserialize)]
struct RawRecord {
    database_id: i64,
    approved: i64,
    deleted: i64,
    #[serde(default, deserialize_with = "de::text")]
    overview: String,
    #[serde(default, deserialize_with = "de::text")]
    description: String,
    #[serde(default, deserialize_with = "de::text")]
    label: String,
    #[serde(default)]
    manufacturer: Option<RawManufacturer>,
    #[serde(default)]
    parameters: Option<Vec<RawParameter>>,
    #[serde(default)]
    endpoints: Option<Vec<RawEndpoint>>,
}

#[derive(Deserialize)]
struct RawManufacturer {
    #[serde(default, deserialize_with = "de::text")]
    label: String,
}

/// One parameter entry exactly as the catalog lists it
#[derive(Deserialize)]
struct RawParameter {
    #[serde(default, deserialize_with = "de::int_as")]
    param_id: u16,
    #[serde(default, deserialize_with = "de::int")]
    id: i64,
    #[serde(default, deserialize_with = "de::text")]
    label: String,
    #[serde(default, deserialize_with = "de::text")]
    description: String,
    #[serde(default, deserialize_with = "de::text")]
    overview: String,
    #[serde(default, deserialize_with = "de::text")]
    units: String,
    #[serde(default, deserialize_with = "de::int_as")]
    size: u8,
    #[serde(default, deserialize_with = "de::hex_u64")]
    bitmask: u64,
    #[serde(default, deserialize_with = "de::int")]
    minimum: i64,
    #[serde(default, deserialize_with = "de::int")]
    maximum: i64,
    #[serde(default, deserialize_with = "de::int")]
    default: i64,
    #[serde(default, deserialize_with = "de::flag")]
    read_only: bool,
    #[serde(default, deserialize_with = "de::flag")]
    write_only: bool,
    #[serde(default)]
    options: Option<Vec<RawOption>>,
}

#[derive(Deserialize)]
struct RawOption {
    #[serde(default, deserialize_with = "de::text")]
    label: String,
    #[serde(default, deserialize_with = "de::int")]
    value: i64,
}

#[derive(Deserialize)]
struct RawEndpoint {
    #[serde(default)]
    commandclass: Option<Vec<RawCommandClass>>,
}

#[derive(Deserialize)]
struct RawCommandClass {
    #[serde(default, deserialize_with = "de::text")]
    commandclass_name: String,
    #[serde(default)]
    channels: Option<Vec<RawChannel>>,
}

#[derive(Deserialize)]
struct RawChannel {
    #[serde(default, deserialize_with = "de::text")]
    config: String,
    #[serde(default, deserialize_with = "de::text")]
    label: String,
    #[serde(default, deserialize_with = "de::text")]
    overview: String,
}

impl From<RawParameter> for Parameter {
    fn from(raw: RawParameter) -> Self {
        Self {
            number: raw.param_id,
            record_id: raw.id,
            label: raw.label,
            description: raw.description,
            overview: raw.overview,
            units: raw.units,
            size: raw.size,
            bitmask: raw.bitmask,
            minimum: raw.minimum,
            maximum: raw.maximum,
            default: raw.default,
            read_only: raw.read_only,
            write_only: raw.write_only,
            options: raw
                .options
                .unwrap_or_default()
                .into_iter()
                .map(|o| ParameterOption {
                    label: o.label,
                    value: o.value,
                })
                .collect(),
            sub_parameters: Vec::new(),
        }
    }
}

/// Parse raw catalog bytes into a normalized, validated record
pub fn parse_record(bytes: &[u8]) -> Result<CatalogRecord, ParseError> {
    // Reject top-level arrays up front; derived struct impls would accept them
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(bytes)?;
    let raw: RawRecord = serde_json::from_value(serde_json::Value::Object(object))?;

    if raw.deleted != 0 {
        return Err(ParseError::InvalidCatalogData {
            id: raw.database_id,
            reason: "record is marked deleted".to_string(),
        });
    }
    if raw.approved == 0 {
        return Err(ParseError::InvalidCatalogData {
            id: raw.database_id,
            reason: "record is not approved".to_string(),
        });
    }

    let flat: Vec<Parameter> = raw
        .parameters
        .unwrap_or_default()
        .into_iter()
        .map(Parameter::from)
        .collect();
    let raw_count = flat.len();
    let parameters = coalesce_parameters(flat);

    debug!(
        catalog_id = raw.database_id,
        raw_parameters = raw_count,
        parameters = parameters.len(),
        "Parsed catalog record"
    );

    Ok(CatalogRecord {
        id: raw.database_id,
        approved: true,
        deleted: false,
        overview: raw.overview,
        description: raw.description,
        label: raw.label,
        manufacturer_label: raw.manufacturer.map(|m| m.label).unwrap_or_default(),
        parameters,
        command_class_channels: collect_channels(raw.endpoints.unwrap_or_default()),
    })
}

/// Merge entries sharing a parameter number into one parameter with sub-parameters
///
/// Groups keep first-seen order. The first entry of a group is its
/// representative; the rest become sub-parameters in their original order.
pub fn coalesce_parameters(entries: Vec<Parameter>) -> Vec<Parameter> {
    let mut slot_by_number: HashMap<u16, usize> = HashMap::new();
    let mut parameters: Vec<Parameter> = Vec::with_capacity(entries.len());

    for mut entry in entries {
        // Sub-parameters are one level deep only
        let nested = std::mem::take(&mut entry.sub_parameters);
        match slot_by_number.get(&entry.number) {
            Some(&slot) => {
                trace!(
                    number = entry.number,
                    record_id = entry.record_id,
                    "Coalescing sub-parameter"
                );
                parameters[slot].sub_parameters.push(entry);
                parameters[slot].sub_parameters.extend(nested);
            }
            None => {
                slot_by_number.insert(entry.number, parameters.len());
                entry.sub_parameters = nested;
                parameters.push(entry);
            }
        }
    }

    parameters
}

/// Parameter number referenced by a channel `config` string such as "param=3"
fn config_param_number(config: &str) -> Option<u16> {
    config
        .split([',', ';', ' '])
        .filter_map(|token| token.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("param"))
        .and_then(|(_, value)| value.trim().parse::<u16>().ok())
}

fn collect_channels(endpoints: Vec<RawEndpoint>) -> BTreeMap<u16, ChannelText> {
    let mut channels = BTreeMap::new();

    for class in endpoints
        .into_iter()
        .flat_map(|e| e.commandclass.unwrap_or_default())
    {
        for channel in class.channels.unwrap_or_default() {
            let Some(number) = config_param_number(&channel.config) else {
                continue;
            };
            // First channel naming a parameter wins
            channels.entry(number).or_insert_with(|| ChannelText {
                command_class: class.commandclass_name.clone(),
                label: channel.label,
                overview: channel.overview,
            });
        }
    }

    channels
}
