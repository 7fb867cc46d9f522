//! SenML (RFC 8428) records in JSON representation
//!
//! Only the fields this bridge emits are modelled. Fields which are not set
//! are left out of the encoded output.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BASE_NAME: &str = "Mill/P1/EnergyUsage/";
pub const BASE_UNIT: &str = "";
pub const BASE_VERSION: i32 = 5;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Unable to serialize SenML pack: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenmlRecord {
    #[serde(rename = "bn", skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    #[serde(rename = "bu", skip_serializing_if = "Option::is_none")]
    pub base_unit: Option<String>,
    #[serde(rename = "bv", skip_serializing_if = "Option::is_none")]
    pub base_value: Option<f64>,
    #[serde(rename = "bver", skip_serializing_if = "Option::is_none")]
    pub base_version: Option<i32>,
    #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "u", skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "v", skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl SenmlRecord {
    fn is_base_descriptor(&self) -> bool {
        return self.base_name.is_some() || self.base_unit.is_some() || self.base_version.is_some();
    }

    fn is_measurement(&self) -> bool {
        return self.name.is_some() || self.value.is_some();
    }
}

/// Shared metadata of a measurement set, carried once as entry zero
#[derive(Debug, Clone, PartialEq)]
pub struct BaseDescriptor {
    pub name: String,
    pub unit: String,
    pub version: i32,
}

impl Default for BaseDescriptor {
    fn default() -> Self {
        return BaseDescriptor {
            name: BASE_NAME.to_string(),
            unit: BASE_UNIT.to_string(),
            version: BASE_VERSION,
        };
    }
}

/// A single named, unit tagged observation
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub name: String,
    pub unit: String,
    pub value: f64,
}

impl MeasurementRecord {
    pub fn new(name: &str, unit: &str, value: f64) -> Self {
        return MeasurementRecord { name: name.to_string(), unit: unit.to_string(), value };
    }
}

/// Ordered measurements of one telegram plus their base descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSet {
    pub base: BaseDescriptor,
    pub records: Vec<MeasurementRecord>,
}

impl MeasurementSet {
    /// Converts the set into a SenML pack, base descriptor first
    pub fn to_senml(&self) -> Vec<SenmlRecord> {
        let mut pack = Vec::with_capacity(self.records.len() + 1);
        pack.push(SenmlRecord {
            base_name: Some(self.base.name.clone()),
            base_unit: Some(self.base.unit.clone()),
            base_version: Some(self.base.version),
            ..Default::default()
        });

        for record in &self.records {
            pack.push(SenmlRecord {
                name: Some(record.name.clone()),
                unit: Some(record.unit.clone()),
                value: Some(record.value),
                ..Default::default()
            });
        }

        return pack;
    }
}

/// Resolves value relative records into absolute ones
///
/// A base value is added to every following value and dropped from the
/// output, a record without a unit inherits a non empty base unit. Base
/// descriptors (name, unit, version) stay in place. Records which carry
/// neither measurement nor descriptor data are removed.
pub fn normalize(pack: &[SenmlRecord]) -> Vec<SenmlRecord> {
    let mut base_value: Option<f64> = None;
    let mut base_unit: Option<String> = None;
    let mut result = Vec::with_capacity(pack.len());

    for record in pack {
        let mut r = record.clone();

        if let Some(bv) = r.base_value.take() {
            base_value = Some(bv);
        }
        if let Some(bu) = &r.base_unit {
            base_unit = if bu.is_empty() { None } else { Some(bu.clone()) };
        }

        if r.is_measurement() {
            if let (Some(bv), Some(v)) = (base_value, r.value) {
                r.value = Some(bv + v);
            }
            if r.unit.as_deref().map_or(true, str::is_empty) {
                if let Some(bu) = &base_unit {
                    r.unit = Some(bu.clone());
                }
            }
        }

        if r.is_measurement() || r.is_base_descriptor() {
            result.push(r);
        }
    }

    return result;
}

/// Serializes a pack as a JSON array
pub fn encode(pack: &[SenmlRecord], pretty: bool) -> Result<String, EncodeError> {
    let s = if pretty {
        serde_json::to_string_pretty(pack)?
    } else {
        serde_json::to_string(pack)?
    };
    return Ok(s);
}
