use log::{debug, warn};
use crate::models::{Electricity, Gas, GasRecord, Telegram};
use crate::obis_utils::{self, ObisData};
use super::{utils, DecoderError};

const OBIS_POWER: &str = "1-0:1.7.0";
const OBIS_ENERGY_TARIFF_1: &str = "1-0:1.8.1";
const OBIS_ENERGY_TARIFF_2: &str = "1-0:1.8.2";
const OBIS_GAS_SUFFIX: &str = ":24.2.1";
const OBIS_GAS_LEGACY_SUFFIX: &str = ":24.3.0";

/// Collects lines of the P1 stream into complete telegrams
///
/// A telegram starts with the '/' identification line and ends with the
/// '!' trailer line. Anything received outside of that is line noise.
#[derive(Debug, Default)]
pub struct TelegramFramer {
    lines: Vec<String>,
    in_telegram: bool,
}

impl TelegramFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all lines of a telegram once its trailer was pushed
    pub fn push_line(&mut self, line: &str) -> Option<Vec<String>> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.starts_with('/') {
            if self.in_telegram {
                warn!("Incomplete P1 telegram discarded ({} lines)", self.lines.len());
            }
            self.lines.clear();
            self.in_telegram = true;
        }

        if !self.in_telegram {
            if !line.is_empty() {
                debug!("Skipping P1 line outside of telegram: {}", line);
            }
            return None;
        }

        self.lines.push(line.to_string());

        if line.starts_with('!') {
            self.in_telegram = false;
            return Some(std::mem::take(&mut self.lines));
        }

        None
    }
}

/// Joins continuation lines, starting with '(', onto the object line before
fn merge_continuations(lines: &[String]) -> Vec<String> {
    let mut objects: Vec<String> = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('(') {
            if let Some(prev) = objects.last_mut() {
                prev.push_str(line);
                continue;
            }
        }
        objects.push(line.to_string());
    }
    objects
}

fn reading(data: &ObisData) -> Result<f64, DecoderError> {
    data.last_value()
        .and_then(obis_utils::extract_numeric_value)
        .ok_or_else(|| DecoderError::InvalidValue(data.code.clone()))
}

/// Verifies the checksum if the trailer carries one
pub fn verify_checksum(lines: &[String]) -> Result<(), DecoderError> {
    let Some((trailer, body)) = lines.split_last() else {
        return Err(DecoderError::InvalidFormat("empty telegram".to_string()));
    };

    let Some(expected) = utils::parse_trailer_crc(trailer) else {
        debug!("P1 telegram without checksum");
        return Ok(());
    };

    let mut data = body.join("\r\n");
    data.push_str("\r\n!");
    let calculated = utils::calculate_crc(data.as_bytes());
    if calculated != expected {
        return Err(DecoderError::ChecksumMismatch { expected, calculated });
    }

    Ok(())
}

/// Decodes one framed telegram into the readings the bridge forwards
pub fn parse_telegram(lines: &[String]) -> Result<Telegram, DecoderError> {
    let header = lines.first()
        .and_then(|l| l.strip_prefix('/'))
        .ok_or(DecoderError::MissingHeader)?;

    if !lines.last().is_some_and(|l| l.starts_with('!')) {
        return Err(DecoderError::InvalidFormat("missing trailer".to_string()));
    }

    verify_checksum(lines)?;

    let mut w: Option<f64> = None;
    let mut kwh: Option<f64> = None;
    let mut kwh_low: Option<f64> = None;
    let mut gas: Option<GasRecord> = None;

    let body = &lines[1..lines.len() - 1];
    for object in merge_continuations(body) {
        let data = match obis_utils::parse_obis_line(&object) {
            Ok(d) => d,
            Err(e) => {
                warn!("Skipping P1 object line '{}': {}", object, e);
                continue;
            }
        };

        match data.code.as_str() {
            OBIS_POWER => {
                let unit = data.last_value().and_then(obis_utils::extract_unit);
                w = Some(utils::to_watts(reading(&data)?, unit.as_deref()));
            }
            OBIS_ENERGY_TARIFF_1 => kwh_low = Some(reading(&data)?),
            OBIS_ENERGY_TARIFF_2 => kwh = Some(reading(&data)?),
            code if code.starts_with("0-") && (code.ends_with(OBIS_GAS_SUFFIX) || code.ends_with(OBIS_GAS_LEGACY_SUFFIX)) => {
                gas = Some(GasRecord {
                    timestamp: data.values.first().and_then(|v| utils::parse_timestamp(v)),
                    value: reading(&data)?,
                });
            }
            code => match obis_utils::get_obis_description(code) {
                Some(description) => debug!("Ignoring P1 object {} ({})", code, description),
                None => debug!("Ignoring unknown P1 object {}", code),
            },
        }
    }

    Ok(Telegram {
        header: header.to_string(),
        electricity: Electricity {
            w: w.ok_or(DecoderError::MissingField("W"))?,
            kwh: kwh.ok_or(DecoderError::MissingField("KWh"))?,
            kwh_low: kwh_low.ok_or(DecoderError::MissingField("KWhLow"))?,
        },
        gas: Gas {
            last_record: gas.ok_or(DecoderError::MissingField("GasUsed"))?,
        },
    })
}
