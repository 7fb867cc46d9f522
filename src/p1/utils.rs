use chrono::NaiveDateTime;
use crc16::{State, ARC};
use log::debug;

/// CRC16/ARC as used by DSMR 4 and later, over everything from '/' to '!'
pub fn calculate_crc(data: &[u8]) -> u16 {
    State::<ARC>::calculate(data)
}

/// Parses the 4 hex digit checksum following the '!' of the trailer line
///
/// DSMR 2.x/3.x meters send a bare '!' which yields `None`.
pub fn parse_trailer_crc(trailer: &str) -> Option<u16> {
    let hex = trailer.trim().strip_prefix('!')?.trim();
    if hex.len() != 4 {
        return None;
    }
    u16::from_str_radix(hex, 16).ok()
}

/// Parses timestamps like `101209112500W`, the trailing DST flag (S/W) is ignored
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let digits = value.get(..12)?;
    match NaiveDateTime::parse_from_str(digits, "%y%m%d%H%M%S") {
        Ok(ts) => Some(ts),
        Err(e) => {
            debug!("Unable to parse P1 timestamp {}: {:?}", value, e);
            None
        }
    }
}

/// Converts a power reading to watts based on its unit
pub fn to_watts(value: f64, unit: Option<&str>) -> f64 {
    match unit {
        Some(u) if u.eq_ignore_ascii_case("kW") => value * 1000.0,
        _ => value,
    }
}
