use std::collections::HashMap;
use lazy_static::lazy_static;
use log::debug;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ObisError {
    #[error("Invalid data line format: {0}")]
    InvalidDataLine(String),
    #[error("Invalid OBIS code: {0}")]
    InvalidObisCode(String),
}

/// One COSEM object line, e.g. `0-1:24.2.1(101209112500W)(12785.123*m3)`
#[derive(Debug, Clone, PartialEq)]
pub struct ObisData {
    pub code: String,
    /// Content of every bracket group in order of appearance
    pub values: Vec<String>,
}

impl ObisData {
    /// The last bracket group, which holds the reading for all objects we use
    pub fn last_value(&self) -> Option<&str> {
        return self.values.last().map(|v| v.as_str());
    }
}

lazy_static! {
    static ref OBIS_DESCRIPTIONS: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("1-3:0.2.8", "DSMR version");
        map.insert("0-0:1.0.0", "Date and time");
        map.insert("0-0:96.1.1", "Equipment identifier");
        map.insert("1-0:1.8.1", "Active energy + (tariff 1)");
        map.insert("1-0:1.8.2", "Active energy + (tariff 2)");
        map.insert("1-0:2.8.1", "Active energy - (tariff 1)");
        map.insert("1-0:2.8.2", "Active energy - (tariff 2)");
        map.insert("0-0:96.14.0", "Tariff indicator");
        map.insert("1-0:1.7.0", "Active power + (total)");
        map.insert("1-0:2.7.0", "Active power - (total)");
        map.insert("0-1:24.1.0", "Gas device type");
        map.insert("0-1:24.2.1", "Gas last 5 minute value");
        map.insert("0-1:24.3.0", "Gas last hourly value (DSMR 2.2)");
        map
    };
}

pub fn get_obis_description(obis_code: &str) -> Option<&'static str> {
    OBIS_DESCRIPTIONS.get(obis_code).copied()
}

pub fn validate_obis_code(code: &str) -> bool {
    // OBIS code format: A-B:C.D.E*F
    // A: Medium (0=abstract, 1=electricity, 7=gas)
    // B: Channel, the M-Bus channel of the gas meter on P1 ports
    // C.D.E: Physical value, processing method, tariff
    let parts: Vec<&str> = code.split(':').collect();
    if parts.len() != 2 {
        return false;
    }

    let ab_parts: Vec<&str> = parts[0].split('-').collect();
    if ab_parts.len() != 2 {
        return false;
    }

    let cde_part = parts[1].split('*').next().unwrap_or("");
    let cde_parts: Vec<&str> = cde_part.split('.').collect();
    if cde_parts.len() != 3 {
        return false;
    }

    for part in ab_parts.iter().chain(cde_parts.iter()) {
        if part.parse::<u8>().is_err() {
            return false;
        }
    }

    true
}

pub fn normalize_obis_code(code: &str) -> String {
    code.trim().replace(' ', "")
}

pub fn extract_unit(value_content: &str) -> Option<String> {
    if let Some(star_pos) = value_content.rfind('*') {
        let unit = &value_content[star_pos + 1..];
        if !unit.is_empty() {
            return Some(unit.to_string());
        }
    }
    None
}

pub fn extract_numeric_value(value_str: &str) -> Option<f64> {
    // "000123.456", "123.456*kWh" or "01.193*kW"
    let cleaned = value_str
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect::<String>();

    cleaned.parse::<f64>().ok()
}

/// Splits an object line into its OBIS code and bracket groups
pub fn parse_obis_line(line: &str) -> Result<ObisData, ObisError> {
    let line = line.trim();

    let paren_start = line.find('(')
        .ok_or_else(|| ObisError::InvalidDataLine(line.to_string()))?;

    let code = normalize_obis_code(&line[..paren_start]);
    if !validate_obis_code(&code) {
        return Err(ObisError::InvalidObisCode(code));
    }

    let mut values = Vec::new();
    let mut rest = &line[paren_start..];
    while let Some(stripped) = rest.strip_prefix('(') {
        let end = stripped.find(')')
            .ok_or_else(|| ObisError::InvalidDataLine(line.to_string()))?;
        values.push(stripped[..end].to_string());
        rest = stripped[end + 1..].trim_start();
    }

    if !rest.is_empty() {
        return Err(ObisError::InvalidDataLine(line.to_string()));
    }

    debug!("Parsed OBIS line - Code: {}, Values: {:?}", code, values);

    Ok(ObisData { code, values })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_obis_code() {
        assert!(validate_obis_code("1-0:1.8.1"));
        assert!(validate_obis_code("0-1:24.2.1"));
        assert!(validate_obis_code("1-0:1.7.0*255"));
        assert!(!validate_obis_code("invalid"));
        assert!(!validate_obis_code("1:2.3.4"));
        assert!(!validate_obis_code("1-0:1.8"));
    }

    #[test]
    fn test_get_obis_description() {
        assert_eq!(get_obis_description("1-0:1.8.1"), Some("Active energy + (tariff 1)"));
        assert_eq!(get_obis_description("nonexistent"), None);
    }

    #[test]
    fn test_extract_unit_and_value() {
        assert_eq!(extract_unit("123.456*kWh"), Some("kWh".to_string()));
        assert_eq!(extract_unit("123456"), None);
        assert_eq!(extract_unit("123*"), None);
        assert_eq!(extract_numeric_value("000123.456*kWh"), Some(123.456));
        assert_eq!(extract_numeric_value("01.193*kW"), Some(1.193));
        assert_eq!(extract_numeric_value("kWh"), None);
    }

    #[test]
    fn test_parse_obis_line_groups() {
        let d = parse_obis_line("0-1:24.2.1(101209112500W)(12785.123*m3)").unwrap();
        assert_eq!(d.code, "0-1:24.2.1");
        assert_eq!(d.values, vec!["101209112500W".to_string(), "12785.123*m3".to_string()]);
        assert_eq!(d.last_value(), Some("12785.123*m3"));

        let d = parse_obis_line("1-0:1.8.1(000123.456*kWh)").unwrap();
        assert_eq!(d.values.len(), 1);
    }

    #[test]
    fn test_parse_obis_line_errors() {
        assert!(matches!(parse_obis_line("no brackets"), Err(ObisError::InvalidDataLine(_))));
        assert!(matches!(parse_obis_line("1-0:1.8.1(12"), Err(ObisError::InvalidDataLine(_))));
        assert!(matches!(parse_obis_line("foo(12)"), Err(ObisError::InvalidObisCode(_))));
    }
}
