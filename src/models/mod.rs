use serde::{Deserialize, Serialize};
use chrono::NaiveDateTime;


/// Electricity readings of one telegram
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Electricity {
    /// Instantaneous power draw in watts
    pub w: f64,
    /// Cumulative energy, normal (high) tariff
    pub kwh: f64,
    /// Cumulative energy, low tariff
    pub kwh_low: f64,
}

/// One recorded gas meter value with the time the meter captured it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GasRecord {
    pub timestamp: Option<NaiveDateTime>,
    /// Cumulative volume in m3
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gas {
    pub last_record: GasRecord,
}

/// Represents one decoded report of the meter
///
/// Telegrams are produced by a decoder once per reporting cycle of the meter
/// and consumed right away by the trigger, they are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telegram {
    /// Identification line of the meter without the leading '/'
    pub header: String,
    pub electricity: Electricity,
    pub gas: Gas,
}

impl Telegram {
    pub fn new(w: f64, kwh: f64, kwh_low: f64, gas_used: f64) -> Self {
        return Telegram {
            header: "".to_string(),
            electricity: Electricity { w, kwh, kwh_low },
            gas: Gas { last_record: GasRecord { timestamp: None, value: gas_used } },
        };
    }

    /// The four raw readings in their fixed order W, KWh, KWhLow, GasUsed
    pub fn readings(&self) -> [f64; 4] {
        return [
            self.electricity.w,
            self.electricity.kwh,
            self.electricity.kwh_low,
            self.gas.last_record.value,
        ];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readings_order() {
        let t = Telegram::new(0.5012, 1234.5678, 987.6543, 45.321);
        assert_eq!(t.readings(), [0.5012, 1234.5678, 987.6543, 45.321]);
        assert!(t.gas.last_record.timestamp.is_none());
    }
}
