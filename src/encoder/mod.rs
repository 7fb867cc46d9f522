use log::{debug, error};
use crate::models::Telegram;
use crate::senml::{self, BaseDescriptor, MeasurementRecord, MeasurementSet};

/// Result of encoding one telegram
#[derive(Debug, Clone)]
pub struct EncodedTelegram {
    pub set: MeasurementSet,
    /// Normalized SenML JSON, empty if serialization failed
    pub msg: String,
    pub w: f64,
    pub kwh: f64,
    pub kwh_low: f64,
    pub gas_used: f64,
}

/// Turns telegrams into SenML measurement sets
///
/// Encoding is pure, the encoder holds no state besides its configuration.
#[derive(Debug, Clone)]
pub struct TelegramEncoder {
    log_target: String,
    pretty: bool,
}

impl TelegramEncoder {
    pub fn new(log_target: String) -> Self {
        return TelegramEncoder { log_target, pretty: false };
    }

    /// Pretty printed output, meant for debugging only
    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        return self;
    }

    /// Moves the encoder's events to another target, other settings are kept
    pub fn with_log_target(mut self, log_target: &str) -> Self {
        self.log_target = log_target.to_string();
        return self;
    }

    pub fn measurement_set(telegram: &Telegram) -> MeasurementSet {
        let [w, kwh, kwh_low, gas_used] = telegram.readings();
        return MeasurementSet {
            base: BaseDescriptor::default(),
            records: vec![
                MeasurementRecord::new("W", "W", w),
                MeasurementRecord::new("KWh", "KWh", kwh),
                MeasurementRecord::new("KWhLow", "KWh", kwh_low),
                MeasurementRecord::new("GasUsed", "m3", gas_used),
            ],
        };
    }

    pub fn encode(&self, telegram: &Telegram) -> EncodedTelegram {
        let set = Self::measurement_set(telegram);
        let pack = senml::normalize(&set.to_senml());

        let msg = match senml::encode(&pack, self.pretty) {
            Ok(s) => s,
            Err(e) => {
                error!(target: self.log_target.as_str(), "Encoding telegram failed, dispatching without SenML: {}", e);
                String::new()
            }
        };
        debug!(target: self.log_target.as_str(), "Encoded telegram: {}", msg);

        let [w, kwh, kwh_low, gas_used] = telegram.readings();
        return EncodedTelegram { set, msg, w, kwh, kwh_low, gas_used };
    }
}
