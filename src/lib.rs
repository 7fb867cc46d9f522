//! P1 bridge library
//!
//! Reads telegrams of DSMR P1 smart meters, normalizes the electricity and
//! gas readings into SenML and hands the result to every registered handler.

pub mod models;
pub mod config;
pub mod obis_utils;
pub mod p1;
pub mod senml;
pub mod encoder;
pub mod handlers;
pub mod trigger;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export common types for easier access
pub use models::Telegram;
pub use config::{Config, ConfigError, TriggerConfig};
pub use encoder::TelegramEncoder;
pub use handlers::{Handler, HandlerPayload, HandlerRegistry};
pub use p1::{P1Decoder, TelegramDecoder};
pub use trigger::{P1Trigger, RunningTrigger, TriggerStatus};
pub use shutdown::ShutdownSignal;
