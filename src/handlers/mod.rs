use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

pub mod log_handler;
#[cfg(feature = "mqtt")]
pub mod mqtt_handler;

pub use log_handler::LogHandler;
#[cfg(feature = "mqtt")]
pub use mqtt_handler::MqttHandler;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),
    #[error("Handler did not return within {0:?}")]
    Timeout(Duration),
    #[cfg(feature = "mqtt")]
    #[error("MQTT publish failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

/// Data handed to every handler for one telegram
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerPayload {
    /// Normalized SenML message
    pub msg: String,
    #[serde(rename = "KWh")]
    pub kwh: f64,
    #[serde(rename = "KWhLow")]
    pub kwh_low: f64,
    #[serde(rename = "W")]
    pub w: f64,
    #[serde(rename = "GasUsed")]
    pub gas_used: f64,
}

impl HandlerPayload {
    /// The payload as key value map, keyed like the serialized form
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("msg".to_string(), self.msg.clone().into());
        map.insert("KWh".to_string(), self.kwh.into());
        map.insert("KWhLow".to_string(), self.kwh_low.into());
        map.insert("W".to_string(), self.w.into());
        map.insert("GasUsed".to_string(), self.gas_used.into());
        return map;
    }
}

/// Per delivery information, a fresh one is created for every handler call
///
/// Deliveries can not be cancelled, a handler always runs to completion.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    /// Position of the telegram in the stream, starting at 1
    pub sequence: u64,
    pub handler_index: usize,
    pub received_at: DateTime<Utc>,
}

/// A consumer of normalized telegram data
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    fn handle<'a>(&'a self, ctx: DeliveryContext, payload: &'a HandlerPayload)
        -> BoxFuture<'a, Result<serde_json::Value, HandlerError>>;
}

/// Ordered, fixed set of handlers
///
/// The registry is built once before the trigger starts and never changes
/// afterwards, so it can be read without any locking.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Self {
        return HandlerRegistry { handlers };
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.handlers.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    /// Applies the payload to the handler at `index`
    pub async fn apply(&self, index: usize, ctx: DeliveryContext, payload: &HandlerPayload) -> Option<Result<serde_json::Value, HandlerError>> {
        let handler = self.handlers.get(index)?;
        Some(handler.handle(ctx, payload).await)
    }
}

impl FromIterator<Arc<dyn Handler>> for HandlerRegistry {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Handler>>>(iter: I) -> Self {
        HandlerRegistry::new(iter.into_iter().collect())
    }
}
