use futures_util::future::{self, BoxFuture, FutureExt};
use log::info;
use super::{DeliveryContext, Handler, HandlerError, HandlerPayload};

/// Writes every telegram to the log
pub struct LogHandler {
    name: String,
}

impl LogHandler {
    pub fn new(name: &str) -> Self {
        return LogHandler { name: name.to_string() };
    }
}

impl Handler for LogHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle<'a>(&'a self, ctx: DeliveryContext, payload: &'a HandlerPayload)
        -> BoxFuture<'a, Result<serde_json::Value, HandlerError>> {
        info!("[{}] telegram {}: {}", self.name, ctx.sequence, payload.msg);
        future::ready(Ok(serde_json::Value::Object(payload.to_map()))).boxed()
    }
}
