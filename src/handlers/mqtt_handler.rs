use futures_util::future::{BoxFuture, FutureExt};
use log::{debug, error, info};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use crate::config::MqttConfig;
use super::{DeliveryContext, Handler, HandlerError, HandlerPayload};

/// Publishes the SenML message of every telegram to a broker topic
pub struct MqttHandler {
    name: String,
    topic: String,
    retain: bool,
    split: bool,
    client: AsyncClient,
}

impl MqttHandler {
    /// Connects to the broker, the event loop runs on its own task
    pub fn new(name: &str, config: &MqttConfig, topic: &str, retain: bool, split: bool) -> Self {
        info!("MQTT connection for handler {} starting up", name);
        let mut mqttoptions = MqttOptions::new(format!("{}-{}", config.client_name, name), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if !config.user.is_empty() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        let handler_name = name.to_string();
        tokio::spawn(async move {
            info!("MQTT Eventloop for {} started", handler_name);
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT handler {} connected", handler_name);
                    },
                    Ok(_) => {},
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        return MqttHandler {
            name: name.to_string(),
            topic: topic.to_string(),
            retain,
            split,
            client,
        };
    }

    async fn publish(&self, payload: &HandlerPayload) -> Result<serde_json::Value, HandlerError> {
        self.client.publish(self.topic.clone(), QoS::AtLeastOnce, self.retain, payload.msg.clone()).await?;

        if self.split {
            for (key, value) in payload.to_map() {
                if key == "msg" {
                    continue;
                }
                self.client.publish(format!("{}/{}", self.topic, key), QoS::AtLeastOnce, self.retain, value.to_string()).await?;
            }
        }

        debug!("Published telegram to {}", self.topic);
        return Ok(serde_json::Value::String(self.topic.clone()));
    }
}

impl Handler for MqttHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle<'a>(&'a self, _ctx: DeliveryContext, payload: &'a HandlerPayload)
        -> BoxFuture<'a, Result<serde_json::Value, HandlerError>> {
        self.publish(payload).boxed()
    }
}
