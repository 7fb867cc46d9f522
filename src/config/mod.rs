use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::fs;
use std::time::Duration;
use thiserror::Error;

const CONFIG_PATHS: [&str; 2] = ["config/p1.yaml", "p1.yaml"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no settings found for trigger '{0}'")]
    NoSettings(String),
    #[error("no serial port found for trigger '{0}' in settings")]
    NoSerialPort(String),
    #[error("Unable to read the config on {0}")]
    NotFound(String),
    #[error("Unable to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to parse config file: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("handler '{0}' needs the mqtt section to be configured")]
    MissingMqtt(String),
}

fn telegram_timeout_default() -> u64 { return 30 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct TriggerSettings {
    pub serial_port: Option<String>,
    /// Seconds without a telegram before the trigger warns about it
    #[serde(default="telegram_timeout_default")]
    pub telegram_timeout: u64,
    /// Seconds a handler may take, unlimited if not set
    pub handler_timeout: Option<u64>,
}

fn trigger_id_default() -> String { return "p1".to_string() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct TriggerConfig {
    #[serde(default="trigger_id_default")]
    pub id: String,
    pub settings: Option<TriggerSettings>,
}

/// Trigger configuration which passed validation
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedConfig {
    pub id: String,
    pub serial_port: String,
    pub telegram_timeout: Duration,
    pub handler_timeout: Option<Duration>,
}

impl TriggerConfig {
    pub fn new(id: &str, serial_port: &str) -> Self {
        return TriggerConfig {
            id: id.to_string(),
            settings: Some(TriggerSettings {
                serial_port: Some(serial_port.to_string()),
                telegram_timeout: telegram_timeout_default(),
                handler_timeout: None,
            }),
        };
    }

    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let settings = self.settings.as_ref()
            .ok_or_else(|| ConfigError::NoSettings(self.id.clone()))?;

        let serial_port = match &settings.serial_port {
            Some(p) if !p.trim().is_empty() => p.trim().to_string(),
            _ => return Err(ConfigError::NoSerialPort(self.id.clone())),
        };

        return Ok(ValidatedConfig {
            id: self.id.clone(),
            serial_port,
            telegram_timeout: Duration::from_secs(settings.telegram_timeout.max(1)),
            handler_timeout: settings.handler_timeout.map(Duration::from_secs),
        });
    }
}

fn mqtt_client_name_default() -> String { return "p1bridge".to_string() }
fn mqtt_port_default() -> u16 { return 1883 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HandlerConfig {
    Log {
        name: String,
    },
    Mqtt {
        name: String,
        topic: String,
        #[serde(default)]
        retain: bool,
        /// Also publish every raw value to `<topic>/<key>`
        #[serde(default)]
        split: bool,
    },
}

impl HandlerConfig {
    pub fn name(&self) -> &str {
        match self {
            HandlerConfig::Log { name } => name,
            HandlerConfig::Mqtt { name, .. } => name,
        }
    }
}

fn handlers_default() -> Vec<HandlerConfig> {
    return vec![HandlerConfig::Log { name: "log".to_string() }];
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    pub trigger: TriggerConfig,
    pub mqtt: Option<MqttConfig>,
    #[serde(default="handlers_default")]
    pub handlers: Vec<HandlerConfig>,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let c: Config = serde_yml::from_str(contents)?;

        for handler in &c.handlers {
            if matches!(handler, HandlerConfig::Mqtt { .. }) && c.mqtt.is_none() {
                return Err(ConfigError::MissingMqtt(handler.name().to_string()));
            }
        }

        return Ok(c);
    }

    /// Loads the given file or the first of `config/p1.yaml` and `p1.yaml`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_string(),
            None => CONFIG_PATHS.iter()
                .find(|p| std::path::Path::new(p).exists())
                .map(|p| p.to_string())
                .ok_or_else(|| ConfigError::NotFound(CONFIG_PATHS.join(" or ")))?,
        };

        debug!("Reading config from {}", path);
        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            source: e,
        })?;

        let c = Self::from_yaml(&contents)?;
        info!("Config loaded from {}", path);
        return Ok(c);
    }
}
