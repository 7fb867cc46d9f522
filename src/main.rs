use p1bridge::config::HandlerConfig;
use p1bridge::handlers::LogHandler;
use p1bridge::{Config, Handler, HandlerRegistry, P1Decoder, P1Trigger, ShutdownSignal};
use std::sync::Arc;
use log::{error, info};


fn build_registry(config: &Config) -> HandlerRegistry {
    let mut handlers: Vec<Arc<dyn Handler>> = Vec::new();

    for handler in &config.handlers {
        match handler {
            HandlerConfig::Log { name } => {
                handlers.push(Arc::new(LogHandler::new(name)));
            }
            #[cfg(feature = "mqtt")]
            HandlerConfig::Mqtt { name, topic, retain, split } => {
                if let Some(mqtt) = &config.mqtt {
                    handlers.push(Arc::new(p1bridge::handlers::MqttHandler::new(name, mqtt, topic, *retain, *split)));
                }
            }
            #[cfg(not(feature = "mqtt"))]
            HandlerConfig::Mqtt { name, .. } => {
                error!("Handler {} needs the mqtt feature, skipping it", name);
            }
        }
    }

    info!("Registered handlers: {:?}", handlers.iter().map(|h| h.name()).collect::<Vec<_>>());
    return HandlerRegistry::new(handlers);
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Initialize logging
    let default_filter = std::env::var("P1_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let path = std::env::args().nth(1);
    let config = match Config::load(path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    let registry = build_registry(&config);
    let trigger = match P1Trigger::open(&config.trigger, registry) {
        Ok(t) => t,
        Err(e) => {
            error!("Unable to initialize trigger: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    let mut shutdown = match ShutdownSignal::new() {
        Ok(s) => s,
        Err(e) => {
            error!("Unable to register exit signals: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    let running = trigger.start(Arc::new(P1Decoder::new()));

    info!("Trigger started, now waiting for a signal to exit");
    if let Err(e) = shutdown.recv().await {
        error!("Unable to wait for the exit signal: {}", e);
    }

    info!("Stopping, status was {:?}", running.status());
    let summary = running.close().await;
    info!("Dispatched {} telegrams", summary.telegrams);
    for stats in summary.handlers {
        info!("Handler {}: {} ok, {} failed", stats.name, stats.successes, stats.failures);
    }

    std::process::ExitCode::SUCCESS
}
