use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use chrono::Utc;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use crate::config::{ConfigError, TriggerConfig, ValidatedConfig};
use crate::encoder::TelegramEncoder;
use crate::handlers::{DeliveryContext, HandlerError, HandlerPayload, HandlerRegistry};
use crate::models::Telegram;
use crate::p1::TelegramDecoder;

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerStatus {
    Starting,
    Running { device: String },
    /// The device could not be opened, no telegram will ever arrive
    DecoderFailed(String),
    /// The decoder stopped delivering telegrams
    DecoderClosed,
    Stopped,
}

#[derive(Debug)]
pub struct HandlerOutcome {
    pub index: usize,
    pub handler: String,
    pub result: Result<serde_json::Value, HandlerError>,
}

/// Outcome of every handler for one telegram, in registry order
#[derive(Debug)]
pub struct DispatchReport {
    pub sequence: u64,
    pub outcomes: Vec<HandlerOutcome>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerStats {
    pub name: String,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub telegrams: u64,
    pub handlers: Vec<HandlerStats>,
}

enum Next {
    Telegram(Telegram),
    StopChanged { sender_gone: bool },
    DecoderClosed,
    Silence,
}

/// Receives telegrams and hands them to all registered handlers
///
/// Telegrams are processed one at a time in arrival order. For each telegram
/// every handler is called in registry order and awaited before the next one
/// runs, so a slow handler holds back all following telegrams. A failing
/// handler is logged and skipped, it never stops the loop.
pub struct P1Trigger {
    config: ValidatedConfig,
    registry: HandlerRegistry,
    encoder: TelegramEncoder,
    log_target: String,
    sequence: u64,
    summary: RunSummary,
}

impl P1Trigger {
    /// Validates the configuration and captures the handlers
    pub fn open(config: &TriggerConfig, registry: HandlerRegistry) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        let log_target = format!("p1bridge::trigger::{}", config.id);
        let encoder = TelegramEncoder::new(format!("p1bridge::encoder::{}", config.id));
        let summary = RunSummary {
            telegrams: 0,
            handlers: registry.names().into_iter()
                .map(|name| HandlerStats { name, ..Default::default() })
                .collect(),
        };

        info!(target: log_target.as_str(), "Trigger {} opened for {} with {} handlers", config.id, config.serial_port, registry.len());

        return Ok(P1Trigger {
            config,
            registry,
            encoder,
            log_target,
            sequence: 0,
            summary,
        });
    }

    /// Routes all events of this trigger and its encoder to `target`
    pub fn with_log_target(mut self, target: &str) -> Self {
        self.log_target = target.to_string();
        self.encoder = self.encoder.with_log_target(target);
        return self;
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Replaces the encoder, e.g. for pretty printed messages while debugging
    pub fn with_encoder(mut self, encoder: TelegramEncoder) -> Self {
        self.encoder = encoder.with_log_target(&self.log_target);
        return self;
    }

    /// Encodes one telegram and delivers it to every handler
    pub async fn dispatch(&mut self, telegram: &Telegram) -> DispatchReport {
        self.sequence += 1;
        self.summary.telegrams += 1;
        let sequence = self.sequence;

        let encoded = self.encoder.encode(telegram);
        let payload = HandlerPayload {
            msg: encoded.msg,
            kwh: encoded.kwh,
            kwh_low: encoded.kwh_low,
            w: encoded.w,
            gas_used: encoded.gas_used,
        };

        let received_at = Utc::now();
        let mut outcomes = Vec::with_capacity(self.registry.len());
        for (index, handler) in self.registry.iter().enumerate() {
            let ctx = DeliveryContext { sequence, handler_index: index, received_at };
            let call = AssertUnwindSafe(async { handler.handle(ctx, &payload).await }).catch_unwind();

            let result = match self.config.handler_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(r) => r,
                    Err(_) => Ok(Err(HandlerError::Timeout(limit))),
                },
                None => call.await,
            };
            let result = result.unwrap_or_else(|_| Err(HandlerError::Failed("handler panicked".to_string())));

            let stats = &mut self.summary.handlers[index];
            match &result {
                Ok(value) => {
                    stats.successes += 1;
                    debug!(target: self.log_target.as_str(), "Ran Handler: [{}]", handler.name());
                    debug!(target: self.log_target.as_str(), "Results: [{}]", value);
                }
                Err(e) => {
                    stats.failures += 1;
                    error!(target: self.log_target.as_str(), "Handler [{}] failed for telegram {}: {}", handler.name(), sequence, e);
                }
            }

            outcomes.push(HandlerOutcome {
                index,
                handler: handler.name().to_string(),
                result,
            });
        }

        return DispatchReport { sequence, outcomes };
    }

    /// Runs the dispatch loop until `shutdown` turns true or its sender is dropped
    ///
    /// A telegram already taken from the decoder is always dispatched to all
    /// handlers before the stop signal is looked at again.
    pub async fn run(mut self, decoder: &dyn TelegramDecoder, mut shutdown: watch::Receiver<bool>, status: watch::Sender<TriggerStatus>) -> RunSummary {
        let device = self.config.serial_port.clone();
        let mut receiver = match decoder.open(&device).await {
            Ok(r) => {
                info!(target: self.log_target.as_str(), "Trigger {} reading telegrams from {}", self.config.id, device);
                status.send_replace(TriggerStatus::Running { device: device.clone() });
                Some(r)
            }
            Err(e) => {
                error!(target: self.log_target.as_str(), "Failed to create meter on {}, no telegrams will be received: {}", device, e);
                status.send_replace(TriggerStatus::DecoderFailed(e.to_string()));
                None
            }
        };

        while !*shutdown.borrow() {
            let next = match receiver.as_mut() {
                Some(rx) => tokio::select! {
                    biased;
                    changed = shutdown.changed() => Next::StopChanged { sender_gone: changed.is_err() },
                    received = tokio::time::timeout(self.config.telegram_timeout, rx.recv()) => match received {
                        Ok(Some(telegram)) => Next::Telegram(telegram),
                        Ok(None) => Next::DecoderClosed,
                        Err(_) => Next::Silence,
                    },
                },
                None => Next::StopChanged { sender_gone: shutdown.changed().await.is_err() },
            };

            match next {
                Next::Telegram(telegram) => {
                    let report = self.dispatch(&telegram).await;
                    debug!(target: self.log_target.as_str(), "Telegram {} dispatched, {} ok, {} failed", report.sequence, report.succeeded(), report.failed());
                }
                Next::StopChanged { sender_gone } => {
                    if sender_gone {
                        debug!(target: self.log_target.as_str(), "Stop signal dropped, exiting");
                        break;
                    }
                }
                Next::DecoderClosed => {
                    warn!(target: self.log_target.as_str(), "Decoder for {} stopped delivering telegrams", device);
                    status.send_replace(TriggerStatus::DecoderClosed);
                    receiver = None;
                }
                Next::Silence => {
                    warn!(target: self.log_target.as_str(), "No telegram received from {} within {:?}", device, self.config.telegram_timeout);
                }
            }
        }

        info!(target: self.log_target.as_str(), "Trigger {} stopped after {} telegrams", self.config.id, self.summary.telegrams);
        status.send_replace(TriggerStatus::Stopped);
        return self.summary;
    }

    /// Spawns the dispatch loop on its own task
    pub fn start(self, decoder: Arc<dyn TelegramDecoder>) -> RunningTrigger {
        let (stop, shutdown) = watch::channel(false);
        let (status_tx, status) = watch::channel(TriggerStatus::Starting);
        let log_target = self.log_target.clone();

        let worker = tokio::spawn(async move {
            self.run(decoder.as_ref(), shutdown, status_tx).await
        });

        return RunningTrigger { stop, status, worker, log_target };
    }
}

/// Handle of a started trigger
pub struct RunningTrigger {
    stop: watch::Sender<bool>,
    status: watch::Receiver<TriggerStatus>,
    worker: JoinHandle<RunSummary>,
    log_target: String,
}

impl RunningTrigger {
    pub fn status(&self) -> TriggerStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<TriggerStatus> {
        self.status.clone()
    }

    /// Signals the loop to stop and waits for the telegram in flight
    pub async fn close(self) -> RunSummary {
        self.stop.send_replace(true);
        match self.worker.await {
            Ok(summary) => summary,
            Err(e) => {
                error!(target: self.log_target.as_str(), "Trigger worker ended abnormally: {}", e);
                RunSummary::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::Handler;
    use crate::p1::DecoderError;
    use crate::test_utils;
    use futures_util::future::{self, BoxFuture};
    use log::Level;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, Receiver};

    struct ChannelDecoder {
        receiver: Mutex<Option<Receiver<Telegram>>>,
    }

    impl ChannelDecoder {
        fn new(receiver: Receiver<Telegram>) -> Arc<Self> {
            Arc::new(ChannelDecoder { receiver: Mutex::new(Some(receiver)) })
        }
    }

    impl TelegramDecoder for ChannelDecoder {
        fn open<'a>(&'a self, device: &'a str) -> BoxFuture<'a, Result<Receiver<Telegram>, DecoderError>> {
            let result = self.receiver.lock().unwrap().take().ok_or_else(|| DecoderError::Open {
                device: device.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
            });
            future::ready(result).boxed()
        }
    }

    struct FailingDecoder;

    impl TelegramDecoder for FailingDecoder {
        fn open<'a>(&'a self, device: &'a str) -> BoxFuture<'a, Result<Receiver<Telegram>, DecoderError>> {
            future::ready(Err(DecoderError::Open {
                device: device.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied"),
            })).boxed()
        }
    }

    type Calls = Arc<Mutex<Vec<(String, u64, HandlerPayload)>>>;

    enum Behaviour {
        Ok,
        Fail,
        Panic,
        Hang,
        Slow(Duration),
    }

    struct TestHandler {
        name: String,
        behaviour: Behaviour,
        calls: Calls,
    }

    impl Handler for TestHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle<'a>(&'a self, ctx: DeliveryContext, payload: &'a HandlerPayload)
            -> BoxFuture<'a, Result<serde_json::Value, HandlerError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push((self.name.clone(), ctx.sequence, payload.clone()));
                match self.behaviour {
                    Behaviour::Ok => Ok(serde_json::Value::from(ctx.sequence)),
                    Behaviour::Fail => Err(HandlerError::Failed(format!("{} refuses", self.name))),
                    Behaviour::Panic => panic!("handler blew up"),
                    Behaviour::Hang => future::pending().await,
                    Behaviour::Slow(d) => {
                        tokio::time::sleep(d).await;
                        Ok(serde_json::Value::Null)
                    }
                }
            })
        }
    }

    fn registry(behaviours: Vec<Behaviour>, calls: &Calls) -> HandlerRegistry {
        behaviours.into_iter().enumerate()
            .map(|(i, behaviour)| Arc::new(TestHandler {
                name: format!("h{}", i + 1),
                behaviour,
                calls: calls.clone(),
            }) as Arc<dyn Handler>)
            .collect()
    }

    fn telegram(n: u64) -> Telegram {
        Telegram::new(n as f64, 1000.0 + n as f64, 500.0, 42.0)
    }

    fn trigger(registry: HandlerRegistry, target: &str) -> P1Trigger {
        P1Trigger::open(&TriggerConfig::new("test", "/dev/ttyUSB0"), registry)
            .unwrap()
            .with_log_target(target)
    }

    #[tokio::test]
    async fn test_dispatch_isolates_failing_handler() {
        test_utils::init_capture();
        let calls: Calls = Default::default();
        let mut t = trigger(registry(vec![Behaviour::Ok, Behaviour::Fail, Behaviour::Ok], &calls), "test::isolate");

        let report = t.dispatch(&telegram(1)).await;
        assert_eq!(report.sequence, 1);
        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes[0].result.is_ok());
        assert!(report.outcomes[1].result.is_err());
        assert!(report.outcomes[2].result.is_ok());
        assert_eq!(report.outcomes[2].handler, "h3");

        let names: Vec<String> = calls.lock().unwrap().iter().map(|c| c.0.clone()).collect();
        assert_eq!(names, vec!["h1", "h2", "h3"]);

        let errors: Vec<String> = test_utils::events_for("test::isolate").into_iter()
            .filter(|(level, _)| *level == Level::Error)
            .map(|(_, msg)| msg)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("[h2]"));
    }

    #[tokio::test]
    async fn test_dispatch_payload_matches_encoding() {
        let calls: Calls = Default::default();
        let mut t = trigger(registry(vec![Behaviour::Ok], &calls), "test::payload");
        let telegram = Telegram::new(0.5012, 1234.5678, 987.6543, 45.321);
        let report = t.dispatch(&telegram).await;
        assert_eq!(report.succeeded(), 1);

        let expected = TelegramEncoder::new("test::payload".to_string()).encode(&telegram);
        let calls = calls.lock().unwrap();
        let payload = &calls[0].2;
        assert_eq!(payload.w, 0.5012);
        assert_eq!(payload.kwh, 1234.5678);
        assert_eq!(payload.kwh_low, 987.6543);
        assert_eq!(payload.gas_used, 45.321);
        assert!(!payload.msg.is_empty());
        assert_eq!(payload.msg, expected.msg);
    }

    #[tokio::test]
    async fn test_pretty_encoder_survives_log_target_change() {
        let calls: Calls = Default::default();
        let mut t = P1Trigger::open(&TriggerConfig::new("test", "/dev/ttyUSB0"), registry(vec![Behaviour::Ok], &calls))
            .unwrap()
            .with_encoder(TelegramEncoder::new("unused".to_string()).with_pretty_print(true))
            .with_log_target("test::pretty");

        t.dispatch(&telegram(1)).await;
        let msg = calls.lock().unwrap()[0].2.msg.clone();
        assert!(msg.starts_with("[\n"));
    }

    #[tokio::test]
    async fn test_run_delivers_every_telegram_in_order() {
        let calls: Calls = Default::default();
        let t = trigger(registry(vec![Behaviour::Ok, Behaviour::Fail, Behaviour::Ok], &calls), "test::order");

        let (tx, rx) = mpsc::channel(1);
        let running = t.start(ChannelDecoder::new(rx));
        tokio::spawn(async move {
            for n in 1..=10 {
                tx.send(telegram(n)).await.unwrap();
            }
        });

        let mut status = running.status_receiver();
        status.wait_for(|s| *s == TriggerStatus::DecoderClosed).await.unwrap();
        let summary = running.close().await;

        assert_eq!(summary.telegrams, 10);
        assert_eq!(summary.handlers[0], HandlerStats { name: "h1".to_string(), successes: 10, failures: 0 });
        assert_eq!(summary.handlers[1], HandlerStats { name: "h2".to_string(), successes: 0, failures: 10 });
        assert_eq!(summary.handlers[2], HandlerStats { name: "h3".to_string(), successes: 10, failures: 0 });

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 30);
        for (i, (name, sequence, payload)) in calls.iter().enumerate() {
            assert_eq!(*name, format!("h{}", i % 3 + 1));
            assert_eq!(*sequence, (i / 3 + 1) as u64);
            assert_eq!(payload.w, *sequence as f64);
            assert_eq!(payload.kwh, 1000.0 + *sequence as f64);
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_loop() {
        let calls: Calls = Default::default();
        let t = trigger(registry(vec![Behaviour::Panic, Behaviour::Ok], &calls), "test::panic");

        let (tx, rx) = mpsc::channel(1);
        let running = t.start(ChannelDecoder::new(rx));
        tx.send(telegram(1)).await.unwrap();
        tx.send(telegram(2)).await.unwrap();
        drop(tx);

        let mut status = running.status_receiver();
        status.wait_for(|s| *s == TriggerStatus::DecoderClosed).await.unwrap();
        let summary = running.close().await;
        assert_eq!(summary.handlers[0].failures, 2);
        assert_eq!(summary.handlers[1].successes, 2);
    }

    #[test]
    fn test_open_without_serial_port_fails() {
        let config = TriggerConfig { id: "broken".to_string(), settings: None };
        let result = P1Trigger::open(&config, HandlerRegistry::default());
        assert!(matches!(result, Err(ConfigError::NoSettings(_))));
    }

    #[tokio::test]
    async fn test_decoder_open_failure_keeps_trigger_alive() {
        test_utils::init_capture();
        let calls: Calls = Default::default();
        let t = trigger(registry(vec![Behaviour::Ok], &calls), "test::open_failure");

        let running = t.start(Arc::new(FailingDecoder));
        let mut status = running.status_receiver();
        status.wait_for(|s| matches!(s, TriggerStatus::DecoderFailed(_))).await.unwrap();
        assert!(matches!(running.status(), TriggerStatus::DecoderFailed(ref e) if e.contains("permission denied")));

        let summary = running.close().await;
        assert_eq!(summary.telegrams, 0);
        assert!(calls.lock().unwrap().is_empty());
        assert!(test_utils::events_for("test::open_failure").iter()
            .any(|(level, msg)| *level == Level::Error && msg.contains("/dev/ttyUSB0")));
    }

    #[tokio::test]
    async fn test_close_finishes_telegram_in_flight() {
        let calls: Calls = Default::default();
        let t = trigger(registry(vec![Behaviour::Slow(Duration::from_millis(200)), Behaviour::Ok], &calls), "test::in_flight");

        let (tx, rx) = mpsc::channel(1);
        let running = t.start(ChannelDecoder::new(rx));
        tx.send(telegram(1)).await.unwrap();

        // wait until the slow handler was entered
        while calls.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let summary = running.close().await;

        assert_eq!(summary.telegrams, 1);
        assert_eq!(summary.handlers[0].successes, 1);
        assert_eq!(summary.handlers[1].successes, 1);
        assert!(tx.send(telegram(2)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout() {
        let calls: Calls = Default::default();
        let mut config = TriggerConfig::new("test", "/dev/ttyUSB0");
        config.settings.as_mut().unwrap().handler_timeout = Some(2);
        let mut t = P1Trigger::open(&config, registry(vec![Behaviour::Hang, Behaviour::Ok], &calls)).unwrap();

        let report = t.dispatch(&telegram(1)).await;
        assert!(matches!(report.outcomes[0].result, Err(HandlerError::Timeout(d)) if d == Duration::from_secs(2)));
        assert!(report.outcomes[1].result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_is_reported() {
        test_utils::init_capture();
        let calls: Calls = Default::default();
        let t = trigger(registry(vec![Behaviour::Ok], &calls), "test::silence");

        let (_tx, rx) = mpsc::channel::<Telegram>(1);
        let running = t.start(ChannelDecoder::new(rx));
        tokio::time::sleep(Duration::from_secs(65)).await;
        running.close().await;

        let warnings = test_utils::events_for("test::silence").into_iter()
            .filter(|(level, msg)| *level == Level::Warn && msg.starts_with("No telegram received"))
            .count();
        assert_eq!(warnings, 2);
    }
}
