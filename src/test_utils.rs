//! Log capturing for tests, events are kept per target
use lazy_static::lazy_static;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::Mutex;

pub struct CaptureLogger {
    events: Mutex<Vec<(String, Level, String)>>,
}

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut events) = self.events.lock() {
            events.push((record.target().to_string(), record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

lazy_static! {
    static ref LOGGER: CaptureLogger = CaptureLogger { events: Mutex::new(Vec::new()) };
}

pub fn init_capture() {
    if log::set_logger(&*LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
}

pub fn events_for(target: &str) -> Vec<(Level, String)> {
    LOGGER.events.lock().unwrap()
        .iter()
        .filter(|(t, _, _)| t == target)
        .map(|(_, level, msg)| (*level, msg.clone()))
        .collect()
}
