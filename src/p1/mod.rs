use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, Receiver, Sender};
use crate::models::Telegram;

pub mod parser;
pub mod utils;

use parser::{parse_telegram, TelegramFramer};

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Unable to open P1 device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Missing identification line")]
    MissingHeader,
    #[error("Invalid telegram format: {0}")]
    InvalidFormat(String),
    #[error("Checksum mismatch, expected {expected:04X} calculated {calculated:04X}")]
    ChecksumMismatch { expected: u16, calculated: u16 },
    #[error("Telegram misses the {0} reading")]
    MissingField(&'static str),
    #[error("Invalid value for object {0}")]
    InvalidValue(String),
}

/// Source of decoded telegrams
///
/// Opening a device hands out the receiving end of the channel the decoder
/// pushes telegrams into. The decoder runs on its own task, the channel
/// closes when it stops. Opening may wait on the device, so it is async
/// and must not block the calling task.
pub trait TelegramDecoder: Send + Sync {
    fn open<'a>(&'a self, device: &'a str) -> BoxFuture<'a, Result<Receiver<Telegram>, DecoderError>>;
}

/// Decoder for DSMR P1 ports
///
/// The device is read as a plain file, so the serial line has to be set up
/// for the meter (e.g. 115200 8N1 for DSMR 4) before the bridge starts.
/// Opening and reading run on tokio's blocking pool, a tty that waits for
/// carrier does not stall the dispatch task.
#[derive(Debug, Clone)]
pub struct P1Decoder {
    channel_size: usize,
}

impl Default for P1Decoder {
    fn default() -> Self {
        return P1Decoder { channel_size: 1 };
    }
}

impl P1Decoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TelegramDecoder for P1Decoder {
    fn open<'a>(&'a self, device: &'a str) -> BoxFuture<'a, Result<Receiver<Telegram>, DecoderError>> {
        async move {
            let file = tokio::fs::File::open(device).await.map_err(|e| DecoderError::Open {
                device: device.to_string(),
                source: e,
            })?;
            info!("Opened P1 device {}", device);

            let (sender, receiver) = mpsc::channel(self.channel_size);
            let reader = BufReader::new(file);
            let device = device.to_string();
            tokio::spawn(async move {
                read_telegrams(reader, &device, sender).await;
            });

            return Ok(receiver);
        }.boxed()
    }
}

/// Reads the P1 stream until it ends or nobody listens anymore
pub async fn read_telegrams<R: AsyncBufRead + Unpin>(mut reader: R, device: &str, sender: Sender<Telegram>) {
    let mut framer = TelegramFramer::new();
    let mut buf: Vec<u8> = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                warn!("P1 device {} reached end of stream", device);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Reading P1 device {} failed: {}", device, e);
                return;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let Some(frame) = framer.push_line(&line) else {
            continue;
        };

        match parse_telegram(&frame) {
            Ok(telegram) => {
                debug!("Decoded P1 telegram from {}", telegram.header);
                if sender.send(telegram).await.is_err() {
                    debug!("Telegram receiver for {} is gone, stop reading", device);
                    return;
                }
            }
            Err(e) => {
                warn!("Dropping P1 telegram from {}: {}", device, e);
            }
        }
    }
}
