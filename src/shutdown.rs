//! Process exit signals
use log::info;
#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Waits for Ctrl-C, or SIGTERM on unix
pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignal {
    /// Registers the handlers right away, signals arriving before `recv` are not lost
    pub fn new() -> std::io::Result<Self> {
        return Ok(ShutdownSignal {
            #[cfg(unix)]
            terminate: signal(SignalKind::terminate())?,
        });
    }

    #[cfg(unix)]
    pub async fn recv(&mut self) -> std::io::Result<()> {
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r?;
                info!("Received Ctrl-C");
            }
            _ = self.terminate.recv() => {
                info!("Received SIGTERM");
            }
        }
        return Ok(());
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C");
        return Ok(());
    }
}
