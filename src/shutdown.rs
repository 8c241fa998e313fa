use anyhow::{Context, Result};
use consumer_core::CancellationSignal;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Cancels `cancel` on Ctrl+C, or SIGTERM on unix.
pub fn install(cancel: CancellationSignal) -> JoinHandle<()> {
    cancel_on(cancel, wait_for_interrupt())
}

/// Cancels `cancel` once `trigger` reports which signal arrived. If the
/// trigger fails the signal is left untouched and the default OS handling
/// stays in effect.
pub fn cancel_on<F>(cancel: CancellationSignal, trigger: F) -> JoinHandle<()>
where
    F: Future<Output = Result<&'static str>> + Send + 'static,
{
    tokio::spawn(async move {
        match trigger.await {
            Ok(signal) => {
                info!(signal, "shutdown requested");
                cancel.cancel();
            }
            Err(error) => {
                warn!(error = %error, "failed to listen for shutdown signals");
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_interrupt() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listen for ctrl-c")?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl-c")?;
    Ok("ctrl-c")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[tokio::test]
    async fn trigger_cancels_signal() {
        let cancel = CancellationSignal::new();
        cancel_on(cancel.clone(), async { Ok("SIGTERM") })
            .await
            .unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn failed_trigger_leaves_signal_unset() {
        let cancel = CancellationSignal::new();
        cancel_on(cancel.clone(), async { Err(anyhow!("no signal support")) })
            .await
            .unwrap();
        assert!(!cancel.is_cancelled());
    }
}
