// Termination signal handling

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::thread;
use tokio_util::sync::CancellationToken;

/// Keeps the signal thread alive; dropping it stops listening.
pub struct SignalGuard {
    handle: Handle,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.handle.close();
    }
}

/// Cancel `token` on SIGINT, SIGTERM or SIGHUP.
pub fn register_signal_handlers(token: CancellationToken) -> std::io::Result<SignalGuard> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    let handle = signals.handle();

    thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                let name = match signal {
                    SIGINT => "SIGINT",
                    SIGTERM => "SIGTERM",
                    SIGHUP => "SIGHUP",
                    _ => continue,
                };
                log::info!("[Daemon] Received {}, shutting down", name);
                token.cancel();
            }
        })?;

    log::info!("[Daemon] Signal handlers registered (SIGINT, SIGTERM, SIGHUP)");
    Ok(SignalGuard { handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sighup_cancels_token() {
        let token = CancellationToken::new();
        let _guard = register_signal_handlers(token.clone()).unwrap();

        signal_hook::low_level::raise(SIGHUP).unwrap();
        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .unwrap();
    }
}
