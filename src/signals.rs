/// Signal handling for the watchdog loop.
///
/// SIGINT (Ctrl-C) and SIGTERM both request a stop. The loop only observes the
/// request between cycles, so a remediation in flight always completes.
use tokio::signal::unix::{signal, Signal, SignalKind};

pub struct SignalHandler {
    sigterm: Signal,
    sigint: Signal,
}

impl SignalHandler {
    /// Register handlers. Must run inside a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Resolves once SIGINT or SIGTERM arrives, with the signal's name.
    pub async fn recv(&mut self) -> &'static str {
        let name = tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        };
        tracing::debug!(signal = name, "shutdown signal received");
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{raise, Signal as NixSignal};
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_resolves_recv() {
        let mut handler = SignalHandler::install().unwrap();
        raise(NixSignal::SIGTERM).unwrap();
        let name = tokio::time::timeout(Duration::from_secs(5), handler.recv())
            .await
            .unwrap();
        assert_eq!(name, "SIGTERM");
    }
}
