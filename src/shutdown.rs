//! Ctrl+C / SIGTERM / SIGHUP handling.
//!
//! The first signal cancels the run's token; the synchronizer then stops
//! dispatching and gives in-flight downloads their grace period. A second
//! signal exits immediately with status 130.

use tokio_util::sync::CancellationToken;

#[cfg(unix)]
struct Signals {
    term: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            hup: signal(SignalKind::hangup())?,
        })
    }

    async fn next(&mut self) -> &'static str {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = self.term.recv() => "SIGTERM",
            _ = self.hup.recv() => "SIGHUP",
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> &'static str {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        "Ctrl+C"
    }
}

/// Register the handlers and return the token the first signal cancels.
pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let mut signals = Signals::register()?;
    let token = CancellationToken::new();

    let handler_token = token.clone();
    tokio::spawn(async move {
        let name = signals.next().await;
        tracing::info!(signal = name, "Shutdown requested, letting in-flight downloads finish");
        tracing::info!("Press Ctrl+C again to force exit");
        handler_token.cancel();

        let name = signals.next().await;
        tracing::warn!(signal = name, "Force exit requested");
        std::process::exit(130);
    });

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_returns_live_token() {
        let token = install_signal_handler().unwrap();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn child_tokens_observe_parent_cancel() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
