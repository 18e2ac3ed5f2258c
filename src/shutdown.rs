use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels `token` on the first Ctrl-C or SIGTERM.
///
/// The listener also returns, without doing anything, if `token` is cancelled elsewhere.
pub fn spawn_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            res = wait_for_signal() => match res {
                Ok(()) => {
                    info!("Received shutdown signal, draining in-flight batches");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "couldn't listen for shutdown signals"),
            },
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn listener_leaves_token_alone_until_a_signal_arrives() {
        let token = CancellationToken::new();
        let handle = spawn_listener(token.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!token.is_cancelled());
        assert!(!handle.is_finished());

        token.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
