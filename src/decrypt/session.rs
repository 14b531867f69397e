//! GPG session keep-alive
//!
//! When decryption runs against a passphrase-protected GPG key, the agent's
//! cached session expires (default-cache-ttl 600s) and temp artifacts pile up
//! under /tmp. This task refreshes the session and prunes stale temp files on
//! a timer, decoupled from the reconcile path, and stops promptly when the
//! shutdown token fires.

use std::time::Duration;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Environment variable carrying the GPG key passphrase
pub const PASSPHRASE_ENV: &str = "PASSPHRASE";

/// The agent caches sessions for 600s; refresh just under that
const REFRESH_PERIOD: Duration = Duration::from_secs(9 * 60);

/// Temp files older than 30 minutes are fair game
const TMP_CLEANUP: &str = r#"find /tmp -name "tmp.*" -type f -mmin +30 -exec rm {} \;"#;

/// Spawn the keep-alive task if a passphrase is configured
pub fn spawn_session_keepalive(shutdown: CancellationToken) -> Option<JoinHandle<()>> {
    let passphrase = std::env::var(PASSPHRASE_ENV).ok()?;

    Some(tokio::spawn(async move {
        let first = tokio::time::Instant::now() + REFRESH_PERIOD;
        let mut ticker = tokio::time::interval_at(first, REFRESH_PERIOD);
        info!("started GPG session keep-alive");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("GPG session keep-alive stopped");
                    return;
                }
                _ = ticker.tick() => {
                    run_shell(TMP_CLEANUP).await;
                    run_shell(&refresh_command(&passphrase)).await;
                    debug!("refreshed GPG session");
                }
            }
        }
    }))
}

fn refresh_command(passphrase: &str) -> String {
    format!(
        "echo {passphrase} | gpg --batch --always-trust --yes --passphrase-fd 0 --pinentry-mode=loopback -s $(mktemp)"
    )
}

async fn run_shell(command: &str) {
    match Command::new("sh").arg("-c").arg(command).output().await {
        Ok(output) if !output.status.success() => {
            warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "session keep-alive command failed"
            );
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "failed to run session keep-alive command"),
    }
}
