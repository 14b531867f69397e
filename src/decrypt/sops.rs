//! Decryption through the `sops` binary

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::Decryptor;
use crate::error::{Error, Result};

/// Decryptor shelling out to `sops` with the ciphertext on stdin
#[derive(Debug, Clone)]
pub struct SopsDecryptor {
    binary: PathBuf,
}

impl SopsDecryptor {
    /// Locate `sops` on PATH
    pub fn discover() -> Result<Self> {
        let binary = which::which("sops")
            .map_err(|e| Error::config(format!("sops binary not found: {e}")))?;
        Ok(Self { binary })
    }

    /// Use an explicit binary path
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Decryptor for SopsDecryptor {
    async fn decrypt(&self, ciphertext: &[u8], format: &str) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.binary)
            .args([
                "--decrypt",
                "--input-type",
                format,
                "--output-type",
                format,
                "/dev/stdin",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::decrypt(format!("failed to spawn {}: {e}", self.binary.display()))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::decrypt("sops stdin unavailable"))?;

        // Feed stdin while collecting output so a large payload cannot
        // deadlock on a full pipe; dropping stdin is what delivers EOF.
        let feed = async move {
            let written = stdin.write_all(ciphertext).await;
            drop(stdin);
            written
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output
            .map_err(|e| Error::decrypt(format!("sops did not run to completion: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::decrypt(format!(
                "failed to decrypt: {}",
                stderr.trim()
            )));
        }
        fed.map_err(|e| Error::decrypt(format!("failed to feed ciphertext: {e}")))?;

        Ok(output.stdout)
    }
}
