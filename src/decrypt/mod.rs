//! Pluggable decrypt capability
//!
//! The reconciler only depends on the `Decryptor` trait; production wires in
//! `SopsDecryptor`, tests substitute a deterministic fake.

mod session;
mod sops;

pub use session::spawn_session_keepalive;
pub use sops::SopsDecryptor;

use async_trait::async_trait;

use crate::error::Result;

/// Ciphertext to plaintext capability
#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Decrypt `ciphertext`, reading and emitting the given format
    async fn decrypt(&self, ciphertext: &[u8], format: &str) -> Result<Vec<u8>>;
}
