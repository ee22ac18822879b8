//! Node identity key file.
//!
//! The file holds the raw 32-byte Ed25519 secret. It is created with mode
//! 0600 on first start.

use std::path::Path;

use anyhow::{bail, Context};
use mnstore_crypto::ed25519::{KeyPair, SECRET_KEY_LEN as SECRET_LEN};
use rand::RngCore;
use zeroize::Zeroizing;

/// Read the key at `path`, or create one there.
pub fn load_or_generate(path: &Path) -> anyhow::Result<KeyPair> {
    if path.exists() {
        let bytes = Zeroizing::new(
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?,
        );
        if bytes.len() != SECRET_LEN {
            bail!(
                "identity file {} has {} bytes, expected {SECRET_LEN}",
                path.display(),
                bytes.len()
            );
        }
        let mut secret = Zeroizing::new([0u8; SECRET_LEN]);
        secret.copy_from_slice(&bytes);
        return Ok(KeyPair::from_bytes(&secret));
    }

    let mut secret = Zeroizing::new([0u8; SECRET_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut secret[..]);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_private(path, &secret[..])
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), "generated new node identity");
    Ok(KeyPair::from_bytes(&secret))
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}
