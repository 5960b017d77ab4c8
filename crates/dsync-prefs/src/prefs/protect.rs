//! At-rest protection for sensitive preference values.
//!
//! - **Encryption**: AES-256-GCM with a random 96-bit nonce per value
//! - **Envelope**: base64( `DSYNC1` ‖ nonce ‖ ciphertext+tag )
//! - **Key**: either 32 random bytes kept in a key file beside the
//!   preferences, or PBKDF2-HMAC-SHA256 over a passphrase and a persisted salt

use crate::prefs::types::*;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::info;
use rand::RngCore;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use zeroize::Zeroize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Envelope header; bumps when the layout changes.
const MAGIC: &[u8; 6] = b"DSYNC1";
/// AES-256-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;
/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// Salt length for passphrase-derived keys.
const SALT_LEN: usize = 32;
/// Default PBKDF2 iteration count for passphrase-derived keys.
pub const PBKDF2_ITERATIONS: u32 = 600_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Protector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Symmetric transform applied to values the caller marks as sensitive.
pub struct Protector {
    key: [u8; KEY_LEN],
}

impl Protector {
    /// Build from raw key bytes.
    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Load the random key stored at `path`, generating it on first use.
    ///
    /// An existing file of the wrong length is an error rather than being
    /// replaced, since replacing it would orphan everything it encrypted.
    pub fn load_or_create_key_file(path: &Path) -> PrefsResult<Self> {
        let key = load_or_create_secret(path)?;
        Ok(Self { key })
    }

    /// Derive the key from a passphrase and the salt stored at `salt_path`.
    pub fn from_passphrase(passphrase: &str, salt_path: &Path, iterations: u32) -> PrefsResult<Self> {
        if passphrase.is_empty() {
            return Err(PrefsError::key_material("Passphrase must not be empty"));
        }
        let salt = load_or_create_secret(salt_path)?;
        Ok(Self {
            key: derive_key(passphrase, &salt, iterations),
        })
    }

    /// Encrypt `plaintext` into a printable envelope.
    pub fn protect(&self, plaintext: &str) -> PrefsResult<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| PrefsError::encryption(format!("AES init: {}", e)))?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| PrefsError::encryption(format!("AES encrypt: {}", e)))?;

        let mut out = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    /// Decrypt an envelope produced by [`Protector::protect`].
    pub fn unprotect(&self, envelope: &str) -> PrefsResult<String> {
        let data = STANDARD
            .decode(envelope.trim())
            .map_err(|e| PrefsError::decryption(format!("Envelope is not base64: {}", e)))?;
        if data.len() < MAGIC.len() + NONCE_LEN || &data[..MAGIC.len()] != MAGIC {
            return Err(PrefsError::decryption("Envelope header missing or invalid"));
        }
        let nonce_bytes = &data[MAGIC.len()..MAGIC.len() + NONCE_LEN];
        let ciphertext = &data[MAGIC.len() + NONCE_LEN..];

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| PrefsError::decryption(format!("AES init: {}", e)))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| PrefsError::decryption("Decryption failed – wrong key or corrupted data"))?;
        String::from_utf8(plaintext)
            .map_err(|e| PrefsError::decryption(format!("Decrypted value is not UTF-8: {}", e)))
    }

    /// Whether `value` looks like an envelope produced by this module.
    pub fn is_envelope(value: &str) -> bool {
        STANDARD
            .decode(value.trim())
            .map(|d| d.len() >= MAGIC.len() + NONCE_LEN && &d[..MAGIC.len()] == MAGIC)
            .unwrap_or(false)
    }
}

impl Drop for Protector {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for Protector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protector").field("key", &"<redacted>").finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Key material helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Derive an AES-256 key from a passphrase using PBKDF2-HMAC-SHA256.
pub fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(passphrase.as_bytes(), salt, iterations, &mut key);
    key
}

fn load_or_create_secret(path: &Path) -> PrefsResult<[u8; SALT_LEN]> {
    if path.exists() {
        let mut bytes = fs::read(path)
            .map_err(|e| PrefsError::key_material(format!("Failed to read {}: {}", path.display(), e)))?;
        if bytes.len() != SALT_LEN {
            bytes.zeroize();
            return Err(PrefsError::key_material(format!(
                "Key material at {} has unexpected length",
                path.display()
            )));
        }
        let mut out = [0u8; SALT_LEN];
        out.copy_from_slice(&bytes);
        bytes.zeroize();
        return Ok(out);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PrefsError::key_material(format!("Failed to create {}: {}", parent.display(), e)))?;
    }

    let mut secret = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    write_private_file(path, &secret)
        .map_err(|e| PrefsError::key_material(format!("Failed to write {}: {}", path.display(), e)))?;
    info!("Generated new key material at {}", path.display());
    Ok(secret)
}

fn write_private_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
