//! Preference-store error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised preference-store error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefsError {
    pub kind: PrefsErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PrefsErrorKind {
    /// Empty or otherwise unusable key.
    InvalidKey,
    /// Reading or writing a file failed.
    IoError,
    /// The map could not be (de)serialised.
    SerializationError,
    /// Key material could not be created or loaded.
    KeyMaterial,
    /// Encrypting a protected value failed.
    Encryption,
    /// A protected value could not be decrypted (wrong key, tampering, bad envelope).
    Decryption,
}

pub type PrefsResult<T> = Result<T, PrefsError>;

impl PrefsError {
    pub fn new(kind: PrefsErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::new(PrefsErrorKind::InvalidKey, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(PrefsErrorKind::IoError, msg)
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::new(PrefsErrorKind::SerializationError, msg)
    }

    pub fn key_material(msg: impl Into<String>) -> Self {
        Self::new(PrefsErrorKind::KeyMaterial, msg)
    }

    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::new(PrefsErrorKind::Encryption, msg)
    }

    pub fn decryption(msg: impl Into<String>) -> Self {
        Self::new(PrefsErrorKind::Decryption, msg)
    }
}

impl fmt::Display for PrefsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for PrefsError {}

impl From<PrefsError> for String {
    fn from(e: PrefsError) -> String {
        e.message
    }
}

impl From<std::io::Error> for PrefsError {
    fn from(e: std::io::Error) -> Self {
        PrefsError::io(e.to_string())
    }
}

impl From<serde_json::Error> for PrefsError {
    fn from(e: serde_json::Error) -> Self {
        PrefsError::serialization(e.to_string())
    }
}
