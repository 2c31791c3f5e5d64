//! Pair passwords protected at rest
//!
//! Passwords are written to configuration files encrypted with
//! ChaCha20-Poly1305 under a key derived from the machine identity. A stored
//! value is therefore only readable on the machine that wrote it. Values
//! without the protection prefix are accepted as plaintext and protected on
//! the next save.

use crate::{ConfigError, ConfigResult};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Prefix marking a protected value
pub const PROTECTED_PREFIX: &str = "enc1:";

const NONCE_LEN: usize = 12;
const MACHINE_ID_FILES: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// A pair password, plaintext in memory and protected when serialized
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProtectedPassword(String);

impl ProtectedPassword {
    /// Wrap a plaintext password
    pub fn new<S: Into<String>>(password: S) -> Self {
        Self(password.into())
    }

    /// The plaintext password
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether no password is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Protect the password with this machine's key
    pub fn protect(&self) -> ConfigResult<String> {
        protect_with(&machine_key(), &self.0)
    }

    /// Read a stored value, plaintext or protected
    pub fn unprotect(stored: &str) -> ConfigResult<Self> {
        unprotect_with(&machine_key(), stored).map(Self)
    }
}

impl fmt::Debug for ProtectedPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("ProtectedPassword(<empty>)")
        } else {
            f.write_str("ProtectedPassword(<redacted>)")
        }
    }
}

impl Serialize for ProtectedPassword {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let stored = self.protect().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&stored)
    }
}

impl<'de> Deserialize<'de> for ProtectedPassword {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = String::deserialize(deserializer)?;
        Self::unprotect(&stored).map_err(serde::de::Error::custom)
    }
}

fn protect_with(key: &[u8; 32], plain: &str) -> ConfigResult<String> {
    if plain.is_empty() {
        return Ok(String::new());
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
        .map_err(|_| ConfigError::password("failed to protect password"))?;

    let mut blob = nonce.to_vec();
    blob.extend_from_slice(&sealed);
    Ok(format!("{}{}", PROTECTED_PREFIX, hex::encode(blob)))
}

fn unprotect_with(key: &[u8; 32], stored: &str) -> ConfigResult<String> {
    let Some(encoded) = stored.strip_prefix(PROTECTED_PREFIX) else {
        return Ok(stored.to_string());
    };

    let blob = hex::decode(encoded)
        .map_err(|e| ConfigError::password(format!("malformed protected password: {}", e)))?;
    if blob.len() <= NONCE_LEN {
        return Err(ConfigError::password("protected password is truncated"));
    }

    let (nonce, sealed) = blob.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plain = cipher.decrypt(Nonce::from_slice(nonce), sealed).map_err(|_| {
        ConfigError::password("password was protected on another machine or is corrupt")
    })?;
    String::from_utf8(plain)
        .map_err(|_| ConfigError::password("protected password is not valid UTF-8"))
}

fn machine_key() -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"cryptsync machine key v1\0");
    hasher.update(machine_identity().as_bytes());
    hasher.finalize().into()
}

fn machine_identity() -> String {
    for file in MACHINE_ID_FILES {
        if let Ok(id) = std::fs::read_to_string(file) {
            let id = id.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }

    let host = std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_default();
    let user = std::env::var("USERNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_default();
    let home = dirs::home_dir()
        .map(|path| path.display().to_string())
        .unwrap_or_default();
    format!("{}|{}|{}", host, user, home)
}
