//! Key pairs used by authorities and hosts.
//!
//! Authorities sign with Ed25519; hosts hold X25519 keys for the tunnel
//! handshake. Secret material is zeroized on drop and never printed.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};

/// Length of every secret and public key handled here.
pub const KEY_LENGTH: usize = 32;

fn random_seed() -> CryptoResult<[u8; KEY_LENGTH]> {
    let mut seed = [0u8; KEY_LENGTH];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    Ok(seed)
}

fn key_array(bytes: &[u8], what: &str) -> CryptoResult<[u8; KEY_LENGTH]> {
    if bytes.len() != KEY_LENGTH {
        return Err(CryptoError::InvalidKey(format!(
            "{} key length {} (expected {})",
            what,
            bytes.len(),
            KEY_LENGTH
        )));
    }
    let mut array = [0u8; KEY_LENGTH];
    array.copy_from_slice(bytes);
    Ok(array)
}

/// Short stable identifier of a public key.
pub fn public_key_fingerprint(public_key: &[u8]) -> String {
    hex::encode(blake3::hash(public_key).as_bytes())
}

/// Ed25519 key pair of a certificate authority.
#[derive(Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a new key pair from the operating system RNG.
    pub fn generate() -> CryptoResult<Self> {
        let mut seed = random_seed()?;
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { signing_key })
    }

    /// Rebuild a key pair from its 32 byte secret.
    pub fn from_secret_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let mut secret = key_array(bytes, "signing")?;
        let signing_key = SigningKey::from_bytes(&secret);
        secret.zeroize();
        Ok(Self { signing_key })
    }

    pub fn secret_bytes(&self) -> [u8; KEY_LENGTH] {
        self.signing_key.to_bytes()
    }

    pub fn public_key(&self) -> [u8; KEY_LENGTH] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public_key", &hex::encode(self.public_key()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// X25519 key pair of a host.
#[derive(Clone)]
pub struct HostKeyPair {
    secret: StaticSecret,
    public: X25519PublicKey,
}

impl HostKeyPair {
    /// Generate a new key pair from the operating system RNG.
    pub fn generate() -> CryptoResult<Self> {
        let mut seed = random_seed()?;
        let pair = Self::from_secret_array(seed);
        seed.zeroize();
        Ok(pair)
    }

    /// Rebuild a key pair from its 32 byte secret.
    pub fn from_secret_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let mut secret = key_array(bytes, "host")?;
        let pair = Self::from_secret_array(secret);
        secret.zeroize();
        Ok(pair)
    }

    fn from_secret_array(secret: [u8; KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn secret_bytes(&self) -> [u8; KEY_LENGTH] {
        self.secret.to_bytes()
    }

    pub fn public_key(&self) -> [u8; KEY_LENGTH] {
        self.public.to_bytes()
    }
}

impl fmt::Debug for HostKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKeyPair")
            .field("public_key", &hex::encode(self.public_key()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
