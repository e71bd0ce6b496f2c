//! Destroyable key material.

use std::fmt;

use parking_lot::RwLock;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors from using or destroying key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    #[error("{0} key has been destroyed")]
    Destroyed(&'static str),
    #[error("{0} key was already destroyed")]
    AlreadyDestroyed(&'static str),
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct KeyMaterial(Vec<u8>);

/// A symmetric key that can be destroyed exactly once.
///
/// Destroying zeroes the bytes in place. Every later access fails with
/// [`SecretError::Destroyed`].
pub struct SecretKey {
    algorithm: &'static str,
    material: RwLock<Option<KeyMaterial>>,
}

impl SecretKey {
    pub fn new(algorithm: &'static str, material: Vec<u8>) -> Self {
        Self {
            algorithm,
            material: RwLock::new(Some(KeyMaterial(material))),
        }
    }

    pub fn algorithm(&self) -> &'static str {
        self.algorithm
    }

    /// Borrow the raw key bytes for the duration of `f`.
    pub fn with_material<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, SecretError> {
        let material = self.material.read();
        match material.as_ref() {
            Some(key) => Ok(f(&key.0)),
            None => Err(SecretError::Destroyed(self.algorithm)),
        }
    }

    /// Zero and release the key bytes.
    pub fn destroy(&self) -> Result<(), SecretError> {
        let mut material = self.material.write();
        match material.take() {
            Some(mut key) => {
                key.zeroize();
                Ok(())
            }
            None => {
                tracing::error!("Attempted to destroy {} key twice", self.algorithm);
                Err(SecretError::AlreadyDestroyed(self.algorithm))
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.material.read().is_none()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("algorithm", &self.algorithm)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

/// The pair of keys protecting local data: one for encryption, one for MACs.
#[derive(Debug)]
pub struct MasterSecret {
    encryption_key: SecretKey,
    mac_key: SecretKey,
}

impl MasterSecret {
    pub const ENCRYPTION_ALGORITHM: &'static str = "AES";
    pub const MAC_ALGORITHM: &'static str = "HmacSHA256";

    pub fn new(encryption_key: Vec<u8>, mac_key: Vec<u8>) -> Self {
        Self {
            encryption_key: SecretKey::new(Self::ENCRYPTION_ALGORITHM, encryption_key),
            mac_key: SecretKey::new(Self::MAC_ALGORITHM, mac_key),
        }
    }

    pub fn encryption_key(&self) -> &SecretKey {
        &self.encryption_key
    }

    pub fn mac_key(&self) -> &SecretKey {
        &self.mac_key
    }

    /// Destroy both keys. Both are attempted even if the first fails.
    pub fn destroy(&self) -> Result<(), SecretError> {
        let encryption = self.encryption_key.destroy();
        let mac = self.mac_key.destroy();
        encryption.and(mac)
    }

    pub fn is_destroyed(&self) -> bool {
        self.encryption_key.is_destroyed() || self.mac_key.is_destroyed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroy_once() {
        let key = SecretKey::new("AES", vec![7; 32]);
        assert_eq!(key.with_material(|bytes| bytes.len()), Ok(32));

        assert_eq!(key.destroy(), Ok(()));
        assert!(key.is_destroyed());
        assert_eq!(key.destroy(), Err(SecretError::AlreadyDestroyed("AES")));
        assert_eq!(
            key.with_material(|bytes| bytes.len()),
            Err(SecretError::Destroyed("AES"))
        );
    }

    #[test]
    fn test_master_secret_destroys_both_keys() {
        let secret = MasterSecret::new(vec![1; 32], vec![2; 32]);
        assert!(!secret.is_destroyed());

        assert!(secret.destroy().is_ok());
        assert!(secret.encryption_key().is_destroyed());
        assert!(secret.mac_key().is_destroyed());
        assert!(matches!(
            secret.destroy(),
            Err(SecretError::AlreadyDestroyed(_))
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = MasterSecret::new(vec![0xAB; 4], vec![0xCD; 4]);
        let printed = format!("{:?}", secret);
        assert!(printed.contains("HmacSHA256"));
        assert!(!printed.contains("171"));
    }
}
