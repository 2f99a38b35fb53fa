//! Credential encryption for stored TTN API keys.
//!
//! AES-256-GCM with HKDF per-organization key derivation. Only the encrypted
//! blob and a last-4 fingerprint are ever persisted; the fingerprint is the
//! only part that may appear in logs or the UI.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{TtnError, TtnResult};

/// Length of AES-256 key in bytes.
const KEY_LENGTH: usize = 32;

/// Length of GCM nonce in bytes.
const NONCE_LENGTH: usize = 12;

/// Context string for HKDF key derivation.
const HKDF_INFO: &[u8] = b"frostguard-ttn-credentials-v1";

/// Service for encrypting and decrypting stored control-plane credentials.
///
/// Uses AES-256-GCM with HKDF-derived per-organization keys, so a leaked
/// ciphertext from one organization cannot be decrypted with another's key.
#[derive(Clone)]
pub struct CredentialEncryption {
    /// Master key for deriving organization-specific keys.
    master_key: [u8; KEY_LENGTH],
}

impl std::fmt::Debug for CredentialEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEncryption").finish_non_exhaustive()
    }
}

impl CredentialEncryption {
    /// Create a new encryption service with the given master key.
    #[must_use]
    pub fn new(master_key: [u8; KEY_LENGTH]) -> Self {
        Self { master_key }
    }

    /// Create a new encryption service from a hex-encoded master key.
    pub fn from_hex(hex_key: &str) -> TtnResult<Self> {
        let bytes = hex::decode(hex_key).map_err(|e| TtnError::EncryptionFailed {
            message: format!("invalid hex key: {e}"),
        })?;
        Self::from_bytes(&bytes)
    }

    /// Create a new encryption service from a base64-encoded master key.
    pub fn from_base64(base64_key: &str) -> TtnResult<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let bytes = STANDARD
            .decode(base64_key)
            .map_err(|e| TtnError::EncryptionFailed {
                message: format!("invalid base64 key: {e}"),
            })?;
        Self::from_bytes(&bytes)
    }

    fn from_bytes(bytes: &[u8]) -> TtnResult<Self> {
        if bytes.len() != KEY_LENGTH {
            return Err(TtnError::EncryptionFailed {
                message: format!("key must be {} bytes, got {}", KEY_LENGTH, bytes.len()),
            });
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self::new(key))
    }

    /// Derive an organization-specific key using HKDF.
    fn derive_org_key(&self, organization_id: Uuid) -> TtnResult<[u8; KEY_LENGTH]> {
        let hkdf = Hkdf::<Sha256>::new(Some(organization_id.as_bytes()), &self.master_key);
        let mut derived = [0u8; KEY_LENGTH];
        hkdf.expand(HKDF_INFO, &mut derived)
            .map_err(|_| TtnError::EncryptionFailed {
                message: "HKDF expansion failed".to_string(),
            })?;
        Ok(derived)
    }

    /// Encrypt an API key for a specific organization.
    ///
    /// Returns `nonce || ciphertext || tag` as a single blob.
    pub fn encrypt(&self, organization_id: Uuid, plaintext: &[u8]) -> TtnResult<Vec<u8>> {
        let key = self.derive_org_key(organization_id)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|e| TtnError::EncryptionFailed {
                message: format!("failed to create cipher: {e}"),
            })?;

        use rand::rngs::OsRng;
        use rand::RngCore;
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext =
            cipher
                .encrypt(nonce, plaintext)
                .map_err(|e| TtnError::EncryptionFailed {
                    message: format!("encryption failed: {e}"),
                })?;

        let mut blob = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt an API key blob for a specific organization.
    pub fn decrypt(&self, organization_id: Uuid, blob: &[u8]) -> TtnResult<Vec<u8>> {
        if blob.len() <= NONCE_LENGTH {
            return Err(TtnError::DecryptionFailed {
                message: "blob too short".to_string(),
            });
        }

        let key = self.derive_org_key(organization_id)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|e| TtnError::DecryptionFailed {
                message: format!("failed to create cipher: {e}"),
            })?;

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LENGTH);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| TtnError::DecryptionFailed {
                message: "authentication failed".to_string(),
            })
    }
}

/// The displayable fingerprint of a credential: its last 4 characters.
///
/// This is the only part of a key allowed in logs and the UI.
#[must_use]
pub fn key_fingerprint(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let start = chars.len().saturating_sub(4);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CredentialEncryption {
        CredentialEncryption::new([7u8; KEY_LENGTH])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let svc = service();
        let org = Uuid::new_v4();
        let plaintext = b"NNSXS.SECRETKEYMATERIAL.ABCD";

        let blob = svc.encrypt(org, plaintext).unwrap();
        assert_ne!(&blob[NONCE_LENGTH..], plaintext.as_slice());

        let decrypted = svc.decrypt(org, &blob).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_org_cannot_decrypt() {
        let svc = service();
        let blob = svc.encrypt(Uuid::new_v4(), b"secret").unwrap();
        assert!(svc.decrypt(Uuid::new_v4(), &blob).is_err());
    }

    #[test]
    fn test_nonces_are_unique() {
        let svc = service();
        let org = Uuid::new_v4();
        let a = svc.encrypt(org, b"secret").unwrap();
        let b = svc.encrypt(org, b"secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_hex_rejects_bad_length() {
        assert!(CredentialEncryption::from_hex("abcd").is_err());
        let ok = CredentialEncryption::from_hex(&"00".repeat(KEY_LENGTH));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let svc = service();
        assert!(svc.decrypt(Uuid::new_v4(), &[0u8; 5]).is_err());
    }

    #[test]
    fn test_key_fingerprint() {
        assert_eq!(key_fingerprint("NNSXS.ABCDEF.WXYZ"), "WXYZ");
        assert_eq!(key_fingerprint("abc"), "abc");
        assert_eq!(key_fingerprint(""), "");
    }
}
