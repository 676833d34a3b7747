//! Encryption for the API key kept in settings.toml.
//!
//! Stored values look like `kru1:<base64 nonce || ciphertext>`. The key is
//! derived from the hostname, the username and the format version, so a copied
//! settings file is useless on another machine. The `kru1` prefix is bound to
//! the ciphertext as associated data and cannot be swapped without detection.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Bumped whenever key derivation or the envelope layout changes
pub const KEY_FORMAT_VERSION: u32 = 1;

const NONCE_SIZE: usize = 12;

fn version_tag(version: u32) -> String {
    format!("kru{}", version)
}

fn derive_key(version: u32) -> [u8; 32] {
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string());
    let username = whoami::username();

    let mut hasher = Sha256::new();
    hasher.update(format!("kru-api-key/v{}", version).as_bytes());
    hasher.update(hostname.as_bytes());
    hasher.update(b":");
    hasher.update(username.as_bytes());

    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    key
}

fn cipher(version: u32) -> Result<Aes256Gcm, String> {
    Aes256Gcm::new_from_slice(&derive_key(version))
        .map_err(|e| format!("Failed to create cipher: {}", e))
}

/// Split `kru<N>:<payload>` into its version and payload
fn parse_envelope(encrypted: &str) -> Result<(u32, &str), String> {
    let (tag, payload) = encrypted
        .split_once(':')
        .ok_or_else(|| "Stored API key has no format version; save it again".to_string())?;
    let version = tag
        .strip_prefix("kru")
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| format!("Unrecognized API key format '{}'", tag))?;
    if version != KEY_FORMAT_VERSION {
        return Err(format!(
            "API key was stored with format v{}, this build reads v{}; save it again",
            version, KEY_FORMAT_VERSION
        ));
    }
    Ok((version, payload))
}

/// Encrypt a string into the current `kru<N>:` envelope.
pub fn encrypt_string(plaintext: &str) -> Result<String, String> {
    let tag = version_tag(KEY_FORMAT_VERSION);
    let cipher = cipher(KEY_FORMAT_VERSION)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext.as_bytes(),
                aad: tag.as_bytes(),
            },
        )
        .map_err(|e| format!("Encryption failed: {}", e))?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend_from_slice(&ciphertext);

    Ok(format!("{}:{}", tag, BASE64.encode(&combined)))
}

/// Decrypt the output of [`encrypt_string`].
pub fn decrypt_string(encrypted: &str) -> Result<String, String> {
    let (version, payload) = parse_envelope(encrypted.trim())?;
    let cipher = cipher(version)?;

    let combined = BASE64
        .decode(payload)
        .map_err(|e| format!("Failed to decode base64: {}", e))?;
    if combined.len() < NONCE_SIZE {
        return Err("Encrypted data too short".to_string());
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let tag = version_tag(version);
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: tag.as_bytes(),
            },
        )
        .map_err(|e| format!("Decryption failed: {}", e))?;

    String::from_utf8(plaintext).map_err(|e| format!("Invalid UTF-8 in decrypted data: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let original = "AIza-test-key-12345";
        let encrypted = encrypt_string(original).expect("encryption failed");
        assert!(encrypted.starts_with("kru1:"));
        assert_eq!(decrypt_string(&encrypted).expect("decryption failed"), original);
    }

    #[test]
    fn test_encrypt_uses_fresh_nonce() {
        let encrypted1 = encrypt_string("test-key").expect("encryption failed");
        let encrypted2 = encrypt_string("test-key").expect("encryption failed");
        assert_ne!(encrypted1, encrypted2);
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        assert!(decrypt_string("kru1:not-valid-base64!!!").is_err());
        assert!(decrypt_string(&format!("kru1:{}", BASE64.encode(b"short"))).is_err());
    }

    #[test]
    fn test_decrypt_rejects_unversioned_and_unknown_versions() {
        let encrypted = encrypt_string("secret").expect("encryption failed");
        let (_, payload) = encrypted.split_once(':').unwrap();

        let err = decrypt_string(payload).unwrap_err();
        assert!(err.contains("no format version"), "{}", err);

        let err = decrypt_string(&format!("kru2:{}", payload)).unwrap_err();
        assert!(err.contains("format v2"), "{}", err);

        let err = decrypt_string(&format!("abc:{}", payload)).unwrap_err();
        assert!(err.contains("Unrecognized"), "{}", err);
    }

    #[test]
    fn test_decrypt_rejects_tampered_ciphertext() {
        let encrypted = encrypt_string("secret").expect("encryption failed");
        let (tag, payload) = encrypted.split_once(':').unwrap();
        let mut bytes = BASE64.decode(payload).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(decrypt_string(&format!("{}:{}", tag, BASE64.encode(&bytes))).is_err());
    }
}
