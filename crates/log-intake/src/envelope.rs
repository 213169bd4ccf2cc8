// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Envelope codec for encrypted log payloads.
//!
//! Two wire formats share the same key derivation, `SHA-256(passphrase || salt)`:
//!
//! * [`EnvelopeMode::Cfb`]: `base64(salt[16] || iv[16] || ciphertext)` using AES-256-CFB. This is
//!   the format existing device clients produce. It carries no integrity tag: a tampered
//!   ciphertext decrypts to garbage, which is normally rejected later when the record fails to
//!   parse, but nothing here detects it.
//! * [`EnvelopeMode::Gcm`]: `base64(salt[16] || nonce[12] || ciphertext || tag[16])` using
//!   AES-256-GCM. Tampering is detected and reported as [`IntakeError::DecryptionFailed`].

use std::fmt;
use std::str::FromStr;

use aes::Aes256;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::IntakeError;

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const GCM_NONCE_LEN: usize = 12;
pub const GCM_TAG_LEN: usize = 16;

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnvelopeMode {
    #[default]
    Cfb,
    Gcm,
}

impl EnvelopeMode {
    /// Decodes and decrypts an envelope in this mode.
    pub fn open(&self, envelope_b64: &str, passphrase: &str) -> Result<Vec<u8>, IntakeError> {
        match self {
            EnvelopeMode::Cfb => decrypt(envelope_b64, passphrase),
            EnvelopeMode::Gcm => open_sealed(envelope_b64, passphrase),
        }
    }

    /// Encrypts and encodes a payload in this mode, with fresh random salt and iv/nonce.
    pub fn seal(&self, plaintext: &[u8], passphrase: &str) -> Result<String, IntakeError> {
        match self {
            EnvelopeMode::Cfb => encrypt(plaintext, passphrase),
            EnvelopeMode::Gcm => seal(plaintext, passphrase),
        }
    }
}

impl FromStr for EnvelopeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cfb" => Ok(EnvelopeMode::Cfb),
            "gcm" => Ok(EnvelopeMode::Gcm),
            other => Err(format!("unknown envelope mode '{other}', expected 'cfb' or 'gcm'")),
        }
    }
}

impl fmt::Display for EnvelopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeMode::Cfb => write!(f, "cfb"),
            EnvelopeMode::Gcm => write!(f, "gcm"),
        }
    }
}

/// Derives the AES-256 key for one message: `SHA-256(passphrase || salt)`.
pub fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(passphrase.as_bytes());
    hasher.update(salt);
    let digest = hasher.finalize();

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
}

/// Decrypts a CFB envelope. Fails with `MalformedEnvelope` on bad base64 or when fewer than
/// 32 bytes decode.
pub fn decrypt(envelope_b64: &str, passphrase: &str) -> Result<Vec<u8>, IntakeError> {
    let decoded = decode(envelope_b64, SALT_LEN + IV_LEN)?;
    let (salt, rest) = decoded.split_at(SALT_LEN);
    let (iv, ciphertext) = rest.split_at(IV_LEN);

    let key = derive_key(passphrase, salt);
    let mut plaintext = ciphertext.to_vec();
    Aes256CfbDec::new_from_slices(&key, iv)
        .map_err(|e| IntakeError::CipherInitError(e.to_string()))?
        .decrypt(&mut plaintext);

    Ok(plaintext)
}

/// Encrypts into a CFB envelope using a random salt and iv.
pub fn encrypt(plaintext: &[u8], passphrase: &str) -> Result<String, IntakeError> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);
    encrypt_with(plaintext, passphrase, &salt, &iv)
}

/// Deterministic variant of [`encrypt`], for fixtures where salt and iv must be fixed.
pub fn encrypt_with(
    plaintext: &[u8],
    passphrase: &str,
    salt: &[u8; SALT_LEN],
    iv: &[u8; IV_LEN],
) -> Result<String, IntakeError> {
    let key = derive_key(passphrase, salt);
    let mut ciphertext = plaintext.to_vec();
    Aes256CfbEnc::new_from_slices(&key, iv)
        .map_err(|e| IntakeError::CipherInitError(e.to_string()))?
        .encrypt(&mut ciphertext);

    let mut combined = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
    combined.extend_from_slice(salt);
    combined.extend_from_slice(iv);
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
}

/// Encrypts into an authenticated GCM envelope using a random salt and nonce.
pub fn seal(plaintext: &[u8], passphrase: &str) -> Result<String, IntakeError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; GCM_NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let cipher = gcm_cipher(passphrase, &salt)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| IntakeError::CipherInitError("AES-GCM encryption failed".to_string()))?;

    let mut combined = Vec::with_capacity(SALT_LEN + GCM_NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&salt);
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
}

/// Decrypts and authenticates a GCM envelope.
pub fn open_sealed(envelope_b64: &str, passphrase: &str) -> Result<Vec<u8>, IntakeError> {
    let decoded = decode(envelope_b64, SALT_LEN + GCM_NONCE_LEN + GCM_TAG_LEN)?;
    let (salt, rest) = decoded.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(GCM_NONCE_LEN);

    gcm_cipher(passphrase, salt)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| IntakeError::DecryptionFailed)
}

fn gcm_cipher(passphrase: &str, salt: &[u8]) -> Result<Aes256Gcm, IntakeError> {
    let key = derive_key(passphrase, salt);
    Aes256Gcm::new_from_slice(&key).map_err(|e| IntakeError::CipherInitError(e.to_string()))
}

fn decode(envelope_b64: &str, min_len: usize) -> Result<Vec<u8>, IntakeError> {
    let decoded = STANDARD
        .decode(envelope_b64)
        .map_err(|e| IntakeError::MalformedEnvelope(format!("invalid base64: {e}")))?;
    if decoded.len() < min_len {
        return Err(IntakeError::MalformedEnvelope(format!(
            "decoded length {} is shorter than {min_len} bytes",
            decoded.len()
        )));
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PASSPHRASE: &str = "your32bytekeyhere!";
    const RECORD: &[u8] = br#"{"imel":"123456789012345","error":"Test error"}"#;

    fn fixture_salt() -> [u8; SALT_LEN] {
        core::array::from_fn(|i| i as u8)
    }

    fn fixture_iv() -> [u8; IV_LEN] {
        core::array::from_fn(|i| (i + 16) as u8)
    }

    // Produced independently with an AES-256-CFB128 implementation and the same key derivation.
    const KNOWN_ENVELOPE: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh/4FWh1kMEBPDL+RxtzREC/hWNTAa1yCIkwpHwGEL2pQJH7Oe8NrqR5TWaWKbyJCg==";

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_derive_key_is_sha256_of_passphrase_and_salt() {
        let key = derive_key(PASSPHRASE, &fixture_salt());
        assert_eq!(
            hex(&key),
            "94c6ddaaa12af45f627e62aaf366d3130d96987687fb6db8e5af412150ba603a"
        );
    }

    #[test]
    fn test_derive_key_depends_on_salt() {
        assert_ne!(
            derive_key(PASSPHRASE, &[0u8; SALT_LEN]),
            derive_key(PASSPHRASE, &[1u8; SALT_LEN])
        );
    }

    #[test]
    fn test_encrypt_with_matches_known_envelope() {
        let envelope = encrypt_with(RECORD, PASSPHRASE, &fixture_salt(), &fixture_iv()).unwrap();
        assert_eq!(envelope, KNOWN_ENVELOPE);
    }

    #[test]
    fn test_decrypt_known_envelope() {
        let plaintext = decrypt(KNOWN_ENVELOPE, PASSPHRASE).unwrap();
        assert_eq!(plaintext, RECORD);
    }

    #[test]
    fn test_decrypt_with_wrong_passphrase_yields_garbage() {
        let plaintext = decrypt(KNOWN_ENVELOPE, "not-the-passphrase").unwrap();
        assert_ne!(plaintext, RECORD);
        assert_eq!(plaintext.len(), RECORD.len());
    }

    #[test]
    fn test_decrypt_rejects_invalid_base64() {
        let result = decrypt("not base64 at all!", PASSPHRASE);
        assert!(matches!(result, Err(IntakeError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decrypt_rejects_short_envelope() {
        let short = STANDARD.encode([0u8; 31]);
        let result = decrypt(&short, PASSPHRASE);
        assert!(matches!(result, Err(IntakeError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decrypt_header_only_envelope_is_empty() {
        let header_only = STANDARD.encode([7u8; SALT_LEN + IV_LEN]);
        assert_eq!(decrypt(&header_only, PASSPHRASE).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_encrypt_uses_fresh_salt_and_iv() {
        let first = encrypt(RECORD, PASSPHRASE).unwrap();
        let second = encrypt(RECORD, PASSPHRASE).unwrap();
        assert_ne!(first, second);
        assert_eq!(decrypt(&first, PASSPHRASE).unwrap(), RECORD);
        assert_eq!(decrypt(&second, PASSPHRASE).unwrap(), RECORD);
    }

    #[test]
    fn test_sealed_envelope_opens() {
        let envelope = seal(RECORD, PASSPHRASE).unwrap();
        assert_eq!(open_sealed(&envelope, PASSPHRASE).unwrap(), RECORD);
    }

    #[test]
    fn test_sealed_envelope_detects_tampering() {
        let envelope = seal(RECORD, PASSPHRASE).unwrap();
        let mut raw = STANDARD.decode(envelope).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = STANDARD.encode(raw);

        let result = open_sealed(&tampered, PASSPHRASE);
        assert!(matches!(result, Err(IntakeError::DecryptionFailed)));
    }

    #[test]
    fn test_sealed_envelope_rejects_wrong_passphrase() {
        let envelope = seal(RECORD, PASSPHRASE).unwrap();
        let result = open_sealed(&envelope, "not-the-passphrase");
        assert!(matches!(result, Err(IntakeError::DecryptionFailed)));
    }

    #[test]
    fn test_sealed_envelope_rejects_short_input() {
        let short = STANDARD.encode([0u8; SALT_LEN + GCM_NONCE_LEN + GCM_TAG_LEN - 1]);
        let result = open_sealed(&short, PASSPHRASE);
        assert!(matches!(result, Err(IntakeError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_envelope_mode_parsing() {
        assert_eq!("cfb".parse::<EnvelopeMode>().unwrap(), EnvelopeMode::Cfb);
        assert_eq!(" GCM ".parse::<EnvelopeMode>().unwrap(), EnvelopeMode::Gcm);
        assert!("ctr".parse::<EnvelopeMode>().is_err());
        assert_eq!(EnvelopeMode::default(), EnvelopeMode::Cfb);
    }

    #[test]
    fn test_cfb_mode_cannot_open_gcm_envelope_as_record() {
        let envelope = EnvelopeMode::Gcm.seal(RECORD, PASSPHRASE).unwrap();
        let opened = EnvelopeMode::Cfb.open(&envelope, PASSPHRASE).unwrap();
        assert_ne!(opened, RECORD);
    }

    proptest! {
        #[test]
        fn prop_cfb_round_trip(
            plaintext in proptest::collection::vec(any::<u8>(), 0..512),
            passphrase in ".{0,64}",
            salt in any::<[u8; SALT_LEN]>(),
            iv in any::<[u8; IV_LEN]>(),
        ) {
            let envelope = encrypt_with(&plaintext, &passphrase, &salt, &iv).unwrap();
            prop_assert_eq!(decrypt(&envelope, &passphrase).unwrap(), plaintext);
        }

        #[test]
        fn prop_short_envelopes_are_malformed(raw in proptest::collection::vec(any::<u8>(), 0..SALT_LEN + IV_LEN)) {
            let envelope = STANDARD.encode(raw);
            prop_assert!(matches!(decrypt(&envelope, PASSPHRASE), Err(IntakeError::MalformedEnvelope(_))));
        }

        #[test]
        fn prop_arbitrary_input_never_panics(input in ".*") {
            let _ = decrypt(&input, PASSPHRASE);
            let _ = open_sealed(&input, PASSPHRASE);
        }
    }
}
