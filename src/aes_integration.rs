//! AES consumption of QKD-generated keys.
//!
//! The quantum key bits never key AES directly: they are packed little-endian
//! into bytes and stretched through PBKDF2-HMAC-SHA256 (100,000 iterations)
//! with a fresh 16-byte salt. The salt rides at the front of every
//! ciphertext blob so a decrypter holding only `(qkd_bits, mode)` can
//! re-derive the key.
//!
//! Blob layout (base64-encoded), interoperability-critical:
//!
//! | mode | layout |
//! |---|---|
//! | GCM | `salt(16) ‖ nonce(16) ‖ ciphertext ‖ tag(16)` |
//! | CBC | `salt(16) ‖ iv(16) ‖ ciphertext` (PKCS#7) |
//! | CTR | `salt(16) ‖ nonce(16) ‖ ciphertext` |
//!
//! GCM verifies its tag and a mismatch fails the single decrypt call with
//! [`SimulatorError::DecryptFailed`]; nothing else is affected. Salts,
//! nonces and IVs come from the OS entropy source, never the simulation
//! PRNG. Derived key material is zeroized on drop.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::AesGcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use sha3::{Digest, Sha3_256};
use zeroize::Zeroizing;

use crate::entropy::secure_bytes;
use crate::logging::{log_info, LogCategory};
use crate::privacy_amplification::EntropyEstimator;
use crate::{Result, SimulatorError};

// GCM instantiations with the 16-byte nonce the blob format fixes
type Aes128Gcm16 = AesGcm<Aes128, U16>;
type Aes192Gcm16 = AesGcm<Aes192, U16>;
type Aes256Gcm16 = AesGcm<Aes256, U16>;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;
const PBKDF2_ITERATIONS: u32 = 100_000;

/// AES mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AesMode {
    Gcm,
    Cbc,
    Ctr,
}

impl std::fmt::Display for AesMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Gcm => "GCM",
            Self::Cbc => "CBC",
            Self::Ctr => "CTR",
        };
        f.write_str(name)
    }
}

/// Round-trip record for one encryption with verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionRecord {
    pub original_message: String,
    /// Base64 blob per the mode layout.
    pub encrypted_blob: String,
    pub decrypted_message: String,
    /// SHA3-256 fingerprint of the derived AES key (the key itself is
    /// zeroized, never stored).
    pub key_fingerprint: String,
    pub key_length_bits: usize,
    pub encryption_success: bool,
    pub decryption_success: bool,
    pub security_metrics: serde_json::Value,
}

/// AES cipher keyed from QKD bits through PBKDF2.
#[derive(Debug, Clone, Copy)]
pub struct QkdKeyCipher {
    mode: AesMode,
    key_length_bits: usize,
}

impl Default for QkdKeyCipher {
    fn default() -> Self {
        Self {
            mode: AesMode::Gcm,
            key_length_bits: 256,
        }
    }
}

impl QkdKeyCipher {
    /// # Errors
    ///
    /// Rejects key lengths other than 128, 192 or 256 bits.
    pub fn new(mode: AesMode, key_length_bits: usize) -> Result<Self> {
        if ![128, 192, 256].contains(&key_length_bits) {
            return Err(SimulatorError::KeyDerivation(format!(
                "unsupported AES key length: {key_length_bits}"
            )));
        }
        Ok(Self {
            mode,
            key_length_bits,
        })
    }

    pub fn mode(&self) -> AesMode {
        self.mode
    }

    pub fn key_length_bits(&self) -> usize {
        self.key_length_bits
    }

    /// Derive the AES key from QKD bits.
    ///
    /// Bits pack little-endian into bytes (zero-padded to a byte boundary),
    /// then PBKDF2-HMAC-SHA256 stretches them with the salt. A missing salt
    /// draws a fresh one from the OS.
    ///
    /// # Errors
    ///
    /// Rejects empty key material.
    pub fn derive_key(
        &self,
        qkd_bits: &[u8],
        salt: Option<[u8; SALT_LEN]>,
    ) -> Result<(Zeroizing<Vec<u8>>, [u8; SALT_LEN])> {
        if qkd_bits.is_empty() {
            return Err(SimulatorError::KeyDerivation(
                "QKD key material is empty".to_string(),
            ));
        }
        let salt = salt.unwrap_or_else(|| {
            let bytes = secure_bytes(SALT_LEN);
            let mut out = [0u8; SALT_LEN];
            out.copy_from_slice(&bytes);
            out
        });
        let qkd_bytes = Zeroizing::new(bits_to_bytes(qkd_bits));
        let mut key = Zeroizing::new(vec![0u8; self.key_length_bits / 8]);
        pbkdf2_hmac::<Sha256>(&qkd_bytes, &salt, PBKDF2_ITERATIONS, &mut key);
        Ok((key, salt))
    }

    /// Encrypt a message under the QKD-derived key, returning the base64
    /// blob.
    pub fn encrypt(&self, plaintext: &str, qkd_bits: &[u8]) -> Result<String> {
        let (key, salt) = self.derive_key(qkd_bits, None)?;
        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + plaintext.len() + TAG_LEN);
        blob.extend_from_slice(&salt);

        match self.mode {
            AesMode::Gcm => {
                let nonce = secure_bytes(NONCE_LEN);
                let ciphertext = gcm_encrypt(&key, &nonce, plaintext.as_bytes())?;
                blob.extend_from_slice(&nonce);
                blob.extend_from_slice(&ciphertext);
            }
            AesMode::Cbc => {
                let iv = secure_bytes(NONCE_LEN);
                let ciphertext = cbc_encrypt(&key, &iv, plaintext.as_bytes())?;
                blob.extend_from_slice(&iv);
                blob.extend_from_slice(&ciphertext);
            }
            AesMode::Ctr => {
                let nonce = secure_bytes(NONCE_LEN);
                let ciphertext = ctr_apply(&key, &nonce, plaintext.as_bytes())?;
                blob.extend_from_slice(&nonce);
                blob.extend_from_slice(&ciphertext);
            }
        }

        Ok(BASE64.encode(blob))
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt), re-deriving
    /// the key from the salt carried in the blob.
    ///
    /// # Errors
    ///
    /// Any parse failure, padding violation or GCM tag mismatch returns
    /// [`SimulatorError::DecryptFailed`].
    pub fn decrypt(&self, blob_b64: &str, qkd_bits: &[u8]) -> Result<String> {
        let blob = BASE64
            .decode(blob_b64)
            .map_err(|e| SimulatorError::DecryptFailed(format!("invalid base64: {e}")))?;
        if blob.len() < SALT_LEN + NONCE_LEN {
            return Err(SimulatorError::DecryptFailed(
                "blob too short for salt and preamble".to_string(),
            ));
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&blob[..SALT_LEN]);
        let (key, _) = self.derive_key(qkd_bits, Some(salt))?;

        let preamble = &blob[SALT_LEN..SALT_LEN + NONCE_LEN];
        let body = &blob[SALT_LEN + NONCE_LEN..];

        let plaintext = match self.mode {
            AesMode::Gcm => {
                if body.len() < TAG_LEN {
                    return Err(SimulatorError::DecryptFailed(
                        "blob too short for GCM tag".to_string(),
                    ));
                }
                gcm_decrypt(&key, preamble, body)?
            }
            AesMode::Cbc => cbc_decrypt(&key, preamble, body)?,
            AesMode::Ctr => ctr_apply(&key, preamble, body)?,
        };

        String::from_utf8(plaintext)
            .map_err(|e| SimulatorError::DecryptFailed(format!("plaintext is not UTF-8: {e}")))
    }

    /// Encrypt and immediately verify by decrypting, recording the outcome
    /// and security metrics.
    pub fn encrypt_with_verification(
        &self,
        plaintext: &str,
        qkd_bits: &[u8],
    ) -> Result<EncryptionRecord> {
        let blob = self.encrypt(plaintext, qkd_bits)?;
        let decrypted = self.decrypt(&blob, qkd_bits)?;

        let decoded = BASE64
            .decode(&blob)
            .map_err(|e| SimulatorError::DecryptFailed(format!("invalid base64: {e}")))?;
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&decoded[..SALT_LEN]);
        let (key, _) = self.derive_key(qkd_bits, Some(salt))?;

        log_info(
            LogCategory::Crypto,
            &format!(
                "AES-{} {} round-trip verified ({} plaintext bytes)",
                self.key_length_bits,
                self.mode,
                plaintext.len()
            ),
        );

        Ok(EncryptionRecord {
            original_message: plaintext.to_string(),
            decrypted_message: decrypted.clone(),
            encrypted_blob: blob,
            key_fingerprint: key_fingerprint(&key),
            key_length_bits: self.key_length_bits,
            encryption_success: true,
            decryption_success: decrypted == plaintext,
            security_metrics: self.security_metrics(qkd_bits),
        })
    }

    /// Security metrics for a key about to be (or just) used.
    pub fn security_metrics(&self, qkd_bits: &[u8]) -> serde_json::Value {
        let entropy = EntropyEstimator::shannon(qkd_bits);
        let brute_force = match self.key_length_bits {
            128 => "2^127 operations (AES-128)",
            192 => "2^191 operations (AES-192)",
            _ => "2^255 operations (AES-256)",
        };
        json!({
            "qkd_key_entropy": entropy,
            "qkd_key_length": qkd_bits.len(),
            "aes_key_length": self.key_length_bits,
            "aes_mode": self.mode.to_string(),
            "key_derivation": "pbkdf2_hmac_sha256",
            "kdf_iterations": PBKDF2_ITERATIONS,
            "brute_force_resistance": brute_force,
            "entropy_per_bit": entropy,
        })
    }
}

/// Pack bits little-endian into bytes, zero-padding the final byte.
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        bytes[i / 8] |= (bit & 1) << (i % 8);
    }
    bytes
}

/// SHA3-256 fingerprint of key material, hex-encoded.
pub fn key_fingerprint(key: &[u8]) -> String {
    let digest = Sha3_256::digest(key);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn gcm_encrypt(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = GenericArray::from_slice(nonce);
    let encrypt_err =
        |e| SimulatorError::KeyDerivation(format!("AES-GCM encryption failed: {e:?}"));
    match key.len() {
        16 => Aes128Gcm16::new(GenericArray::from_slice(key))
            .encrypt(nonce, plaintext)
            .map_err(encrypt_err),
        24 => Aes192Gcm16::new(GenericArray::from_slice(key))
            .encrypt(nonce, plaintext)
            .map_err(encrypt_err),
        _ => Aes256Gcm16::new(GenericArray::from_slice(key))
            .encrypt(nonce, plaintext)
            .map_err(encrypt_err),
    }
}

fn gcm_decrypt(key: &[u8], nonce: &[u8], ciphertext_and_tag: &[u8]) -> Result<Vec<u8>> {
    let nonce = GenericArray::from_slice(nonce);
    let tag_err = |_| SimulatorError::DecryptFailed("GCM tag verification failed".to_string());
    match key.len() {
        16 => Aes128Gcm16::new(GenericArray::from_slice(key))
            .decrypt(nonce, ciphertext_and_tag)
            .map_err(tag_err),
        24 => Aes192Gcm16::new(GenericArray::from_slice(key))
            .decrypt(nonce, ciphertext_and_tag)
            .map_err(tag_err),
        _ => Aes256Gcm16::new(GenericArray::from_slice(key))
            .decrypt(nonce, ciphertext_and_tag)
            .map_err(tag_err),
    }
}

fn cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let init_err =
        |e| SimulatorError::KeyDerivation(format!("AES-CBC initialization failed: {e}"));
    Ok(match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(init_err)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(init_err)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(init_err)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    })
}

fn cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let init_err = |e| SimulatorError::DecryptFailed(format!("AES-CBC initialization failed: {e}"));
    let pad_err = |_| SimulatorError::DecryptFailed("CBC padding verification failed".to_string());
    match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(init_err)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(pad_err),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(init_err)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(pad_err),
        _ => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(init_err)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(pad_err),
    }
}

fn ctr_apply(key: &[u8], nonce: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let init_err = |e| SimulatorError::DecryptFailed(format!("AES-CTR initialization failed: {e}"));
    let mut buffer = data.to_vec();
    match key.len() {
        16 => ctr::Ctr128BE::<Aes128>::new_from_slices(key, nonce)
            .map_err(init_err)?
            .apply_keystream(&mut buffer),
        24 => ctr::Ctr128BE::<Aes192>::new_from_slices(key, nonce)
            .map_err(init_err)?
            .apply_keystream(&mut buffer),
        _ => ctr::Ctr128BE::<Aes256>::new_from_slices(key, nonce)
            .map_err(init_err)?
            .apply_keystream(&mut buffer),
    }
    Ok(buffer)
}
