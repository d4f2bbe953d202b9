// Content encryption for file versions and key wrapping for sharing

use crate::error::{Error, Result};
use crate::keys::decode_32;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey as EncryptionKey, StaticSecret};

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const NONCE_SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const WRAP_INFO: &[u8] = b"skyfs-key-wrap-v1";

/// A file's symmetric key material. Shared by every version of the file;
/// each version mixes in its own salt to get a unique nonce.
#[derive(Clone, PartialEq, Eq)]
pub struct FileKey {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl FileKey {
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    pub fn from_hex(key_hex: &str, iv_hex: &str) -> Result<Self> {
        let key = decode_32(key_hex, "aes key")?;
        let iv_raw = hex::decode(iv_hex).map_err(|e| Error::Validation(format!("aes iv: {e}")))?;
        let iv: [u8; IV_LEN] = iv_raw
            .try_into()
            .map_err(|_| Error::Validation(format!("aes iv must be {IV_LEN} bytes")))?;
        Ok(Self { key, iv })
    }

    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }

    pub fn iv_hex(&self) -> String {
        hex::encode(self.iv)
    }

    fn nonce_for(&self, salt: &[u8]) -> [u8; NONCE_LEN] {
        let digest = Sha256::new().chain_update(self.iv).chain_update(salt).finalize();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        nonce
    }

    pub fn encrypt(&self, plaintext: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| Error::Validation(format!("cipher init: {e}")))?;
        let nonce = self.nonce_for(salt);
        cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Validation("encryption failed".into()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| Error::Validation(format!("cipher init: {e}")))?;
        let nonce = self.nonce_for(salt);
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| Error::Validation("decryption failed: wrong key or corrupted content".into()))
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FileKey(..)")
    }
}

pub fn random_salt() -> [u8; NONCE_SALT_LEN] {
    let mut salt = [0u8; NONCE_SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Seals `secret` to `recipient`: ephemeral X25519 agreement, HKDF-SHA256,
/// AES-256-GCM. Output is hex of `ephemeral_pub || nonce || ciphertext`.
pub fn seal(secret: &[u8], recipient: &EncryptionKey) -> Result<String> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = EncryptionKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    let cipher = wrap_cipher(shared.as_bytes(), &ephemeral_pub, recipient)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), secret)
        .map_err(|_| Error::Validation("key wrap failed".into()))?;

    let mut out = Vec::with_capacity(32 + NONCE_LEN + ct.len());
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(hex::encode(out))
}

pub fn open(sealed_hex: &str, recipient: &StaticSecret) -> Result<Vec<u8>> {
    let raw = hex::decode(sealed_hex).map_err(|e| Error::Validation(format!("wrapped key: {e}")))?;
    if raw.len() < 32 + NONCE_LEN {
        return Err(Error::Validation("wrapped key too short".into()));
    }
    let mut eph = [0u8; 32];
    eph.copy_from_slice(&raw[..32]);
    let ephemeral_pub = EncryptionKey::from(eph);
    let recipient_pub = EncryptionKey::from(recipient);
    let shared = recipient.diffie_hellman(&ephemeral_pub);
    let cipher = wrap_cipher(shared.as_bytes(), &ephemeral_pub, &recipient_pub)?;
    cipher
        .decrypt(Nonce::from_slice(&raw[32..32 + NONCE_LEN]), &raw[32 + NONCE_LEN..])
        .map_err(|_| Error::Validation("wrapped key does not open with this secret".into()))
}

fn wrap_cipher(shared: &[u8], ephemeral: &EncryptionKey, recipient: &EncryptionKey) -> Result<Aes256Gcm> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(WRAP_INFO, &mut okm)
        .map_err(|_| Error::Validation("hkdf expand".into()))?;
    Aes256Gcm::new_from_slice(&okm).map_err(|e| Error::Validation(format!("cipher init: {e}")))
}

/// Wraps both halves of a file key for one recipient.
pub fn wrap_file_key(key: &FileKey, recipient: &EncryptionKey) -> Result<(String, String)> {
    Ok((seal(&key.key, recipient)?, seal(&key.iv, recipient)?))
}

pub fn unwrap_file_key(wrapped_key: &str, wrapped_iv: &str, secret: &StaticSecret) -> Result<FileKey> {
    let key = open(wrapped_key, secret)?;
    let iv = open(wrapped_iv, secret)?;
    FileKey::from_hex(&hex::encode(key), &hex::encode(iv))
}
