use crate::error::{Error, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use x25519_dalek::{PublicKey as EncryptionKey, StaticSecret};

/// A node's long-lived key pair: Ed25519 for contract signatures, X25519
/// for receiving wrapped file keys.
#[derive(Clone)]
pub struct Identity {
    pub id: String,
    signing: SigningKey,
    encryption: StaticSecret,
}

/// Hex-encoded public halves of an [`Identity`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicIdentity {
    pub id: String,
    pub public_key: String,
    pub encryption_key: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyFile {
    id: String,
    signing_key: String,
    encryption_secret: String,
}

impl Identity {
    pub fn generate(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            signing: SigningKey::generate(&mut OsRng),
            encryption: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn encryption_secret(&self) -> &StaticSecret {
        &self.encryption
    }

    pub fn encryption_key(&self) -> EncryptionKey {
        EncryptionKey::from(&self.encryption)
    }

    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            id: self.id.clone(),
            public_key: hex::encode(self.verifying_key().to_bytes()),
            encryption_key: hex::encode(self.encryption_key().as_bytes()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let kf = KeyFile {
            id: self.id.clone(),
            signing_key: hex::encode(self.signing.to_bytes()),
            encryption_secret: hex::encode(self.encryption.to_bytes()),
        };
        crate::config::save_json(path, &kf)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let kf: KeyFile = crate::config::load_json(path)?;
        let signing = SigningKey::from_bytes(&decode_32(&kf.signing_key, "signing key")?);
        let encryption = StaticSecret::from(decode_32(&kf.encryption_secret, "encryption secret")?);
        Ok(Self { id: kf.id, signing, encryption })
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity").field("id", &self.id).finish_non_exhaustive()
    }
}

pub fn parse_verifying_key(hex_key: &str) -> Result<VerifyingKey> {
    let bytes = decode_32(hex_key, "verifying key")?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| Error::Validation(format!("bad verifying key: {e}")))
}

pub fn parse_encryption_key(hex_key: &str) -> Result<EncryptionKey> {
    Ok(EncryptionKey::from(decode_32(hex_key, "encryption key")?))
}

pub(crate) fn decode_32(hex_str: &str, what: &str) -> Result<[u8; 32]> {
    let raw = hex::decode(hex_str).map_err(|e| Error::Validation(format!("{what}: {e}")))?;
    raw.try_into()
        .map_err(|v: Vec<u8>| Error::Validation(format!("{what}: expected 32 bytes, got {}", v.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_round_trip_preserves_public_halves() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("renter.key");
        let id = Identity::generate("renter-1");
        id.save(&path).unwrap();
        let loaded = Identity::load(&path).unwrap();
        assert_eq!(loaded.public(), id.public());
    }

    #[test]
    fn malformed_hex_is_a_validation_error() {
        let err = parse_verifying_key("zz").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
        let err = parse_encryption_key("abcd").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }
}
