//! Storage contracts: construction, canonical encoding, signing and
//! comparison.
//!
//! Both parties sign the same canonical byte string built from the four
//! contract terms. Signatures never cover other signatures, so the renter
//! and provider signatures verify independently and any later edit to a
//! term invalidates both.

use crate::error::{Error, Result};
use crate::types::Contract;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

const CANONICAL_MAGIC: &[u8] = b"SKYFSCT\0"; // 8 bytes

/// New contract with a fresh ID and no signatures.
pub fn build(renter_id: &str, provider_id: &str, storage_space: i64) -> Contract {
    Contract {
        id: uuid::Uuid::new_v4().to_string(),
        renter_id: renter_id.to_string(),
        provider_id: provider_id.to_string(),
        storage_space,
        renter_signature: String::new(),
        provider_signature: String::new(),
    }
}

/// Fixed layout: magic, then `id`, `renter_id`, `provider_id` each as
/// u32 LE length + UTF-8 bytes, then `storage_space` as i64 LE.
pub fn canonical_bytes(contract: &Contract) -> Vec<u8> {
    let strings = [&contract.id, &contract.renter_id, &contract.provider_id];
    let cap = CANONICAL_MAGIC.len() + strings.iter().map(|s| 4 + s.len()).sum::<usize>() + 8;
    let mut buf = Vec::with_capacity(cap);
    buf.extend_from_slice(CANONICAL_MAGIC);
    for s in strings {
        buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }
    buf.extend_from_slice(&contract.storage_space.to_le_bytes());
    buf
}

/// Hex-encoded Ed25519 signature over the contract terms.
pub fn sign(contract: &Contract, key: &SigningKey) -> String {
    hex::encode(key.sign(&canonical_bytes(contract)).to_bytes())
}

pub fn verify(contract: &Contract, signature: &str, key: &VerifyingKey) -> Result<()> {
    let raw = hex::decode(signature)
        .map_err(|_| Error::SignatureMismatch(format!("contract {}: signature is not hex", contract.id)))?;
    let sig = Signature::from_slice(&raw)
        .map_err(|_| Error::SignatureMismatch(format!("contract {}: malformed signature", contract.id)))?;
    key.verify(&canonical_bytes(contract), &sig)
        .map_err(|_| Error::SignatureMismatch(format!("contract {}: terms do not match signature", contract.id)))
}

/// Both signatures present and each valid for the current terms.
pub fn verify_fully_executed(
    contract: &Contract,
    renter_key: &VerifyingKey,
    provider_key: &VerifyingKey,
) -> Result<()> {
    if contract.renter_signature.is_empty() {
        return Err(Error::SignatureMismatch(format!("contract {}: missing renter signature", contract.id)));
    }
    if contract.provider_signature.is_empty() {
        return Err(Error::SignatureMismatch(format!(
            "contract {}: missing provider signature",
            contract.id
        )));
    }
    verify(contract, &contract.renter_signature, renter_key)?;
    verify(contract, &contract.provider_signature, provider_key)
}

pub fn compare_contracts(a: &Contract, b: &Contract) -> bool {
    compare_contract_terms(a, b)
        && a.renter_signature == b.renter_signature
        && a.provider_signature == b.provider_signature
}

pub fn compare_contract_terms(a: &Contract, b: &Contract) -> bool {
    a.id == b.id
        && a.renter_id == b.renter_id
        && a.provider_id == b.provider_id
        && a.storage_space == b.storage_space
}
