//! Proof that a request comes from a group's owner.
//!
//! The deletion endpoint historically accepted the owner's address itself as
//! `verificationSignature`, which proves nothing beyond knowing the address.
//! That form is still accepted for wire compatibility. Wallets that can sign
//! arbitrary messages send an Ed25519 signature over
//! [`delete_proof_message`] instead.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::address::{normalize, WalletAddress};
use crate::constants::{DELETE_PROOF_CONTEXT, SIGNATURE_SIZE};
use crate::error::MembershipError;

/// Which kind of proof was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipProof {
    /// The bare owner address. Weak.
    BareAddress,
    /// An Ed25519 signature by the owner key.
    Signed,
}

/// Message an owner signs to authorize deleting `group_id`.
pub fn delete_proof_message(group_id: &str) -> Vec<u8> {
    format!("{DELETE_PROOF_CONTEXT}{group_id}").into_bytes()
}

pub fn encode_proof(signature: &[u8]) -> String {
    bs58::encode(signature).into_string()
}

/// Check a deletion proof against the group's recorded owner.
pub fn verify_delete_proof(
    owner: &WalletAddress,
    group_id: &str,
    proof: &str,
) -> Result<OwnershipProof, MembershipError> {
    if let Ok(addr) = normalize(proof) {
        return if addr == *owner {
            Ok(OwnershipProof::BareAddress)
        } else {
            Err(MembershipError::NotOwner)
        };
    }

    let sig_bytes = bs58::decode(proof)
        .into_vec()
        .map_err(|_| MembershipError::NotOwner)?;
    let sig_bytes: [u8; SIGNATURE_SIZE] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| MembershipError::NotOwner)?;

    let Ok(verifying_key) = VerifyingKey::from_bytes(owner.as_bytes()) else {
        return Err(MembershipError::NotOwner);
    };
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(&delete_proof_message(group_id), &signature)
        .map(|_| OwnershipProof::Signed)
        .map_err(|_| MembershipError::NotOwner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn owner_of(key: &SigningKey) -> WalletAddress {
        WalletAddress::from_bytes(key.verifying_key().to_bytes())
    }

    #[test]
    fn bare_address_is_accepted_as_weak_proof() {
        let key = SigningKey::generate(&mut OsRng);
        let owner = owner_of(&key);
        assert_eq!(
            verify_delete_proof(&owner, "g1", &owner.to_base58()),
            Ok(OwnershipProof::BareAddress)
        );
    }

    #[test]
    fn other_address_is_rejected() {
        let owner = owner_of(&SigningKey::generate(&mut OsRng));
        let other = owner_of(&SigningKey::generate(&mut OsRng));
        assert_eq!(
            verify_delete_proof(&owner, "g1", &other.to_base58()),
            Err(MembershipError::NotOwner)
        );
    }

    #[test]
    fn signed_proof_verifies() {
        let key = SigningKey::generate(&mut OsRng);
        let owner = owner_of(&key);
        let sig = key.sign(&delete_proof_message("g1"));
        let proof = encode_proof(&sig.to_bytes());

        assert_eq!(verify_delete_proof(&owner, "g1", &proof), Ok(OwnershipProof::Signed));
        // Bound to the group id.
        assert_eq!(
            verify_delete_proof(&owner, "g2", &proof),
            Err(MembershipError::NotOwner)
        );
    }

    #[test]
    fn signature_from_wrong_key_fails() {
        let key = SigningKey::generate(&mut OsRng);
        let intruder = SigningKey::generate(&mut OsRng);
        let sig = intruder.sign(&delete_proof_message("g1"));
        assert!(verify_delete_proof(&owner_of(&key), "g1", &encode_proof(&sig.to_bytes())).is_err());
    }

    #[test]
    fn garbage_proof_fails() {
        let owner = owner_of(&SigningKey::generate(&mut OsRng));
        assert!(verify_delete_proof(&owner, "g1", "").is_err());
        assert!(verify_delete_proof(&owner, "g1", "not-a-proof").is_err());
    }
}
