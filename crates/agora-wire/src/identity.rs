//! Agent identity: secp256k1 keypairs and their bech32 addresses.
//!
//! The scheme:
//! 1. Address = bech32(`agent`, `0x00 ‖ SHA-256(compressed public key)`).
//! 2. Signatures are recoverable ECDSA over a SHA-256 digest, encoded as
//!    bech32(`sig`, `r ‖ s ‖ recovery_id`).
//! 3. Verification recovers the public key from the signature, re-derives
//!    the address and compares it with the claimed sender. Only the address
//!    travels on the wire.
//!
//! Seed derivation is `SHA-256(lp("agent") ‖ lp(seed) ‖ lp(index))` where
//! `lp` is an 8-byte big-endian length prefix, so any implementation can
//! reproduce the same key from the same seed phrase.

use bech32::{Bech32, Hrp};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Human-readable prefix of agent addresses.
pub const ADDRESS_PREFIX: &str = "agent";

/// Human-readable prefix of encoded signatures.
pub const SIGNATURE_PREFIX: &str = "sig";

/// Address version byte. Zero keeps every address starting with `agent1q`.
const ADDRESS_VERSION: u8 = 0x00;

/// Domain separator mixed into seed derivation.
const SEED_DOMAIN: &str = "agent";

/// Errors from key handling and signature encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("malformed signature: {0}")]
    InvalidSignature(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl From<IdentityError> for agora_types::error::AgoraError {
    fn from(e: IdentityError) -> Self {
        agora_types::error::AgoraError::Identity(e.to_string())
    }
}

/// An agent's keypair and derived address.
#[derive(Clone)]
pub struct Identity {
    secret: SecretKey,
    public: PublicKey,
    address: String,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let secret = SecretKey::new(&mut rng);
        Self::from_secret(secret)
    }

    /// Derive an identity deterministically from a seed phrase and index.
    pub fn from_seed(seed: &str, index: u32) -> Result<Self, IdentityError> {
        let key = derive_key_from_seed(seed, SEED_DOMAIN, index);
        let secret = SecretKey::from_slice(&key)
            .map_err(|e| IdentityError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self::from_secret(secret))
    }

    /// Load an identity from a hex-encoded 32-byte private key.
    pub fn from_private_key(hex_key: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| IdentityError::InvalidPrivateKey(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(IdentityError::InvalidPrivateKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| IdentityError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        let address = address_from_public_key(&public);
        Self {
            secret,
            public,
            address,
        }
    }

    /// The agent address (`agent1q...`).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Compressed public key, hex-encoded.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }

    /// Private key, hex-encoded.
    ///
    /// WARNING: sensitive. Only for persisting the key.
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret.secret_bytes())
    }

    /// Sign arbitrary data (hashed with SHA-256 first).
    pub fn sign(&self, data: &[u8]) -> String {
        let digest: [u8; 32] = Sha256::digest(data).into();
        self.sign_digest(&digest)
    }

    /// Sign a precomputed 32-byte digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> String {
        let msg = Message::from_digest(*digest);
        let sig = SECP256K1.sign_ecdsa_recoverable(&msg, &self.secret);
        encode_signature(&sig)
    }

    /// Check that `signature` over `digest` was produced by the key behind
    /// `address`.
    ///
    /// Returns `Ok(false)` for a well-formed signature from another key, and
    /// an error when the signature cannot be decoded at all.
    pub fn verify_digest(
        address: &str,
        digest: &[u8; 32],
        signature: &str,
    ) -> Result<bool, IdentityError> {
        let sig = decode_signature(signature)?;
        let msg = Message::from_digest(*digest);
        match SECP256K1.recover_ecdsa(&msg, &sig) {
            Ok(public) => Ok(address_from_public_key(&public) == address),
            Err(_) => Ok(false),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Derive the address for a public key.
pub fn address_from_public_key(public: &PublicKey) -> String {
    let mut data = Vec::with_capacity(33);
    data.push(ADDRESS_VERSION);
    data.extend_from_slice(&Sha256::digest(public.serialize()));
    // The prefix is a constant valid HRP and the payload is far below the
    // checksum length limit, so encoding cannot fail.
    let hrp = Hrp::parse_unchecked(ADDRESS_PREFIX);
    bech32::encode::<Bech32>(hrp, &data).unwrap_or_default()
}

/// Whether `s` is a well-formed agent address.
pub fn is_valid_address(s: &str) -> bool {
    parse_address(s).is_ok()
}

/// Decode an address into its version byte and key hash.
pub fn parse_address(s: &str) -> Result<(u8, [u8; 32]), IdentityError> {
    let (hrp, data) =
        bech32::decode(s).map_err(|e| IdentityError::InvalidAddress(e.to_string()))?;
    if hrp.as_str() != ADDRESS_PREFIX {
        return Err(IdentityError::InvalidAddress(format!(
            "expected prefix {ADDRESS_PREFIX}, got {hrp}"
        )));
    }
    if data.len() != 33 {
        return Err(IdentityError::InvalidAddress(format!(
            "expected 33 data bytes, got {}",
            data.len()
        )));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&data[1..]);
    Ok((data[0], hash))
}

fn encode_signature(sig: &RecoverableSignature) -> String {
    let (rec_id, compact) = sig.serialize_compact();
    let mut data = Vec::with_capacity(65);
    data.extend_from_slice(&compact);
    data.push(rec_id.to_i32() as u8);
    let hrp = Hrp::parse_unchecked(SIGNATURE_PREFIX);
    bech32::encode::<Bech32>(hrp, &data).unwrap_or_default()
}

fn decode_signature(s: &str) -> Result<RecoverableSignature, IdentityError> {
    let (hrp, data) =
        bech32::decode(s).map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
    if hrp.as_str() != SIGNATURE_PREFIX {
        return Err(IdentityError::InvalidSignature(format!(
            "expected prefix {SIGNATURE_PREFIX}, got {hrp}"
        )));
    }
    if data.len() != 65 {
        return Err(IdentityError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            data.len()
        )));
    }
    let rec_id = RecoveryId::from_i32(data[64] as i32)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
    RecoverableSignature::from_compact(&data[..64], rec_id)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))
}

/// Length-prefix a byte string with its 8-byte big-endian length.
pub(crate) fn length_prefixed(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u64).to_be_bytes());
    out.extend_from_slice(data);
}

fn derive_key_from_seed(seed: &str, domain: &str, index: u32) -> [u8; 32] {
    let mut buf = Vec::new();
    length_prefixed(&mut buf, domain.as_bytes());
    length_prefixed(&mut buf, seed.as_bytes());
    length_prefixed(&mut buf, &u64::from(index).to_be_bytes());
    Sha256::digest(&buf).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_seed_is_deterministic() {
        let a = Identity::from_seed("alice recovery phrase", 0).unwrap();
        let b = Identity::from_seed("alice recovery phrase", 0).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.private_key_hex(), b.private_key_hex());
    }

    #[test]
    fn test_seed_index_changes_key() {
        let a = Identity::from_seed("alice recovery phrase", 0).unwrap();
        let b = Identity::from_seed("alice recovery phrase", 1).unwrap();
        let c = Identity::from_seed("bob recovery phrase", 0).unwrap();
        assert_ne!(a.address(), b.address());
        assert_ne!(a.address(), c.address());
    }

    #[test]
    fn test_address_format() {
        let id = Identity::generate();
        assert!(id.address().starts_with("agent1q"), "{}", id.address());
        assert!(is_valid_address(id.address()));
        let (version, _) = parse_address(id.address()).unwrap();
        assert_eq!(version, 0);
    }

    #[test]
    fn test_private_key_roundtrip() {
        let id = Identity::generate();
        let restored = Identity::from_private_key(&id.private_key_hex()).unwrap();
        assert_eq!(id.address(), restored.address());
        assert_eq!(id.public_key_hex(), restored.public_key_hex());
    }

    #[test]
    fn test_from_private_key_rejects_garbage() {
        assert!(matches!(
            Identity::from_private_key("zz"),
            Err(IdentityError::InvalidPrivateKey(_))
        ));
        assert!(matches!(
            Identity::from_private_key("abcd"),
            Err(IdentityError::InvalidPrivateKey(_))
        ));
        // Zero is not a valid secp256k1 scalar.
        assert!(Identity::from_private_key(&"00".repeat(32)).is_err());
    }

    #[test]
    fn test_sign_and_verify_digest() {
        let id = Identity::from_seed("signer", 0).unwrap();
        let digest: [u8; 32] = Sha256::digest(b"hello").into();
        let sig = id.sign_digest(&digest);
        assert!(sig.starts_with("sig1"));
        assert!(Identity::verify_digest(id.address(), &digest, &sig).unwrap());
        // `sign` hashes first, so it agrees with sign_digest over the hash.
        assert!(Identity::verify_digest(id.address(), &digest, &id.sign(b"hello")).unwrap());
    }

    #[test]
    fn test_verify_wrong_address_or_digest() {
        let id = Identity::generate();
        let other = Identity::generate();
        let digest: [u8; 32] = Sha256::digest(b"payload").into();
        let sig = id.sign_digest(&digest);

        assert!(!Identity::verify_digest(other.address(), &digest, &sig).unwrap());

        let tampered: [u8; 32] = Sha256::digest(b"payload!").into();
        assert!(!Identity::verify_digest(id.address(), &tampered, &sig).unwrap());
    }

    #[test]
    fn test_verify_malformed_signature() {
        let id = Identity::generate();
        let digest = [7u8; 32];
        assert!(matches!(
            Identity::verify_digest(id.address(), &digest, "not-a-signature"),
            Err(IdentityError::InvalidSignature(_))
        ));
        // An address is valid bech32 but carries the wrong prefix.
        assert!(matches!(
            Identity::verify_digest(id.address(), &digest, id.address()),
            Err(IdentityError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let id = Identity::generate();
        let rendered = format!("{id:?}");
        assert!(rendered.contains(id.address()));
        assert!(!rendered.contains(&id.private_key_hex()));
    }
}
