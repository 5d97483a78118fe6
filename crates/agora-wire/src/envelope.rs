//! The signed envelope carried between agents.
//!
//! Envelopes travel as JSON objects over `POST /submit`. The payload is the
//! JSON encoding of a model, base64-encoded so the envelope stays a flat
//! string map on the wire.
//!
//! ## Signed fields
//!
//! The signature covers, in this order: `version`, `sender`, `target`,
//! `session`, `schema_digest`, `protocol_digest`, the decoded `payload`
//! bytes, `expires` and `nonce`. Strings and byte strings are prefixed with
//! their 8-byte big-endian length; optional fields are preceded by a
//! presence byte (`0` absent, `1` present); integers are 8-byte big-endian.
//! The protocol digest is part of the signed set so a relay cannot move a
//! message into a different dialogue.

use crate::identity::{length_prefixed, Identity, IdentityError};
use agora_types::error::AgoraError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

/// Maximum accepted size of an encoded envelope (16 MB).
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

/// Errors produced while building, signing or checking an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope is not signed")]
    MissingSignature,
    #[error("signature does not match sender")]
    InvalidSignature,
    #[error("envelope expired at {expires} (now {now})")]
    Expired { expires: u64, now: u64 },
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u32),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("envelope too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

impl From<IdentityError> for EnvelopeError {
    fn from(_: IdentityError) -> Self {
        EnvelopeError::InvalidSignature
    }
}

impl From<EnvelopeError> for AgoraError {
    fn from(e: EnvelopeError) -> Self {
        AgoraError::Envelope(e.to_string())
    }
}

/// One message between two agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope format version.
    pub version: u32,
    /// Sender agent address.
    pub sender: String,
    /// Target agent address.
    pub target: String,
    /// Session shared by every envelope of one exchange.
    pub session: Uuid,
    /// Digest of the payload's model.
    pub schema_digest: String,
    /// Digest of the protocol the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_digest: Option<String>,
    /// Base64 of the JSON-encoded model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Unix seconds after which the envelope is void.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
    /// Per-sender increasing counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    /// bech32 recoverable signature over [`Envelope::digest`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Envelope {
    /// Create an unsigned envelope with no payload.
    pub fn new(
        sender: impl Into<String>,
        target: impl Into<String>,
        session: Uuid,
        schema_digest: impl Into<String>,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            sender: sender.into(),
            target: target.into(),
            session,
            schema_digest: schema_digest.into(),
            protocol_digest: None,
            payload: None,
            expires: None,
            nonce: None,
            signature: None,
        }
    }

    /// Serialize `value` to JSON and store it as the payload.
    pub fn encode_payload<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), EnvelopeError> {
        let json =
            serde_json::to_vec(value).map_err(|e| EnvelopeError::MalformedPayload(e.to_string()))?;
        self.payload = Some(BASE64.encode(json));
        Ok(())
    }

    /// Raw JSON bytes of the payload, `None` when the envelope carries none.
    pub fn payload_bytes(&self) -> Result<Option<Vec<u8>>, EnvelopeError> {
        match &self.payload {
            None => Ok(None),
            Some(encoded) => BASE64
                .decode(encoded)
                .map(Some)
                .map_err(|e| EnvelopeError::MalformedPayload(e.to_string())),
        }
    }

    /// Decode the payload into a model. An absent payload yields `Ok(None)`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<Option<T>, EnvelopeError> {
        match self.payload_bytes()? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| EnvelopeError::MalformedPayload(e.to_string())),
        }
    }

    /// Canonical digest of the signed fields.
    pub fn digest(&self) -> Result<[u8; 32], EnvelopeError> {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&u64::from(self.version).to_be_bytes());
        length_prefixed(&mut buf, self.sender.as_bytes());
        length_prefixed(&mut buf, self.target.as_bytes());
        length_prefixed(&mut buf, self.session.to_string().as_bytes());
        length_prefixed(&mut buf, self.schema_digest.as_bytes());
        match &self.protocol_digest {
            Some(p) => {
                buf.push(1);
                length_prefixed(&mut buf, p.as_bytes());
            }
            None => buf.push(0),
        }
        match self.payload_bytes()? {
            Some(bytes) => {
                buf.push(1);
                length_prefixed(&mut buf, &bytes);
            }
            None => buf.push(0),
        }
        for value in [self.expires, self.nonce] {
            match value {
                Some(v) => {
                    buf.push(1);
                    buf.extend_from_slice(&v.to_be_bytes());
                }
                None => buf.push(0),
            }
        }
        Ok(Sha256::digest(&buf).into())
    }

    /// Sign the envelope in place. The identity must own the sender address.
    pub fn sign(&mut self, identity: &Identity) -> Result<(), EnvelopeError> {
        if identity.address() != self.sender {
            return Err(EnvelopeError::Malformed(format!(
                "identity {} cannot sign for sender {}",
                identity.address(),
                self.sender
            )));
        }
        let digest = self.digest()?;
        self.signature = Some(identity.sign_digest(&digest));
        Ok(())
    }

    /// Check the signature against the sender address.
    pub fn verify(&self) -> Result<(), EnvelopeError> {
        let signature = self
            .signature
            .as_deref()
            .ok_or(EnvelopeError::MissingSignature)?;
        let digest = self.digest()?;
        if Identity::verify_digest(&self.sender, &digest, signature)? {
            Ok(())
        } else {
            Err(EnvelopeError::InvalidSignature)
        }
    }

    /// Whether the expiry lies strictly before `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires, Some(expires) if now > expires)
    }

    /// Reject an envelope whose expiry has passed.
    pub fn check_expiry(&self, now: u64) -> Result<(), EnvelopeError> {
        match self.expires {
            Some(expires) if now > expires => Err(EnvelopeError::Expired { expires, now }),
            _ => Ok(()),
        }
    }

    /// Encode to the JSON wire form.
    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Decode from the JSON wire form, enforcing the size limit and version.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() > MAX_ENVELOPE_SIZE {
            return Err(EnvelopeError::TooLarge {
                size: bytes.len(),
                max: MAX_ENVELOPE_SIZE,
            });
        }
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
    struct Quote {
        symbol: String,
        price: f64,
        tags: Vec<String>,
    }

    fn signed_envelope(sender: &Identity) -> Envelope {
        let target = Identity::generate();
        let mut env = Envelope::new(
            sender.address(),
            target.address(),
            Uuid::new_v4(),
            agora_types::model::schema_digest::<Quote>(),
        );
        env.protocol_digest = Some("proto:abc".to_string());
        env.expires = Some(unix_now() + 60);
        env.nonce = Some(7);
        env.encode_payload(&Quote {
            symbol: "FET".to_string(),
            price: 1.25,
            tags: vec!["spot".to_string()],
        })
        .unwrap();
        env.sign(sender).unwrap();
        env
    }

    #[test]
    fn test_payload_roundtrip() {
        let quote = Quote {
            symbol: "ATOM".to_string(),
            price: 9.5,
            tags: vec![],
        };
        let mut env = Envelope::new("a", "b", Uuid::new_v4(), "model:x");
        env.encode_payload(&quote).unwrap();
        let decoded: Quote = env.decode_payload().unwrap().unwrap();
        assert_eq!(decoded, quote);
    }

    #[test]
    fn test_absent_payload_decodes_to_none() {
        let env = Envelope::new("a", "b", Uuid::new_v4(), "model:x");
        let decoded: Option<Quote> = env.decode_payload().unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_garbage_payload_is_error() {
        let mut env = Envelope::new("a", "b", Uuid::new_v4(), "model:x");
        env.payload = Some("%%%not base64%%%".to_string());
        assert!(matches!(
            env.decode_payload::<Quote>(),
            Err(EnvelopeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_sign_then_verify() {
        let sender = Identity::generate();
        let env = signed_envelope(&sender);
        assert!(env.verify().is_ok());
    }

    #[test]
    fn test_unsigned_fails_with_missing_signature() {
        let sender = Identity::generate();
        let mut env = signed_envelope(&sender);
        env.signature = None;
        assert!(matches!(env.verify(), Err(EnvelopeError::MissingSignature)));
    }

    #[test]
    fn test_mutating_any_signed_field_breaks_signature() {
        let sender = Identity::generate();
        let env = signed_envelope(&sender);
        let other = Identity::generate().address().to_string();

        let mutations: Vec<Box<dyn Fn(&mut Envelope)>> = vec![
            Box::new(|e: &mut Envelope| e.version += 1),
            Box::new(move |e: &mut Envelope| e.target = other.clone()),
            Box::new(|e: &mut Envelope| e.session = Uuid::new_v4()),
            Box::new(|e: &mut Envelope| e.schema_digest.push('0')),
            Box::new(|e: &mut Envelope| e.protocol_digest = Some("proto:other".to_string())),
            Box::new(|e: &mut Envelope| e.protocol_digest = None),
            Box::new(|e: &mut Envelope| {
                e.encode_payload(&serde_json::json!({"symbol": "X"})).unwrap()
            }),
            Box::new(|e: &mut Envelope| e.payload = None),
            Box::new(|e: &mut Envelope| e.expires = e.expires.map(|x| x + 1)),
            Box::new(|e: &mut Envelope| e.nonce = Some(8)),
        ];

        for (i, mutate) in mutations.iter().enumerate() {
            let mut tampered = env.clone();
            mutate(&mut tampered);
            assert!(
                matches!(tampered.verify(), Err(EnvelopeError::InvalidSignature)),
                "mutation {i} was not detected"
            );
        }
    }

    #[test]
    fn test_forged_sender_fails() {
        let sender = Identity::generate();
        let mut env = signed_envelope(&sender);
        env.sender = Identity::generate().address().to_string();
        assert!(matches!(env.verify(), Err(EnvelopeError::InvalidSignature)));
    }

    #[test]
    fn test_cannot_sign_for_someone_else() {
        let sender = Identity::generate();
        let mut env = Envelope::new("agent1qsomeoneelse", "b", Uuid::new_v4(), "model:x");
        assert!(matches!(
            env.sign(&sender),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_expiry() {
        let now = unix_now();
        let mut env = Envelope::new("a", "b", Uuid::new_v4(), "model:x");
        assert!(!env.is_expired(now));

        env.expires = Some(now - 1);
        assert!(env.is_expired(now));
        assert!(matches!(
            env.check_expiry(now),
            Err(EnvelopeError::Expired { .. })
        ));

        env.expires = Some(now + 10);
        assert!(env.check_expiry(now).is_ok());
    }

    #[test]
    fn test_json_wire_form() {
        let sender = Identity::generate();
        let env = signed_envelope(&sender);
        let bytes = env.to_json().unwrap();
        let decoded = Envelope::from_json(&bytes).unwrap();
        assert_eq!(decoded, env);
        assert!(decoded.verify().is_ok());

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["session"].is_string());
    }

    #[test]
    fn test_optional_fields_omitted_on_wire() {
        let env = Envelope::new("a", "b", Uuid::new_v4(), "model:x");
        let json = String::from_utf8(env.to_json().unwrap()).unwrap();
        assert!(!json.contains("signature"));
        assert!(!json.contains("payload"));
    }

    #[test]
    fn test_from_json_rejects_unknown_version() {
        let mut env = Envelope::new("a", "b", Uuid::new_v4(), "model:x");
        env.version = 99;
        let bytes = serde_json::to_vec(&env).unwrap();
        assert!(matches!(
            Envelope::from_json(&bytes),
            Err(EnvelopeError::UnsupportedVersion(99))
        ));
        assert!(matches!(
            Envelope::from_json(b"{not json"),
            Err(EnvelopeError::Malformed(_))
        ));
    }
}
