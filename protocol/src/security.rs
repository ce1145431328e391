//! # Message Security Hooks
//!
//! Optional Ed25519 signing and verification for A2A envelopes. A signature
//! covers the BLAKE3 digest of the canonical payload — the fields a relay
//! must not alter: sender, target, method, params, id, timestamp, nonce.
//!
//! This module is a hook, not an identity system: key distribution,
//! rotation, and trust decisions belong to the embedding process. The
//! policy object only knows two things — whether enforcement is on, and
//! which peers are trusted enough to skip verification.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use tracing::warn;

use crate::card::AgentCard;
use crate::error::{A2aError, A2aResult};
use crate::message::Message;

// ---------------------------------------------------------------------------
// Canonical Digest
// ---------------------------------------------------------------------------

/// BLAKE3 digest of the fields a signature must pin down.
pub fn canonical_digest(message: &Message) -> [u8; 32] {
    // Field order is fixed; adding a field here is a wire-breaking change.
    let canonical = serde_json::json!({
        "jsonrpc": &message.jsonrpc,
        "id": &message.id,
        "method": &message.method,
        "params": &message.params,
        "from": &message.from,
        "to": &message.to,
        "messageType": &message.message_type,
        "timestamp": message.timestamp,
        "nonce": &message.nonce,
    });
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    *blake3::hash(&bytes).as_bytes()
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Holds the local signing key and stamps outbound messages.
pub struct MessageSigner {
    key: SigningKey,
}

impl MessageSigner {
    /// Generates a fresh keypair.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restores a signer from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// The hex-encoded public key to publish on the agent card.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    /// Signs `message` in place, setting its `signature` field.
    pub fn sign(&self, message: &mut Message) {
        let digest = canonical_digest(message);
        let signature = self.key.sign(&digest);
        message.signature = Some(hex::encode(signature.to_bytes()));
    }
}

/// Verifies a message signature against a hex-encoded public key.
pub fn verify_signature(message: &Message, public_key_hex: &str) -> A2aResult<()> {
    let signature_hex = message
        .signature
        .as_deref()
        .ok_or_else(|| A2aError::AuthenticationFailed("message is unsigned".into()))?;

    let key_bytes: [u8; 32] = hex::decode(public_key_hex)
        .map_err(|e| A2aError::AuthenticationFailed(format!("bad public key hex: {}", e)))?
        .try_into()
        .map_err(|_| A2aError::AuthenticationFailed("public key must be 32 bytes".into()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| A2aError::AuthenticationFailed(format!("invalid public key: {}", e)))?;

    let sig_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|e| A2aError::AuthenticationFailed(format!("bad signature hex: {}", e)))?
        .try_into()
        .map_err(|_| A2aError::AuthenticationFailed("signature must be 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    let digest = canonical_digest(message);
    key.verify(&digest, &signature)
        .map_err(|_| A2aError::AuthenticationFailed("signature verification failed".into()))
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Inbound verification policy: enforce signatures unless the sender is on
/// the trusted list.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    /// Whether verification is enforced at all.
    pub enabled: bool,
    /// Peers exempt from verification.
    pub trusted_agents: Vec<String>,
}

impl SecurityPolicy {
    /// Builds a policy from the configuration surface.
    pub fn new(enabled: bool, trusted_agents: Vec<String>) -> Self {
        Self {
            enabled,
            trusted_agents,
        }
    }

    /// Verifies an inbound message against the sender's card.
    ///
    /// Trusted peers bypass verification entirely. For everyone else the
    /// message must carry a valid signature over the canonical digest, and
    /// the sender's card must publish a public key.
    pub fn verify_inbound(&self, message: &Message, sender_card: Option<&AgentCard>) -> A2aResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.trusted_agents.iter().any(|t| *t == message.from) {
            return Ok(());
        }

        let public_key = sender_card
            .and_then(|card| card.metadata.public_key.as_deref())
            .ok_or_else(|| {
                warn!(from = %message.from, "no public key on record for signed-traffic peer");
                A2aError::AuthenticationFailed(format!(
                    "no public key on record for {}",
                    message.from
                ))
            })?;

        verify_signature(message, public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::AgentCard;
    use crate::message::Target;
    use semver::Version;

    fn signed_message(signer: &MessageSigner) -> Message {
        let mut msg = Message::request("a", Target::One("b".into()), "ping", serde_json::json!({}));
        signer.sign(&mut msg);
        msg
    }

    #[test]
    fn sign_verify_round_trip() {
        let signer = MessageSigner::generate();
        let msg = signed_message(&signer);
        assert!(verify_signature(&msg, &signer.public_key_hex()).is_ok());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let signer = MessageSigner::generate();
        let mut msg = signed_message(&signer);
        msg.params = Some(serde_json::json!({"tampered": true}));
        assert!(verify_signature(&msg, &signer.public_key_hex()).is_err());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let signer = MessageSigner::generate();
        let other = MessageSigner::generate();
        let msg = signed_message(&signer);
        assert!(verify_signature(&msg, &other.public_key_hex()).is_err());
    }

    #[test]
    fn unsigned_message_is_rejected() {
        let signer = MessageSigner::generate();
        let msg = Message::request("a", Target::One("b".into()), "ping", serde_json::json!({}));
        let err = verify_signature(&msg, &signer.public_key_hex()).unwrap_err();
        assert!(matches!(err, A2aError::AuthenticationFailed(_)));
    }

    #[test]
    fn policy_disabled_accepts_everything() {
        let policy = SecurityPolicy::default();
        let msg = Message::request("a", Target::One("b".into()), "ping", serde_json::json!({}));
        assert!(policy.verify_inbound(&msg, None).is_ok());
    }

    #[test]
    fn trusted_agents_bypass_verification() {
        let policy = SecurityPolicy::new(true, vec!["a".into()]);
        let msg = Message::request("a", Target::One("b".into()), "ping", serde_json::json!({}));
        assert!(policy.verify_inbound(&msg, None).is_ok());
    }

    #[test]
    fn enforced_policy_checks_card_key() {
        let signer = MessageSigner::generate();
        let policy = SecurityPolicy::new(true, vec![]);
        let msg = signed_message(&signer);

        let mut card = AgentCard::new("a", "a", Version::parse("1.0.0").unwrap());
        card.metadata.public_key = Some(signer.public_key_hex());
        assert!(policy.verify_inbound(&msg, Some(&card)).is_ok());

        // Unknown sender card: rejected.
        assert!(policy.verify_inbound(&msg, None).is_err());
    }

    #[test]
    fn seed_restores_the_same_identity() {
        let seed = [7u8; 32];
        let a = MessageSigner::from_seed(&seed);
        let b = MessageSigner::from_seed(&seed);
        assert_eq!(a.public_key_hex(), b.public_key_hex());
    }
}
