//! Hash commitments over arbitrary payloads.
//!
//! A commitment is the SHA-256 of a payload's canonical encoding. Checking
//! one is plain digest equality, so the only guarantee is the collision
//! resistance of SHA-256. This is not a zero-knowledge proof: there is no
//! soundness or zero-knowledge property, and anyone holding the payload
//! can recompute the digest. The wire discriminant stays `"zk_proof"` for
//! existing clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::block::{canonical_digest, format_timestamp, Block, Payload};
use super::chain::{Ledger, LedgerError};

/// `type` field of a serialized commitment
pub const COMMITMENT_TYPE: &str = "zk_proof";

/// Payload `type` of encrypted audit entries
pub const ENCRYPTED_AUDIT_TYPE: &str = "encrypted_audit";

/// Digest binding a payload, created without touching the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HashCommitment {
    /// Hex SHA-256 of the canonical payload
    pub proof_hash: String,

    #[schema(value_type = String, example = "2024-01-01T12:00:00.123456Z")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "type")]
    #[schema(example = "zk_proof")]
    pub kind: String,
}

impl HashCommitment {
    /// Commits to `payload`; key order inside objects does not matter
    pub fn of(payload: &Value) -> Self {
        HashCommitment {
            proof_hash: canonical_digest(payload),
            created_at: Utc::now(),
            kind: COMMITMENT_TYPE.to_string(),
        }
    }

    /// True when the committed digest equals `expected_hash`
    pub fn verify(&self, expected_hash: &str) -> bool {
        self.proof_hash == expected_hash
    }

    /// Recomputes the digest of `payload` and compares it
    pub fn matches_payload(&self, payload: &Value) -> bool {
        self.verify(&canonical_digest(payload))
    }
}

/// Opaque ciphertext plus the user it belongs to
///
/// The ledger never sees plaintext; encryption happens before this point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EncryptedAudit {
    pub encrypted_data: String,
    pub user_id: String,
}

/// Commitment helpers bound to a ledger
///
/// Creating and checking commitments never mutates the chain; only
/// [`PrivacyLedger::append_encrypted_audit`] writes to it.
pub struct PrivacyLedger<'a> {
    ledger: &'a Ledger,
}

impl<'a> PrivacyLedger<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        PrivacyLedger { ledger }
    }

    pub fn create_commitment(&self, payload: &Value) -> HashCommitment {
        HashCommitment::of(payload)
    }

    pub fn verify_commitment(&self, commitment: &HashCommitment, expected_hash: &str) -> bool {
        commitment.verify(expected_hash)
    }

    /// Appends `ciphertext` as an `encrypted_audit` entry for `user_id`
    ///
    /// # Arguments
    ///
    /// * `ciphertext` - Already-encrypted data, stored as given
    /// * `user_id` - Owner of the entry
    ///
    /// # Returns
    ///
    /// The new block, or `LedgerError::Mining` if the ledger's budget ran out
    pub fn append_encrypted_audit(&self, ciphertext: &str, user_id: &str) -> Result<Block, LedgerError> {
        let mut payload = Payload::new();
        payload.insert("type".to_string(), Value::from(ENCRYPTED_AUDIT_TYPE));
        payload.insert("encrypted_data".to_string(), Value::from(ciphertext));
        payload.insert("user_id".to_string(), Value::from(user_id));
        payload.insert("timestamp".to_string(), Value::from(format_timestamp(Utc::now())));

        self.ledger.append_within(payload, self.ledger.mining_budget())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AuditTrailFilter, PayloadError};
    use serde_json::json;

    #[test]
    fn test_commitment_is_deterministic() {
        let first = HashCommitment::of(&json!({"patient": "p-1", "risk": 0.82, "tags": ["a", "b"]}));
        let second = HashCommitment::of(&json!({"tags": ["a", "b"], "risk": 0.82, "patient": "p-1"}));

        assert_eq!(first.proof_hash, second.proof_hash);
        assert_eq!(first.kind, COMMITMENT_TYPE);
        assert_eq!(first.proof_hash.len(), 64);
    }

    #[test]
    fn test_commitment_changes_with_any_value() {
        let base = HashCommitment::of(&json!({"patient": "p-1", "risk": 0.82}));

        assert_ne!(base.proof_hash, HashCommitment::of(&json!({"patient": "p-2", "risk": 0.82})).proof_hash);
        assert_ne!(base.proof_hash, HashCommitment::of(&json!({"patient": "p-1", "risk": 0.83})).proof_hash);
        assert_ne!(base.proof_hash, HashCommitment::of(&json!({"patient": "p-1"})).proof_hash);
    }

    #[test]
    fn test_verify_commitment() {
        let ledger = Ledger::with_difficulty(1).unwrap();
        let privacy = PrivacyLedger::new(&ledger);
        let payload = json!({"prediction": "high", "model": "v2"});

        let commitment = privacy.create_commitment(&payload);

        assert!(privacy.verify_commitment(&commitment, &commitment.proof_hash));
        assert!(!privacy.verify_commitment(&commitment, "00"));
        assert!(commitment.matches_payload(&json!({"model": "v2", "prediction": "high"})));
        assert!(!commitment.matches_payload(&json!({"model": "v3", "prediction": "high"})));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_serialized_commitment() {
        let commitment = HashCommitment::of(&json!({"a": 1}));
        let value = serde_json::to_value(&commitment).unwrap();

        assert_eq!(value["type"], "zk_proof");
        assert_eq!(value["proof_hash"], commitment.proof_hash.as_str());
        assert!(value["created_at"].is_string());
    }

    #[test]
    fn test_append_encrypted_audit() {
        let ledger = Ledger::with_difficulty(1).unwrap();
        let privacy = PrivacyLedger::new(&ledger);

        let block = privacy.append_encrypted_audit("b64:q83vEjRW", "alice").unwrap();

        assert_eq!(block.payload_type(), Some(ENCRYPTED_AUDIT_TYPE));
        assert_eq!(block.payload()["encrypted_data"], "b64:q83vEjRW");
        assert_eq!(block.payload()["user_id"], "alice");
        assert_eq!(ledger.len(), 2);
        assert!(ledger.verify());

        // Encrypted entries are not part of the plain audit trail
        assert!(ledger.audit_trail(&AuditTrailFilter::default().user("alice")).is_empty());
    }

    #[test]
    fn test_encrypted_audit_decodes_from_json() {
        let parsed: EncryptedAudit = serde_json::from_value(json!({"encrypted_data": "xyz", "user_id": "bob"})).unwrap();
        assert_eq!(parsed.user_id, "bob");

        let missing = serde_json::from_value::<EncryptedAudit>(json!({"user_id": "bob"})).unwrap_err();
        assert_eq!(
            PayloadError::from(missing),
            PayloadError::MissingField("encrypted_data".to_string())
        );
    }
}
