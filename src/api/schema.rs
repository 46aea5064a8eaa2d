use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::ledger::{Block, ChainFault, HashCommitment};

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain, oldest first
    pub chain: Vec<Block>,

    /// Whether the chain verifies
    pub is_valid: bool,
}

/// Response for endpoints that append a block
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BlockResponse {
    pub success: bool,

    /// The newly mined block
    pub block: Block,
}

/// Response for the audit trail endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct AuditTrailResponse {
    /// Matching audit-log blocks, oldest first
    pub audit_logs: Vec<Block>,
    pub count: usize,
}

/// Response for the verify endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct VerifyResponse {
    pub is_valid: bool,
    pub chain_length: usize,

    /// Where verification stopped, absent when the chain is valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<ChainFault>,
}

/// Response for the commitment endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CommitmentResponse {
    pub success: bool,
    pub proof: HashCommitment,
}

/// Request for the commitment check endpoint
///
/// Exactly one of `expected_hash` and `payload` should be given; when both
/// are, both must match.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct VerifyCommitmentRequest {
    pub proof: HashCommitment,

    #[serde(default)]
    pub expected_hash: Option<String>,

    /// Payload to recompute the digest from
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<Value>,
}

/// Response for the commitment check endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct VerifyCommitmentResponse {
    pub valid: bool,
}
