use actix_web::error::{BlockingError, InternalError, JsonPayloadError};
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use log::warn;
use serde_json::Value;

use super::schema::{
    AuditTrailResponse, BlockResponse, ChainResponse, CommitmentResponse, VerifyCommitmentRequest,
    VerifyCommitmentResponse, VerifyResponse,
};
use crate::ledger::{
    AuditEntry, AuditTrailFilter, Block, EncryptedAudit, IntegrityRecord, Ledger, LedgerError, PayloadError,
    PrivacyLedger,
};

/// Shared handle to the ledger owned by `main`
pub type LedgerData = web::Data<Ledger>;

/// Get chain information
///
/// Returns the chain length, validity, latest hash and difficulty
#[utoipa::path(
    get,
    path = "/api/blockchain/info",
    responses(
        (status = 200, description = "Chain information retrieved successfully", body = crate::ledger::ChainInfo)
    )
)]
pub async fn get_info(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.info())
}

/// Get the full chain
///
/// Returns every block and the chain's validity status
#[utoipa::path(
    get,
    path = "/api/blockchain/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    let snapshot = ledger.snapshot();

    let response = ChainResponse {
        length: snapshot.blocks.len(),
        is_valid: snapshot.fault.is_none(),
        chain: snapshot.blocks,
    };

    HttpResponse::Ok().json(response)
}

/// Record an audit log entry
///
/// Mines a new `audit_log` block
#[utoipa::path(
    post,
    path = "/api/blockchain/audit",
    request_body = AuditEntry,
    responses(
        (status = 200, description = "Audit log recorded", body = BlockResponse),
        (status = 400, description = "Missing or mistyped field"),
        (status = 503, description = "Mining exceeded its budget")
    )
)]
pub async fn add_audit_log(ledger: LedgerData, entry: web::Json<AuditEntry>) -> impl Responder {
    let entry = entry.into_inner();

    append_response(web::block(move || ledger.record_audit_log(entry)).await)
}

/// Get the audit trail
///
/// Returns audit log blocks, optionally filtered by user and resource
#[utoipa::path(
    get,
    path = "/api/blockchain/audit-trail",
    params(AuditTrailFilter),
    responses(
        (status = 200, description = "Audit trail retrieved successfully", body = AuditTrailResponse)
    )
)]
pub async fn get_audit_trail(ledger: LedgerData, filter: web::Query<AuditTrailFilter>) -> impl Responder {
    let audit_logs = ledger.audit_trail(&filter);

    HttpResponse::Ok().json(AuditTrailResponse {
        count: audit_logs.len(),
        audit_logs,
    })
}

/// Verify the chain
///
/// Checks every block's hash and link, reporting the first failure
#[utoipa::path(
    get,
    path = "/api/blockchain/verify",
    responses(
        (status = 200, description = "Chain verification result", body = VerifyResponse)
    )
)]
pub async fn verify_chain(ledger: LedgerData) -> impl Responder {
    let status = ledger.status();

    HttpResponse::Ok().json(VerifyResponse {
        is_valid: status.fault.is_none(),
        chain_length: status.chain_length,
        fault: status.fault,
    })
}

/// Record a data integrity hash
///
/// Mines a new `data_integrity` block
#[utoipa::path(
    post,
    path = "/api/blockchain/data-hash",
    request_body = IntegrityRecord,
    responses(
        (status = 200, description = "Data hash recorded", body = BlockResponse),
        (status = 400, description = "Missing or mistyped field"),
        (status = 503, description = "Mining exceeded its budget")
    )
)]
pub async fn add_data_hash(ledger: LedgerData, record: web::Json<IntegrityRecord>) -> impl Responder {
    let record = record.into_inner();

    append_response(web::block(move || ledger.record_data_hash(record)).await)
}

/// Create a hash commitment
///
/// Commits to an arbitrary JSON request body without touching the chain
#[utoipa::path(
    post,
    path = "/api/blockchain/zk-proof",
    responses(
        (status = 200, description = "Commitment created", body = CommitmentResponse)
    )
)]
pub async fn create_commitment(ledger: LedgerData, body: web::Json<Value>) -> impl Responder {
    let proof = PrivacyLedger::new(&ledger).create_commitment(&body);

    HttpResponse::Ok().json(CommitmentResponse { success: true, proof })
}

/// Check a hash commitment
///
/// Compares the commitment with an expected hash, a payload, or both
#[utoipa::path(
    post,
    path = "/api/blockchain/zk-proof/verify",
    request_body = VerifyCommitmentRequest,
    responses(
        (status = 200, description = "Commitment checked", body = VerifyCommitmentResponse),
        (status = 400, description = "Neither expected_hash nor payload given")
    )
)]
pub async fn verify_commitment(ledger: LedgerData, request: web::Json<VerifyCommitmentRequest>) -> impl Responder {
    let request = request.into_inner();
    let privacy = PrivacyLedger::new(&ledger);

    let valid = match (&request.expected_hash, &request.payload) {
        (None, None) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Either expected_hash or payload is required"
            }));
        }
        (expected_hash, payload) => {
            expected_hash
                .as_deref()
                .map_or(true, |hash| privacy.verify_commitment(&request.proof, hash))
                && payload.as_ref().map_or(true, |payload| request.proof.matches_payload(payload))
        }
    };

    HttpResponse::Ok().json(VerifyCommitmentResponse { valid })
}

/// Record an encrypted audit entry
///
/// Mines a new `encrypted_audit` block around pre-encrypted data
#[utoipa::path(
    post,
    path = "/api/blockchain/encrypted-audit",
    request_body = EncryptedAudit,
    responses(
        (status = 200, description = "Encrypted audit recorded", body = BlockResponse),
        (status = 400, description = "Missing or mistyped field"),
        (status = 503, description = "Mining exceeded its budget")
    )
)]
pub async fn add_encrypted_audit(ledger: LedgerData, audit: web::Json<EncryptedAudit>) -> impl Responder {
    let audit = audit.into_inner();

    append_response(
        web::block(move || {
            PrivacyLedger::new(&ledger).append_encrypted_audit(&audit.encrypted_data, &audit.user_id)
        })
        .await,
    )
}

/// Turns a rejected JSON body into a 400 `{"error": ...}` response
///
/// Registered through `web::JsonConfig` for every route in the API scope.
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let message = match &err {
        JsonPayloadError::Deserialize(inner) => PayloadError::from(inner).to_string(),
        other => other.to_string(),
    };
    warn!("Rejected request body: {}", message);

    let response = HttpResponse::BadRequest().json(serde_json::json!({
        "error": format!("Invalid payload: {}", message)
    }));
    InternalError::from_response(err, response).into()
}

fn append_response(result: Result<Result<Block, LedgerError>, BlockingError>) -> HttpResponse {
    match result {
        Ok(Ok(block)) => HttpResponse::Ok().json(BlockResponse { success: true, block }),
        Ok(Err(LedgerError::Mining(err))) => {
            warn!("Rejected append: {}", err);
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": format!("Failed to mine block: {}", err)
            }))
        }
        Ok(Err(err)) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to append block: {}", err)
        })),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Mining task failed: {}", err)
        })),
    }
}
