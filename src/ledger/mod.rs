// Ledger module
//
// This module contains the hash-chained audit ledger:
// - Block structure, canonical hashing and proof of work
// - Ledger (chain) with append, verification and chain info
// - Typed audit-log and data-integrity records
// - Hash commitments and encrypted audit entries

pub mod audit;
pub mod block;
pub mod chain;
pub mod commitment;

// Re-export main components for easier access
pub use audit::{AuditEntry, AuditTrailFilter, IntegrityRecord, PayloadError};
pub use block::{Block, CancelFlag, MiningBudget, MiningError, Payload};
pub use chain::{ChainFault, ChainInfo, ChainSnapshot, ChainStatus, FaultKind, Ledger, LedgerError};
pub use commitment::{EncryptedAudit, HashCommitment, PrivacyLedger};
