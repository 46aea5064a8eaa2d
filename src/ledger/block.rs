use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

/// Payload carried by a block: string keys mapped to JSON values
pub type Payload = Map<String, Value>;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// How many nonces are tried between two budget checks
const BUDGET_CHECK_INTERVAL: u64 = 1024;

/// Errors that stop a bounded mining run
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("Mining timed out after {attempts} attempts ({elapsed_ms} ms)")]
    TimedOut { attempts: u64, elapsed_ms: u128 },

    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },
}

/// Shared flag used to cancel an in-flight mining run from another thread
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Limits on how long a single proof-of-work search may run
///
/// The expected number of attempts for difficulty `d` is about `16^d`:
/// difficulty 2 needs ~256 hashes, difficulty 5 already ~1M. Nothing is
/// capped; the budget is how a caller keeps a misconfigured difficulty
/// from blocking it forever.
#[derive(Debug, Clone, Default)]
pub struct MiningBudget {
    timeout: Option<Duration>,
    cancel: Option<CancelFlag>,
}

impl MiningBudget {
    /// A budget that never stops the search
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn check(&self, started: Instant, attempts: u64) -> Result<(), MiningError> {
        if self.cancel.as_ref().map_or(false, CancelFlag::is_cancelled) {
            return Err(MiningError::Cancelled { attempts });
        }

        if let Some(timeout) = self.timeout {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(MiningError::TimedOut {
                    attempts,
                    elapsed_ms: elapsed.as_millis(),
                });
            }
        }

        Ok(())
    }
}

/// One entry of the ledger
///
/// Serializes to `{created_at, payload, previous_hash, hash, nonce}`.
/// The hash covers everything except itself, so a block can always be
/// checked against its own contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Time the block was constructed
    #[schema(value_type = String, example = "2024-01-01T12:00:00.123456Z")]
    created_at: DateTime<Utc>,

    /// Domain data, discriminated by its `type` key
    #[schema(value_type = Object)]
    payload: Payload,

    /// Hash of the previous block, `"0"` for genesis
    previous_hash: String,

    /// SHA-256 of the canonical encoding of the other fields
    hash: String,

    /// Proof-of-work counter
    nonce: u64,
}

impl Block {
    /// Creates a block with `nonce = 0` and its hash computed over that state
    ///
    /// # Arguments
    ///
    /// * `payload` - Domain data stored in the block
    /// * `previous_hash` - Hash of the block this one extends
    ///
    /// # Returns
    ///
    /// An unmined block stamped with the current time
    pub fn new(payload: Payload, previous_hash: impl Into<String>) -> Self {
        let mut block = Block {
            created_at: Utc::now(),
            payload,
            previous_hash: previous_hash.into(),
            hash: String::new(),
            nonce: 0,
        };

        block.hash = block.calculate_hash();
        block
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The payload's `type` discriminant, if it has a string one
    pub fn payload_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Recomputes the hash from the current field values
    pub fn calculate_hash(&self) -> String {
        HashPreimage::of(self).digest(self.nonce)
    }

    /// True when the stored hash matches the block's contents
    pub fn is_self_consistent(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    /// True when the stored hash has at least `difficulty` leading `'0'`s
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }

    /// Searches for a nonce whose hash has `difficulty` leading zeros
    ///
    /// Runs until it succeeds, roughly `16^difficulty` attempts. Returns the
    /// number of nonces tried. Use [`Block::mine_within`] to bound it.
    pub fn mine(&mut self, difficulty: usize) -> u64 {
        let preimage = HashPreimage::of(self);
        let mut attempts = 0;

        while !meets_difficulty(&self.hash, difficulty) {
            self.nonce += 1;
            self.hash = preimage.digest(self.nonce);
            attempts += 1;
        }

        attempts
    }

    /// Same search as [`Block::mine`], stopping early when the budget runs out
    ///
    /// # Arguments
    ///
    /// * `difficulty` - Number of leading hex zeros the hash must have
    /// * `budget` - Timeout and/or cancel flag, checked every 1024 attempts
    ///
    /// # Returns
    ///
    /// The number of nonces tried, or the `MiningError` that stopped the search.
    /// On error the block is left partially mined and must be discarded.
    pub fn mine_within(&mut self, difficulty: usize, budget: &MiningBudget) -> Result<u64, MiningError> {
        let preimage = HashPreimage::of(self);
        let started = Instant::now();
        let mut attempts = 0;

        while !meets_difficulty(&self.hash, difficulty) {
            if attempts % BUDGET_CHECK_INTERVAL == 0 {
                budget.check(started, attempts)?;
            }

            self.nonce += 1;
            self.hash = preimage.digest(self.nonce);
            attempts += 1;
        }

        Ok(attempts)
    }

    #[cfg(test)]
    pub(crate) fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    #[cfg(test)]
    pub(crate) fn relink(&mut self, previous_hash: &str) {
        self.previous_hash = previous_hash.to_string();
        self.nonce = 0;
        self.hash = self.calculate_hash();
    }

    #[cfg(test)]
    pub(crate) fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    #[cfg(test)]
    pub(crate) fn set_created_at(&mut self, created_at: DateTime<Utc>) {
        self.created_at = created_at;
    }

    #[cfg(test)]
    pub(crate) fn set_hash(&mut self, hash: &str) {
        self.hash = hash.to_string();
    }
}

/// Canonical text hashed for a block, split around the nonce
///
/// The canonical object has its keys sorted, so the nonce falls between
/// `created_at` and `payload`. Everything but the nonce is encoded once
/// per mining run.
struct HashPreimage {
    head: String,
    tail: String,
}

impl HashPreimage {
    fn of(block: &Block) -> Self {
        let created_at = Value::String(format_timestamp(block.created_at));
        let payload = canonicalize(&Value::Object(block.payload.clone()));
        let previous_hash = Value::String(block.previous_hash.clone());

        HashPreimage {
            head: format!("{{\"created_at\":{},\"nonce\":", created_at),
            tail: format!(",\"payload\":{},\"previous_hash\":{}}}", payload, previous_hash),
        }
    }

    fn digest(&self, nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.head.as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(self.tail.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Rebuilds a JSON value with every object's keys in sorted order
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with sorted keys
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Hex SHA-256 of the canonical encoding of `value`
pub fn canonical_digest(value: &Value) -> String {
    hex::encode(Sha256::digest(canonical_json(value).as_bytes()))
}

/// RFC 3339 in UTC, the same text serde writes for `DateTime<Utc>`
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
