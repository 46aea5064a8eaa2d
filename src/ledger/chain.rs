use std::fmt;
use std::time::Instant;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use super::block::{Block, MiningBudget, MiningError, Payload, GENESIS_PREVIOUS_HASH};

/// Difficulty used when none is configured
pub const DEFAULT_DIFFICULTY: usize = 2;

/// Payload `type` of the genesis block
pub const GENESIS_TYPE: &str = "genesis";

const GENESIS_MESSAGE: &str = "Audit Ledger Initialized";
const GENESIS_VERSION: &str = "1.0.0";

/// Errors that can occur while creating or appending to the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Difficulty must be at least 1")]
    ZeroDifficulty,

    #[error(transparent)]
    Mining(#[from] MiningError),
}

/// What was wrong with the block at which verification stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The stored hash no longer matches the block's contents
    HashMismatch,

    /// `previous_hash` does not match the preceding block's hash
    BrokenLink,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::HashMismatch => write!(f, "hash does not match contents"),
            FaultKind::BrokenLink => write!(f, "previous hash does not match preceding block"),
        }
    }
}

/// First integrity failure found in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize, ToSchema)]
#[error("block {index}: {kind}")]
pub struct ChainFault {
    pub index: usize,
    pub kind: FaultKind,
}

/// Snapshot of the ledger's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChainInfo {
    pub chain_length: usize,
    pub is_valid: bool,
    pub latest_hash: String,
    pub difficulty: usize,
}

/// Copy of the chain together with its verification result
///
/// Both fields come from the same read of the chain.
#[derive(Debug, Clone)]
pub struct ChainSnapshot {
    pub blocks: Vec<Block>,
    pub fault: Option<ChainFault>,
}

/// Length and verification result read together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStatus {
    pub chain_length: usize,
    pub fault: Option<ChainFault>,
}

/// Append-only, hash-linked sequence of blocks
///
/// Always holds at least the genesis block. Appends are serialized by
/// `append_guard`; mining happens outside the `blocks` lock and the
/// finished block is pushed in one write, so readers only ever see whole
/// blocks.
#[derive(Debug)]
pub struct Ledger {
    blocks: RwLock<Vec<Block>>,

    append_guard: Mutex<()>,

    /// Number of leading hex zeros required in a mined hash
    difficulty: usize,

    /// Budget used by the typed record helpers
    mining_budget: MiningBudget,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Creates a ledger at the default difficulty
    pub fn new() -> Self {
        Self::create(DEFAULT_DIFFICULTY)
    }

    /// Creates a ledger holding only its genesis block
    ///
    /// Expected mining cost per append is about `16^difficulty` hashes.
    ///
    /// # Arguments
    ///
    /// * `difficulty` - Number of leading hex zeros every appended block's hash must have
    ///
    /// # Returns
    ///
    /// The new ledger, or `LedgerError::ZeroDifficulty` if `difficulty` is 0
    pub fn with_difficulty(difficulty: usize) -> Result<Self, LedgerError> {
        if difficulty == 0 {
            return Err(LedgerError::ZeroDifficulty);
        }

        Ok(Self::create(difficulty))
    }

    /// Callers guarantee `difficulty > 0`
    fn create(difficulty: usize) -> Self {
        let genesis = Self::genesis_block();
        info!("Created genesis block {} (difficulty {})", genesis.hash(), difficulty);

        Ledger {
            blocks: RwLock::new(vec![genesis]),
            append_guard: Mutex::new(()),
            difficulty,
            mining_budget: MiningBudget::unbounded(),
        }
    }

    /// Sets the budget applied to appends made through the record helpers
    pub fn with_mining_budget(mut self, budget: MiningBudget) -> Self {
        self.mining_budget = budget;
        self
    }

    /// The genesis block is not mined; verification never checks proof of work
    fn genesis_block() -> Block {
        let mut payload = Payload::new();
        payload.insert("type".to_string(), Value::from(GENESIS_TYPE));
        payload.insert("message".to_string(), Value::from(GENESIS_MESSAGE));
        payload.insert("version".to_string(), Value::from(GENESIS_VERSION));

        Block::new(payload, GENESIS_PREVIOUS_HASH)
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn mining_budget(&self) -> &MiningBudget {
        &self.mining_budget
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Gets the last block in the chain
    pub fn latest(&self) -> Block {
        let blocks = self.blocks.read();
        blocks.last().expect("ledger always holds its genesis block").clone()
    }

    /// Gets a copy of every block, oldest first
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.read().clone()
    }

    /// Mines `payload` onto the end of the chain and returns the new block
    ///
    /// Blocks the calling thread until proof of work is found.
    ///
    /// # Arguments
    ///
    /// * `payload` - Contents of the new block
    ///
    /// # Returns
    ///
    /// A copy of the block as it was appended
    pub fn append(&self, payload: Payload) -> Block {
        let _guard = self.append_guard.lock();
        let started = Instant::now();

        let mut block = Block::new(payload, self.latest().hash());
        let attempts = block.mine(self.difficulty);

        self.push(block, attempts, started)
    }

    /// Like [`Ledger::append`], but gives up when `budget` runs out
    ///
    /// # Arguments
    ///
    /// * `payload` - Contents of the new block
    /// * `budget` - Timeout and/or cancel flag for the proof-of-work search
    ///
    /// # Returns
    ///
    /// The appended block, or `LedgerError::Mining` when the budget ran out.
    /// The chain is left unchanged on error.
    pub fn append_within(&self, payload: Payload, budget: &MiningBudget) -> Result<Block, LedgerError> {
        let _guard = self.append_guard.lock();
        let started = Instant::now();

        let mut block = Block::new(payload, self.latest().hash());
        let attempts = block.mine_within(self.difficulty, budget).map_err(|err| {
            warn!("Discarding block at index {}: {}", self.len(), err);
            err
        })?;

        Ok(self.push(block, attempts, started))
    }

    /// Only called with `append_guard` held
    fn push(&self, block: Block, attempts: u64, started: Instant) -> Block {
        let mut blocks = self.blocks.write();
        blocks.push(block.clone());

        info!("Appended block {} with hash {}", blocks.len() - 1, block.hash());
        debug!(
            "Mined block {} in {} attempts ({:?}), nonce {}",
            blocks.len() - 1,
            attempts,
            started.elapsed(),
            block.nonce()
        );

        block
    }

    /// True when every block matches its hash and links to its predecessor
    pub fn verify(&self) -> bool {
        self.verify_detailed().is_ok()
    }

    /// Checks each block from index 1 against its own hash and its predecessor
    ///
    /// Stops at the first failure. Proof of work is not re-checked.
    ///
    /// # Returns
    ///
    /// `Ok(())` for an intact chain, otherwise the index and kind of the first fault
    pub fn verify_detailed(&self) -> Result<(), ChainFault> {
        check_links(&self.blocks.read())
    }

    /// Gets every block and the chain's verification result under one read lock
    pub fn snapshot(&self) -> ChainSnapshot {
        let blocks = self.blocks.read();
        let fault = check_links(&blocks).err();

        ChainSnapshot {
            blocks: blocks.clone(),
            fault,
        }
    }

    /// Gets the chain length and verification result under one read lock
    pub fn status(&self) -> ChainStatus {
        let blocks = self.blocks.read();

        ChainStatus {
            chain_length: blocks.len(),
            fault: check_links(&blocks).err(),
        }
    }

    /// Gets length, validity, latest hash and difficulty from one snapshot
    ///
    /// Validity is recomputed on every call, which walks the whole chain.
    pub fn info(&self) -> ChainInfo {
        let blocks = self.blocks.read();

        ChainInfo {
            chain_length: blocks.len(),
            is_valid: check_links(&blocks).is_ok(),
            latest_hash: blocks.last().map(|block| block.hash().to_string()).unwrap_or_default(),
            difficulty: self.difficulty,
        }
    }

    #[cfg(test)]
    pub(crate) fn tamper<F: FnOnce(&mut Block)>(&self, index: usize, f: F) {
        f(&mut self.blocks.write()[index]);
    }
}

fn check_links(blocks: &[Block]) -> Result<(), ChainFault> {
    for (index, pair) in blocks.windows(2).enumerate() {
        let (previous, current) = (&pair[0], &pair[1]);

        let kind = if !current.is_self_consistent() {
            FaultKind::HashMismatch
        } else if current.previous_hash() != previous.hash() {
            FaultKind::BrokenLink
        } else {
            continue;
        };

        let fault = ChainFault { index: index + 1, kind };
        warn!("Chain verification failed: {}", fault);
        return Err(fault);
    }

    Ok(())
}
