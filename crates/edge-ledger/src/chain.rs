use serde::{Deserialize, Serialize};

use crate::{block::Block, error::LedgerError};

/// The in-memory, append-only sequence of blocks held by one node.
///
/// Invariants maintained by [`Chain::try_append`]:
/// - Block indices and timestamps are strictly increasing.
/// - Every block's `previous_hash` equals the hash of the block before it.
///
/// The chain starts empty; the node seeds it with the genesis block or with
/// blocks replayed from the persistent store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a chain from already-ordered blocks (e.g. loaded from disk).
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The most recent block, if any.
    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Look a block up by its height.
    pub fn get(&self, index: u64) -> Option<&Block> {
        self.blocks.iter().find(|b| b.index == index)
    }

    /// All blocks with height >= `start`, in order.
    pub fn blocks_from(&self, start: u64) -> &[Block] {
        let pos = self.blocks.partition_point(|b| b.index < start);
        &self.blocks[pos..]
    }

    /// All blocks in the chain.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Whether a block with this header hash is already present.  Used to
    /// dedupe redelivered gossip.
    pub fn contains_hash(&self, hash: &str) -> bool {
        self.blocks.iter().any(|b| b.hash == hash)
    }

    /// Append `block` after checking structural continuity against the tip.
    ///
    /// On an empty chain any block is accepted (the caller decides what the
    /// first block is).  Otherwise the block must advance both index and
    /// timestamp and must link to the tip's hash; a racing appender that
    /// lost sees a mismatch here and drops its candidate.
    pub fn try_append(&mut self, block: Block) -> Result<&Block, LedgerError> {
        if let Some(tip) = self.tip() {
            if block.index <= tip.index {
                return Err(LedgerError::NonMonotonicIndex {
                    index: block.index,
                    tip_index: tip.index,
                });
            }
            if block.timestamp <= tip.timestamp {
                return Err(LedgerError::NonMonotonicTimestamp {
                    index: block.index,
                    timestamp: block.timestamp,
                    tip_timestamp: tip.timestamp,
                });
            }
            if block.previous_hash != tip.hash {
                return Err(LedgerError::PreviousHashMismatch { index: block.index });
            }
        }

        self.blocks.push(block);
        Ok(self.blocks.last().expect("just pushed"))
    }

    /// Re-validate the whole chain structure.
    pub fn is_valid(&self) -> bool {
        self.blocks.windows(2).all(|window| {
            let (prev, next) = (&window[0], &window[1]);
            next.previous_hash == prev.hash
                && next.index > prev.index
                && next.timestamp > prev.timestamp
        })
    }
}
