use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sled::{Db, Tree};
use tracing::debug;

use edge_ledger::Block;

use crate::error::StoreError;

/// Per-block analytics captured at append time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetricsRow {
    pub block_index: u64,
    pub created_timestamp: f64,
    pub block_interval: f64,
    pub consensus_time: f64,
    pub power_usage: f64,
}

/// Lifecycle timestamps of one transaction: when this node first saw it and
/// when it landed in a block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxLifecycleRow {
    pub tx_hash: String,
    pub received_timestamp: Option<f64>,
    pub included_timestamp: Option<f64>,
    pub block_index: Option<u64>,
}

/// A committed transaction as indexed for querying, with the well-known
/// fields lifted out of the opaque record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx_hash: String,
    pub block_index: u64,
    pub tx_type: String,
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    pub timestamp: f64,
    pub tx_data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionStats {
    pub total_transactions: u64,
    pub by_type: BTreeMap<String, u64>,
}

/// The node's persistent store, backed by sled.
///
/// One tree per logical table:
///
/// | Tree                    | Key                     | Value                |
/// |-------------------------|-------------------------|----------------------|
/// | `blocks`                | block index (8B BE)     | block wire JSON      |
/// | `transactions`          | tx hash (hex bytes)     | [`TxRecord`] JSON    |
/// | `block_txs`             | index (8B BE) ‖ tx hash | empty                |
/// | `block_metrics`         | block index (8B BE)     | [`BlockMetricsRow`]  |
/// | `transaction_lifecycle` | tx hash (hex bytes)     | [`TxLifecycleRow`]   |
///
/// Numeric keys are big-endian so sled's lexicographic order matches block
/// order and range scans walk the chain naturally.  Every write path flushes
/// before returning, which is what lets callers treat a returned `Ok` as an
/// acknowledgment.
#[derive(Debug, Clone)]
pub struct Store {
    db: Db,
    blocks: Tree,
    transactions: Tree,
    block_txs: Tree,
    block_metrics: Tree,
    tx_lifecycle: Tree,
}

fn index_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

impl Store {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// An in-memory store that disappears on drop.  For tests.
    pub fn open_temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        Ok(Self {
            blocks: db.open_tree("blocks")?,
            transactions: db.open_tree("transactions")?,
            block_txs: db.open_tree("block_txs")?,
            block_metrics: db.open_tree("block_metrics")?,
            tx_lifecycle: db.open_tree("transaction_lifecycle")?,
            db,
        })
    }

    // ── Blocks ──────────────────────────────────────────────────────────────

    /// Upsert `block` by index, index each of its transactions, and stamp
    /// their lifecycle rows as included.  Flushed before returning.
    pub fn save_block(&self, block: &Block) -> Result<(), StoreError> {
        let wire = serde_json::to_vec(&block.to_wire()?)?;
        self.blocks.insert(index_key(block.index), wire)?;

        for tx in &block.transactions {
            let tx_hash = tx.hash_hex()?;

            let record = TxRecord {
                tx_hash: tx_hash.clone(),
                block_index: block.index,
                tx_type: tx.tx_type().unwrap_or("transfer").to_string(),
                sender: tx
                    .get("sender")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                recipient: tx
                    .get("recipient")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                amount: tx.get("amount").and_then(Value::as_f64).unwrap_or(0.0),
                timestamp: tx.timestamp().unwrap_or(block.timestamp),
                tx_data: tx.clone().into_value(),
            };
            self.transactions
                .insert(tx_hash.as_bytes(), serde_json::to_vec(&record)?)?;

            let mut composite = index_key(block.index).to_vec();
            composite.extend_from_slice(tx_hash.as_bytes());
            self.block_txs.insert(composite, vec![])?;

            self.mark_tx_included(&tx_hash, record.timestamp, block.timestamp, block.index)?;
        }

        self.db.flush()?;
        debug!(index = block.index, "block persisted");
        Ok(())
    }

    /// Retrieve a block by index.  Missing blocks are `Ok(None)`.
    pub fn block(&self, index: u64) -> Result<Option<Block>, StoreError> {
        match self.blocks.get(index_key(index))? {
            Some(bytes) => Ok(Some(Block::from_wire(serde_json::from_slice(&bytes)?)?)),
            None => Ok(None),
        }
    }

    /// Blocks with `start <= index <= end`, ordered; `end == -1` means "to
    /// the tail".
    pub fn blocks(&self, start: u64, end: i64) -> Result<Vec<Block>, StoreError> {
        let mut out = Vec::new();
        for entry in self.blocks.range(index_key(start).to_vec()..) {
            let (key, bytes) = entry?;
            if end >= 0 {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&key);
                if u64::from_be_bytes(raw) > end as u64 {
                    break;
                }
            }
            out.push(Block::from_wire(serde_json::from_slice(&bytes)?)?);
        }
        Ok(out)
    }

    pub fn chain_length(&self) -> Result<u64, StoreError> {
        Ok(self.blocks.len() as u64)
    }

    pub fn latest_block(&self) -> Result<Option<Block>, StoreError> {
        match self.blocks.last()? {
            Some((_, bytes)) => Ok(Some(Block::from_wire(serde_json::from_slice(&bytes)?)?)),
            None => Ok(None),
        }
    }

    // ── Per-block analytics ─────────────────────────────────────────────────

    /// Upsert one block's analytics row.
    pub fn save_block_metrics(&self, row: &BlockMetricsRow) -> Result<(), StoreError> {
        self.block_metrics
            .insert(index_key(row.block_index), serde_json::to_vec(row)?)?;
        self.block_metrics.flush()?;
        Ok(())
    }

    /// All analytics rows ordered by block index.
    pub fn export_block_metrics(&self) -> Result<Vec<BlockMetricsRow>, StoreError> {
        self.block_metrics
            .iter()
            .map(|entry| {
                let (_, bytes) = entry?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }

    /// Total power drawn over all committed blocks.
    pub fn cumulative_energy(&self) -> Result<f64, StoreError> {
        Ok(self
            .export_block_metrics()?
            .iter()
            .map(|row| row.power_usage)
            .sum())
    }

    // ── Transaction lifecycle ───────────────────────────────────────────────

    /// Record when a transaction was first seen.  On conflict the earliest
    /// timestamp wins, so redelivered gossip never pushes first-seen forward.
    pub fn record_tx_received(&self, tx_hash: &str, received: f64) -> Result<(), StoreError> {
        let mut row = self
            .lifecycle_row(tx_hash)?
            .unwrap_or_else(|| TxLifecycleRow {
                tx_hash: tx_hash.to_string(),
                ..TxLifecycleRow::default()
            });

        row.received_timestamp = Some(match row.received_timestamp {
            Some(existing) => existing.min(received),
            None => received,
        });

        self.tx_lifecycle
            .insert(tx_hash.as_bytes(), serde_json::to_vec(&row)?)?;
        self.tx_lifecycle.flush()?;
        Ok(())
    }

    fn mark_tx_included(
        &self,
        tx_hash: &str,
        tx_timestamp: f64,
        included: f64,
        block_index: u64,
    ) -> Result<(), StoreError> {
        let mut row = self
            .lifecycle_row(tx_hash)?
            .unwrap_or_else(|| TxLifecycleRow {
                tx_hash: tx_hash.to_string(),
                ..TxLifecycleRow::default()
            });

        row.included_timestamp = Some(included);
        row.block_index = Some(block_index);
        // First-seen falls back to the transaction's own timestamp when the
        // receive path never saw it (e.g. blocks arriving via sync).
        row.received_timestamp = row.received_timestamp.or(Some(tx_timestamp));

        self.tx_lifecycle
            .insert(tx_hash.as_bytes(), serde_json::to_vec(&row)?)?;
        Ok(())
    }

    fn lifecycle_row(&self, tx_hash: &str) -> Result<Option<TxLifecycleRow>, StoreError> {
        match self.tx_lifecycle.get(tx_hash.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All lifecycle rows, ordered by inclusion time falling back to receive
    /// time.
    pub fn export_transaction_lifecycle(&self) -> Result<Vec<TxLifecycleRow>, StoreError> {
        let mut rows: Vec<TxLifecycleRow> = self
            .tx_lifecycle
            .iter()
            .map(|entry| {
                let (_, bytes) = entry?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect::<Result<_, StoreError>>()?;

        rows.sort_by(|a, b| {
            let key = |row: &TxLifecycleRow| {
                row.included_timestamp
                    .or(row.received_timestamp)
                    .unwrap_or(f64::MAX)
            };
            key(a).partial_cmp(&key(b)).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(rows)
    }

    // ── Transaction queries ─────────────────────────────────────────────────

    /// Look a committed transaction up by canonical hash.
    pub fn transaction(&self, tx_hash: &str) -> Result<Option<TxRecord>, StoreError> {
        match self.transactions.get(tx_hash.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All transactions committed by the block at `index`.
    pub fn transactions_in_block(&self, index: u64) -> Result<Vec<TxRecord>, StoreError> {
        let mut out = Vec::new();
        for entry in self.block_txs.scan_prefix(index_key(index)) {
            let (key, _) = entry?;
            let tx_hash = std::str::from_utf8(&key[8..]).unwrap_or_default();
            if let Some(record) = self.transaction(tx_hash)? {
                out.push(record);
            }
        }
        out.sort_by(|a, b| {
            a.timestamp
                .partial_cmp(&b.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(out)
    }

    /// Aggregate counts over the committed transaction index.
    pub fn transaction_stats(&self) -> Result<TransactionStats, StoreError> {
        let mut stats = TransactionStats::default();
        for entry in self.transactions.iter() {
            let (_, bytes) = entry?;
            let record: TxRecord = serde_json::from_slice(&bytes)?;
            stats.total_transactions += 1;
            *stats.by_type.entry(record.tx_type).or_insert(0) += 1;
        }
        Ok(stats)
    }
}
