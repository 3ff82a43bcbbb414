use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use edge_dpos::DposEngine;
use edge_ledger::{genesis_block, stakes_from_genesis, verify_genesis, Block, Chain};
use edge_store::{BlockMetricsRow, Store};
use edge_transaction::{Transaction, ZERO_HASH};

use crate::{
    clock::unix_now,
    config::NodeConfig,
    error::NodeError,
    metrics::MetricsRegistry,
    sensor::EnergySensor,
};

/// The mutable state every duty shares, guarded as one unit so that tail
/// reads are consistent and appends are linearizable.
#[derive(Debug)]
pub struct SharedState {
    pub chain: Chain,
    pub pending: VecDeque<Transaction>,
    pub dpos: DposEngine,
    pub metrics: MetricsRegistry,
}

/// A consistent view of the chain tail: `(index, timestamp, hash)` taken
/// from one block.  `(-1, 0.0, ZERO_HASH)` for an empty chain.
pub fn tail_of(chain: &Chain) -> (i64, f64, String) {
    match chain.tip() {
        Some(tip) => (tip.index as i64, tip.timestamp, tip.hash.clone()),
        None => (-1, 0.0, ZERO_HASH.to_string()),
    }
}

/// Everything one node owns, threaded to every duty and HTTP handler.
pub struct NodeContext {
    pub config: NodeConfig,
    pub store: Store,
    pub sensor: Arc<dyn EnergySensor>,
    pub state: RwLock<SharedState>,
}

pub type SharedContext = Arc<NodeContext>;

impl NodeContext {
    /// Bring a node up: replay the chain from disk (or seal and persist the
    /// genesis block), seed the validator roster from the genesis stake
    /// distribution, and mark the configured validators live so the first
    /// election can happen before any heartbeat arrives.
    pub fn initialise(
        config: NodeConfig,
        store: Store,
        sensor: Arc<dyn EnergySensor>,
    ) -> Result<SharedContext, NodeError> {
        config.validate()?;

        let stored = store.blocks(0, -1)?;
        let mut chain = Chain::new();

        if stored.is_empty() {
            let genesis = genesis_block(&config.initial_stakes)?;
            store.save_block(&genesis)?;
            chain.try_append(genesis)?;
            info!("created and persisted the genesis block");
        } else {
            let count = stored.len();
            chain = Chain::from_blocks(stored);
            info!(blocks = count, "replayed chain from storage");
        }

        let genesis = chain
            .get(0)
            .ok_or_else(|| NodeError::Config("stored chain has no genesis block".into()))?;
        if !verify_genesis(genesis, &config.initial_stakes) {
            return Err(NodeError::Config(
                "genesis block does not match the configured stake table".into(),
            ));
        }
        let stakes = stakes_from_genesis(genesis).ok_or_else(|| {
            NodeError::Config("genesis block carries no stake distribution".into())
        })?;

        let now = unix_now();
        let mut dpos = DposEngine::new(config.dpos_config());
        let mut metrics = MetricsRegistry::new(&config.node_id);
        for (node_id, stake) in &stakes {
            dpos.add_validator(node_id, *stake);
            metrics.seed_liveness(node_id, now);
        }
        dpos.recompute_delegates(true, now);

        info!(
            node_id = %config.node_id,
            stake = dpos.stake_of(&config.node_id),
            chain_length = chain.len(),
            "node context initialised"
        );

        Ok(Arc::new(Self {
            config,
            store,
            sensor,
            state: RwLock::new(SharedState {
                chain,
                pending: VecDeque::new(),
                dpos,
                metrics,
            }),
        }))
    }

    /// Append `block` while already holding the state write lock.
    ///
    /// This is the single write path for the chain: it re-checks continuity
    /// against the tail (so a racing appender loses and drops its
    /// candidate), persists the block and its analytics row, updates the
    /// rolling histories, and takes a consensus checkpoint when the height
    /// lands on the interval.
    pub fn append_locked(
        &self,
        state: &mut SharedState,
        block: Block,
    ) -> Result<(), NodeError> {
        let (_, prev_timestamp, _) = tail_of(&state.chain);

        let interval = block.timestamp - prev_timestamp;
        let consensus_time = block
            .energy_metrics
            .get("consensus_time")
            .copied()
            .unwrap_or(0.0);
        let power_usage = block
            .energy_metrics
            .get("power_usage")
            .copied()
            .unwrap_or(0.0);

        let appended = state.chain.try_append(block)?.clone();

        self.store.save_block(&appended)?;
        self.store.save_block_metrics(&BlockMetricsRow {
            block_index: appended.index,
            created_timestamp: appended.timestamp,
            block_interval: interval,
            consensus_time,
            power_usage,
        })?;

        state.metrics.record_block_interval(interval);
        state.metrics.record_consensus_time(consensus_time);
        state.dpos.checkpoint(appended.index, unix_now());

        Ok(())
    }

    /// Lock-acquiring wrapper around [`Self::append_locked`].
    pub async fn append_block(&self, block: Block) -> Result<(), NodeError> {
        let mut state = self.state.write().await;
        self.append_locked(&mut state, block)
    }

    /// Current chain tail under a read lock.
    pub async fn tail(&self) -> (i64, f64, String) {
        let state = self.state.read().await;
        tail_of(&state.chain)
    }

    /// Chain length under a read lock.
    pub async fn chain_length(&self) -> u64 {
        self.state.read().await.chain.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::sensor::{EnergyReading, FixedSensor};

    use super::*;

    fn test_config() -> NodeConfig {
        NodeConfig {
            node_id: "node_a".into(),
            initial_stakes: BTreeMap::from([
                ("node_a".to_string(), 1000.0),
                ("node_b".to_string(), 1000.0),
            ]),
            ..NodeConfig::default()
        }
    }

    fn test_context(config: NodeConfig) -> SharedContext {
        NodeContext::initialise(
            config,
            Store::open_temporary().unwrap(),
            Arc::new(FixedSensor(EnergyReading::default())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn initialise_creates_and_persists_genesis() {
        let ctx = test_context(test_config());

        assert_eq!(ctx.chain_length().await, 1);
        assert_eq!(ctx.store.chain_length().unwrap(), 1);

        let state = ctx.state.read().await;
        assert_eq!(state.dpos.validators().len(), 2);
        assert_eq!(state.dpos.stake_of("node_a"), 1000.0);
        assert!(state.metrics.liveness_view().is_live("node_b", unix_now(), 60.0));
    }

    #[tokio::test]
    async fn initialise_replays_an_existing_store() {
        let store = Store::open_temporary().unwrap();
        let genesis = genesis_block(&test_config().initial_stakes).unwrap();
        store.save_block(&genesis).unwrap();

        let ctx = NodeContext::initialise(
            test_config(),
            store,
            Arc::new(FixedSensor(EnergyReading::default())),
        )
        .unwrap();

        assert_eq!(ctx.chain_length().await, 1);
        assert_eq!(ctx.tail().await.2, genesis.hash);
    }

    #[tokio::test]
    async fn mismatched_genesis_is_fatal() {
        let store = Store::open_temporary().unwrap();
        let other_stakes = BTreeMap::from([("node_z".to_string(), 9.0)]);
        store.save_block(&genesis_block(&other_stakes).unwrap()).unwrap();

        let result = NodeContext::initialise(
            test_config(),
            store,
            Arc::new(FixedSensor(EnergyReading::default())),
        );
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[tokio::test]
    async fn append_block_is_linearized_and_persisted() {
        let ctx = test_context(test_config());
        let (index, timestamp, hash) = ctx.tail().await;

        let block = Block::new(
            (index + 1) as u64,
            timestamp + 3.0,
            Vec::new(),
            hash,
            "node_a".into(),
            BTreeMap::from([("power_usage".to_string(), 1.25)]),
        )
        .unwrap();

        ctx.append_block(block.clone()).await.unwrap();
        assert_eq!(ctx.chain_length().await, 2);
        assert_eq!(ctx.store.block(1).unwrap().unwrap(), block);

        let rows = ctx.store.export_block_metrics().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].power_usage, 1.25);
        assert_eq!(rows[0].block_interval, 3.0);

        // A second appender racing on the same tail loses.
        assert!(ctx.append_block(block).await.is_err());
        assert_eq!(ctx.chain_length().await, 2);
    }
}
