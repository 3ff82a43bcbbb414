use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use edge_ledger::Block;
use edge_merkle::MerkleTree;
use edge_sync::{apply_remote_blocks, PeerAddr, PeerClient};
use edge_store::BlockMetricsRow;
use edge_transaction::Transaction;

use crate::{
    bus::{topic, Bus, InboundMessage},
    clock::unix_now,
    context::{tail_of, SharedContext},
    error::NodeError,
    metrics::NodeMetrics,
};

/// FIFO cap on transactions sealed into one block.
pub const MAX_BLOCK_TRANSACTIONS: usize = 10;

/// How often the proposer re-checks whether it holds the slot.
const PROPOSER_POLL: Duration = Duration::from_secs(1);

/// The running node: three periodic duties plus the inbound dispatcher,
/// all sharing one [`crate::NodeContext`] through the bus-agnostic seam.
pub struct Node {
    ctx: SharedContext,
    bus: Arc<dyn Bus>,
    peer_client: PeerClient,
}

impl Node {
    pub fn new(ctx: SharedContext, bus: Arc<dyn Bus>) -> Result<Self, NodeError> {
        let peer_client = PeerClient::new(Duration::from_secs_f64(ctx.config.http_timeout))?;
        Ok(Self {
            ctx,
            bus,
            peer_client,
        })
    }

    /// Run until the bus closes or the proposer hits a fatal invariant
    /// violation.  Heartbeat and sync failures are logged and retried on
    /// their next tick; they never take the node down.
    pub async fn run(
        self,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    ) -> Result<(), NodeError> {
        info!(node_id = %self.ctx.config.node_id, "node starting");

        // Catch up with the roster before the duties begin, then settle the
        // delegate schedule.
        sync_round(&self.ctx, &self.peer_client).await;
        self.ctx
            .state
            .write()
            .await
            .dpos
            .recompute_delegates(true, unix_now());

        let heartbeat = tokio::spawn(heartbeat_task(self.ctx.clone(), self.bus.clone()));
        let sync = tokio::spawn(sync_task(self.ctx.clone(), self.peer_client.clone()));
        let mut proposer = tokio::spawn(proposer_task(self.ctx.clone(), self.bus.clone()));

        let result = loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => handle_message(&self.ctx, message).await,
                    None => {
                        info!("bus closed, shutting down");
                        break Ok(());
                    }
                },
                proposer_exit = &mut proposer => {
                    break match proposer_exit {
                        Ok(Err(e)) => Err(e),
                        Ok(Ok(())) => Ok(()),
                        Err(join) => Err(NodeError::Transport(format!("proposer task died: {join}"))),
                    };
                }
            }
        };

        heartbeat.abort();
        sync.abort();
        proposer.abort();
        result
    }
}

// ── Heartbeat duty ──────────────────────────────────────────────────────────

async fn heartbeat_task(ctx: SharedContext, bus: Arc<dyn Bus>) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs_f64(ctx.config.metrics_interval.max(0.1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if let Err(e) = heartbeat_tick(&ctx, bus.as_ref()).await {
            warn!(error = %e, "heartbeat tick failed");
        }
    }
}

/// Sample the sensors, fold the reading into the local metrics view, and
/// publish it on the metrics topic.
pub async fn heartbeat_tick(ctx: &SharedContext, bus: &dyn Bus) -> Result<(), NodeError> {
    let reading = ctx.sensor.sample();
    let now = unix_now();

    let metrics = {
        let mut state = ctx.state.write().await;
        let (tail_index, _, _) = tail_of(&state.chain);
        let liveness = state.metrics.liveness_view();
        let current = state.dpos.current_validator(tail_index, Some(&liveness), now);

        let metrics = NodeMetrics {
            node_id: ctx.config.node_id.clone(),
            timestamp: now,
            cpu_percent: reading.cpu_percent,
            memory_percent: reading.memory_percent,
            temperature: reading.temperature,
            power_usage: reading.power_usage,
            block_count: state.chain.len() as u64,
            pending_transactions: state.pending.len() as u64,
            current_stake: state.dpos.stake_of(&ctx.config.node_id),
            all_validators: state.dpos.validators().clone(),
            current_network_validator: current,
        };
        state.metrics.record_node_metrics(metrics.clone(), now);
        metrics
    };

    bus.publish(topic::METRICS, &serde_json::to_value(&metrics)?)
        .await
}

// ── Proposer duty ───────────────────────────────────────────────────────────

async fn proposer_task(ctx: SharedContext, bus: Arc<dyn Bus>) -> Result<(), NodeError> {
    let mut ticker = tokio::time::interval(PROPOSER_POLL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match proposer_tick(&ctx, bus.as_ref()).await {
            Ok(Some(block)) => info!(index = block.index, hash = %block.hash, "sealed block"),
            Ok(None) => {}
            // A block this node just sealed failing its own invariants is a
            // code bug; stopping beats extending a corrupt chain.
            Err(e @ (NodeError::Ledger(_) | NodeError::Validation(_))) => {
                error!(error = %e, "own sealed block violated an invariant");
                return Err(e);
            }
            Err(e) => warn!(error = %e, "proposer tick failed"),
        }
    }
}

/// One proposer pass.  Yields (returns `None`) unless this node holds the
/// current slot, the health gate passes, the block-time window has elapsed,
/// and transactions are pending; otherwise seals and broadcasts a block.
pub async fn proposer_tick(
    ctx: &SharedContext,
    bus: &dyn Bus,
) -> Result<Option<Block>, NodeError> {
    let start = unix_now();
    let reading = ctx.sensor.sample();
    let node_id = ctx.config.node_id.clone();

    let sealed = {
        let mut state = ctx.state.write().await;
        let now = unix_now();
        let (tail_index, tail_timestamp, tail_hash) = tail_of(&state.chain);

        let liveness = state.metrics.liveness_view();
        let Some(leader) = state.dpos.current_validator(tail_index, Some(&liveness), now) else {
            debug!("no live delegates, yielding");
            return Ok(None);
        };
        if leader != node_id {
            return Ok(None);
        }

        let limits = &ctx.config.thresholds;
        if reading.cpu_percent > limits.max_cpu_percent
            || reading.memory_percent > limits.max_memory_percent
            || reading.temperature > limits.max_temperature
        {
            debug!(
                cpu = reading.cpu_percent,
                memory = reading.memory_percent,
                temperature = reading.temperature,
                "health gate failed, yielding"
            );
            return Ok(None);
        }

        if !state.dpos.is_time_to_propose(tail_timestamp, now) {
            return Ok(None);
        }
        if state.pending.is_empty() {
            return Ok(None);
        }

        let count = state.pending.len().min(MAX_BLOCK_TRANSACTIONS);
        let transactions: Vec<Transaction> = state.pending.iter().take(count).cloned().collect();

        let tree = MerkleTree::new(&transactions)?;
        let mut energy_metrics = reading.as_map();
        energy_metrics.insert("consensus_time".to_string(), unix_now() - start);
        energy_metrics.insert("merkle_leaves".to_string(), tree.leaf_count() as f64);
        energy_metrics.insert("merkle_height".to_string(), tree.height() as f64);

        let block = Block::new(
            (tail_index + 1) as u64,
            now,
            transactions,
            tail_hash,
            node_id.clone(),
            energy_metrics,
        )?;

        ctx.append_locked(&mut state, block.clone())?;
        state.pending.drain(..count);

        (
            block,
            state.chain.len() as u64,
            state.dpos.stake_of(&node_id),
        )
    };

    let (block, block_count, stake) = sealed;

    bus.publish(topic::BLOCKS, &block.to_wire()?).await?;
    bus.publish(
        topic::VALIDATOR_STATUS,
        &serde_json::json!({
            "node_id": node_id,
            "block_count": block_count,
            "stake": stake,
            "is_validator": true,
        }),
    )
    .await?;

    Ok(Some(block))
}

// ── Sync duty ───────────────────────────────────────────────────────────────

async fn sync_task(ctx: SharedContext, client: PeerClient) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs_f64(ctx.config.sync_interval.max(1.0)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The run loop already performed the startup catch-up.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        sync_round(&ctx, &client).await;
    }
}

/// One catch-up round: ask every roster peer for blocks past the local
/// tail and extend the chain with whatever links.  Peers fail
/// independently; errors skip the peer for this round only.
pub async fn sync_round(ctx: &SharedContext, client: &PeerClient) {
    for peer in ctx.config.peer_roster() {
        let local_length = ctx.chain_length().await;

        let raw = match fetch_with_retry(client, &peer, local_length, ctx.config.retry_attempts)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(peer = %peer.id, error = %e, "peer skipped this round");
                continue;
            }
        };
        if raw.is_empty() {
            continue;
        }

        let mut state = ctx.state.write().await;
        let outcome = apply_remote_blocks(&mut state.chain, raw);

        for applied in &outcome.applied {
            let block = &applied.block;
            let row = BlockMetricsRow {
                block_index: block.index,
                created_timestamp: block.timestamp,
                block_interval: applied.interval,
                consensus_time: block
                    .energy_metrics
                    .get("consensus_time")
                    .copied()
                    .unwrap_or(0.0),
                power_usage: block
                    .energy_metrics
                    .get("power_usage")
                    .copied()
                    .unwrap_or(0.0),
            };
            if let Err(e) = ctx
                .store
                .save_block(block)
                .and_then(|()| ctx.store.save_block_metrics(&row))
            {
                warn!(index = block.index, error = %e, "failed to persist synced block");
            }
            state.metrics.record_block_interval(applied.interval);
            state.metrics.record_consensus_time(row.consensus_time);
            state.dpos.checkpoint(block.index, unix_now());
        }

        if !outcome.applied.is_empty() {
            info!(
                peer = %peer.id,
                applied = outcome.applied.len(),
                chain_length = state.chain.len(),
                "chain extended from peer"
            );
        }
    }

    ctx.state
        .write()
        .await
        .dpos
        .recompute_delegates(true, unix_now());
}

async fn fetch_with_retry(
    client: &PeerClient,
    peer: &PeerAddr,
    start: u64,
    attempts: u32,
) -> Result<Vec<Value>, NodeError> {
    let mut last_error = None;
    for attempt in 1..=attempts.max(1) {
        match client.fetch_blocks(peer, start).await {
            Ok(raw) => return Ok(raw),
            Err(e) => {
                debug!(peer = %peer.id, attempt, error = %e, "fetch attempt failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error
        .map(NodeError::Sync)
        .unwrap_or_else(|| NodeError::Transport("no fetch attempts configured".into())))
}

// ── Inbound dispatch ────────────────────────────────────────────────────────

/// Route one bus message to its handler.  Handler errors are logged here;
/// a bad message never stops the dispatcher.
pub async fn handle_message(ctx: &SharedContext, message: InboundMessage) {
    let result = match message.topic.as_str() {
        topic::BLOCKS => handle_block(ctx, message.payload).await,
        topic::TRANSACTIONS => handle_transaction(ctx, message.payload).await,
        topic::METRICS => handle_metrics(ctx, message.payload).await,
        topic::VALIDATOR_STATUS => handle_validator_status(ctx, message.payload).await,
        topic::NETWORK_STATUS => handle_network_status(ctx, message.payload).await,
        other => {
            debug!(topic = other, "message on unhandled topic");
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(topic = %message.topic, error = %e, "handler failed");
    }
}

/// Inbound block: dedupe by hash, check Merkle integrity (part of wire
/// reconstruction), apply the DPoS rules against the tail, then enforce
/// previous-hash continuity before appending.
pub async fn handle_block(ctx: &SharedContext, payload: Value) -> Result<(), NodeError> {
    let block = match Block::from_wire(payload) {
        Ok(block) => block,
        Err(e) => {
            warn!(error = %e, "dropping malformed block");
            return Ok(());
        }
    };

    let now = unix_now();
    let mut state = ctx.state.write().await;

    if state.chain.contains_hash(&block.hash) {
        debug!(index = block.index, "duplicate block ignored");
        return Ok(());
    }

    let (prev_index, prev_timestamp, tail_hash) = tail_of(&state.chain);
    let power_usage = block
        .energy_metrics
        .get("power_usage")
        .copied()
        .unwrap_or(0.0);
    let liveness = state.metrics.liveness_view();

    if let Err(e) = state.dpos.validate_block(
        &block,
        power_usage,
        prev_timestamp,
        prev_index,
        ctx.config.sync_tolerance,
        Some(&liveness),
        now,
    ) {
        warn!(index = block.index, validator = %block.validator, error = %e, "block rejected");
        return Ok(());
    }

    if block.previous_hash != tail_hash {
        warn!(index = block.index, "block does not link to the local tail");
        return Ok(());
    }

    let index = block.index;
    ctx.append_locked(&mut state, block)?;
    info!(index, "accepted block from the network");
    Ok(())
}

/// Inbound transaction: enqueue it and stamp its first-seen time.
pub async fn handle_transaction(ctx: &SharedContext, payload: Value) -> Result<(), NodeError> {
    let tx = match Transaction::from_value(payload) {
        Ok(tx) => tx,
        Err(e) => {
            warn!(error = %e, "dropping malformed transaction");
            return Ok(());
        }
    };

    let hash = tx.hash_hex()?;
    let now = unix_now();

    {
        let mut state = ctx.state.write().await;
        state.pending.push_back(tx);
        state.metrics.record_transactions(1, now);
    }

    ctx.store.record_tx_received(&hash, now)?;
    debug!(%hash, "transaction queued");
    Ok(())
}

/// Inbound metrics: refresh the sender's liveness, commit the reading to
/// history as a `metrics` transaction, and let the delegate schedule refresh
/// on its throttle.
pub async fn handle_metrics(ctx: &SharedContext, payload: Value) -> Result<(), NodeError> {
    let metrics: NodeMetrics = match serde_json::from_value(payload.clone()) {
        Ok(metrics) => metrics,
        Err(e) => {
            warn!(error = %e, "dropping malformed metrics payload");
            return Ok(());
        }
    };
    if metrics.node_id.is_empty() {
        warn!("dropping metrics without a node id");
        return Ok(());
    }

    let now = unix_now();
    let reported_at = if metrics.timestamp > 0.0 {
        metrics.timestamp
    } else {
        now
    };
    let tx = Transaction::metrics(&metrics.node_id, payload, reported_at);
    let hash = tx.hash_hex()?;

    {
        let mut state = ctx.state.write().await;
        state.metrics.record_node_metrics(metrics, now);
        state.pending.push_back(tx);
        state.metrics.record_transactions(1, now);
        state.dpos.recompute_delegates(false, now);
    }

    ctx.store.record_tx_received(&hash, now)?;
    Ok(())
}

/// Inbound validator status: upsert the announcing validator's stake.
pub async fn handle_validator_status(ctx: &SharedContext, payload: Value) -> Result<(), NodeError> {
    let (Some(node_id), Some(stake)) = (
        payload.get("node_id").and_then(Value::as_str),
        payload.get("stake").and_then(Value::as_f64),
    ) else {
        debug!("validator status without node_id/stake ignored");
        return Ok(());
    };

    let mut state = ctx.state.write().await;
    if !state.dpos.add_validator(node_id, stake) {
        warn!(node_id, "validator roster is full");
    }
    Ok(())
}

/// Inbound network status: adapt the block interval to reported load.
pub async fn handle_network_status(ctx: &SharedContext, payload: Value) -> Result<(), NodeError> {
    let load = payload
        .get("network_load")
        .and_then(Value::as_f64)
        .unwrap_or(0.5);

    let mut state = ctx.state.write().await;
    state.dpos.adjust_block_time(load);
    debug!(load, block_time = state.dpos.block_time(), "block time adjusted");
    Ok(())
}
