//! End-to-end tests wiring the crates together: transactions flow into the
//! pending pool, the proposer seals them under the DPoS schedule, peers
//! validate and append the result, and catch-up runs over the real HTTP
//! surface.
//!
//! The two-validator roster used throughout stakes `node_a` and `node_b`
//! equally, so with the genesis block at the tail (`ref_index = 0`) the
//! elected proposer is `node_b`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tower::ServiceExt;

use edge_ledger::{Block, GENESIS_TIMESTAMP};
use edge_node::{
    api,
    bus::topic,
    config::NodeConfig,
    context::{NodeContext, SharedContext},
    node::{
        handle_block, handle_metrics, handle_network_status, handle_transaction,
        handle_validator_status, proposer_tick,
    },
    sensor::{EnergyReading, FixedSensor},
    LocalBus,
};
use edge_store::Store;
use edge_sync::{PeerAddr, PeerClient};

fn healthy_reading() -> EnergyReading {
    EnergyReading {
        cpu_percent: 10.0,
        memory_percent: 20.0,
        temperature: 40.0,
        power_usage: 1.0,
    }
}

fn config_for(node_id: &str) -> NodeConfig {
    NodeConfig {
        node_id: node_id.to_string(),
        initial_stakes: BTreeMap::from([
            ("node_a".to_string(), 1000.0),
            ("node_b".to_string(), 1000.0),
        ]),
        ..NodeConfig::default()
    }
}

fn context_with(config: NodeConfig, reading: EnergyReading) -> SharedContext {
    NodeContext::initialise(
        config,
        Store::open_temporary().unwrap(),
        Arc::new(FixedSensor(reading)),
    )
    .unwrap()
}

fn context_for(node_id: &str) -> SharedContext {
    context_with(config_for(node_id), healthy_reading())
}

// ── Proposer duty ───────────────────────────────────────────────────────────

#[tokio::test]
async fn transactions_flow_into_a_sealed_block() {
    let ctx = context_for("node_b");
    let (bus, mut inbound) = LocalBus::new();

    handle_transaction(&ctx, json!({"type": "transfer", "amount": 5}))
        .await
        .unwrap();
    handle_transaction(&ctx, json!({"type": "transfer", "amount": 6}))
        .await
        .unwrap();

    let block = proposer_tick(&ctx, &bus)
        .await
        .unwrap()
        .expect("node_b holds the slot and should seal");

    assert_eq!(block.index, 1);
    assert_eq!(block.validator, "node_b");
    assert_eq!(block.transactions.len(), 2);

    // Appended, persisted, and the pool drained.
    assert_eq!(ctx.chain_length().await, 2);
    assert_eq!(ctx.store.block(1).unwrap().unwrap(), block);
    assert!(ctx.state.read().await.pending.is_empty());

    // Broadcast on the blocks topic, followed by the validator status.
    let first = inbound.recv().await.unwrap();
    assert_eq!(first.topic, topic::BLOCKS);
    assert_eq!(first.payload["index"], 1);
    let second = inbound.recv().await.unwrap();
    assert_eq!(second.topic, topic::VALIDATOR_STATUS);
    assert_eq!(second.payload["node_id"], "node_b");
}

#[tokio::test]
async fn proposer_caps_a_block_at_ten_transactions() {
    let ctx = context_for("node_b");
    let (bus, _inbound) = LocalBus::new();

    for i in 0..14 {
        handle_transaction(&ctx, json!({"type": "transfer", "n": i}))
            .await
            .unwrap();
    }

    let block = proposer_tick(&ctx, &bus).await.unwrap().unwrap();
    assert_eq!(block.transactions.len(), 10);
    assert_eq!(ctx.state.read().await.pending.len(), 4);
}

#[tokio::test]
async fn proposer_yields_out_of_turn() {
    let ctx = context_for("node_a");
    let (bus, _inbound) = LocalBus::new();

    handle_transaction(&ctx, json!({"type": "transfer"})).await.unwrap();

    assert!(proposer_tick(&ctx, &bus).await.unwrap().is_none());
    assert_eq!(ctx.chain_length().await, 1);
    assert_eq!(ctx.state.read().await.pending.len(), 1);
}

#[tokio::test]
async fn proposer_yields_when_unhealthy() {
    let overheated = EnergyReading {
        temperature: 95.0,
        ..healthy_reading()
    };
    let ctx = context_with(config_for("node_b"), overheated);
    let (bus, _inbound) = LocalBus::new();

    handle_transaction(&ctx, json!({"type": "transfer"})).await.unwrap();

    assert!(proposer_tick(&ctx, &bus).await.unwrap().is_none());
}

#[tokio::test]
async fn proposer_yields_with_an_empty_pool() {
    let ctx = context_for("node_b");
    let (bus, _inbound) = LocalBus::new();
    assert!(proposer_tick(&ctx, &bus).await.unwrap().is_none());
}

// ── Inbound block handling ──────────────────────────────────────────────────

#[tokio::test]
async fn peer_block_is_validated_appended_and_deduped() {
    let proposer = context_for("node_b");
    let receiver = context_for("node_a");
    let (bus, _inbound) = LocalBus::new();

    handle_transaction(&proposer, json!({"type": "transfer", "amount": 1}))
        .await
        .unwrap();
    let block = proposer_tick(&proposer, &bus).await.unwrap().unwrap();
    let wire = block.to_wire().unwrap();

    handle_block(&receiver, wire.clone()).await.unwrap();
    assert_eq!(receiver.chain_length().await, 2);
    assert_eq!(receiver.store.block(1).unwrap().unwrap().hash, block.hash);

    // Redelivery is a no-op.
    handle_block(&receiver, wire).await.unwrap();
    assert_eq!(receiver.chain_length().await, 2);
}

#[tokio::test]
async fn out_of_turn_block_is_rejected() {
    let receiver = context_for("node_b");
    let (_, genesis_ts, genesis_hash) = receiver.tail().await;

    // node_a seals while the slot belongs to node_b.
    let rogue = Block::new(
        1,
        genesis_ts + 5.0,
        vec![],
        genesis_hash,
        "node_a".into(),
        BTreeMap::from([("power_usage".to_string(), 1.0)]),
    )
    .unwrap();

    handle_block(&receiver, rogue.to_wire().unwrap()).await.unwrap();
    assert_eq!(receiver.chain_length().await, 1);
}

#[tokio::test]
async fn tampered_block_is_rejected() {
    let proposer = context_for("node_b");
    let receiver = context_for("node_a");
    let (bus, _inbound) = LocalBus::new();

    handle_transaction(&proposer, json!({"type": "transfer", "amount": 1}))
        .await
        .unwrap();
    let block = proposer_tick(&proposer, &bus).await.unwrap().unwrap();

    let mut wire = block.to_wire().unwrap();
    wire["merkle_root"] = json!("ff".repeat(32));

    handle_block(&receiver, wire).await.unwrap();
    assert_eq!(receiver.chain_length().await, 1);
}

// ── Other inbound handlers ──────────────────────────────────────────────────

#[tokio::test]
async fn malformed_transactions_are_dropped() {
    let ctx = context_for("node_a");
    handle_transaction(&ctx, json!([1, 2, 3])).await.unwrap();
    handle_transaction(&ctx, json!("nope")).await.unwrap();
    assert!(ctx.state.read().await.pending.is_empty());
}

#[tokio::test]
async fn metrics_refresh_liveness_and_join_the_pool() {
    let ctx = context_for("node_a");

    let payload = json!({
        "node_id": "node_b",
        "timestamp": 123.0,
        "cpu_percent": 12.5,
        "power_usage": 0.9,
    });
    handle_metrics(&ctx, payload).await.unwrap();

    let state = ctx.state.read().await;
    assert_eq!(state.pending.len(), 1);
    assert_eq!(state.pending[0].tx_type(), Some("metrics"));

    let seen = state.metrics.liveness_view().last_seen("node_b").unwrap();
    assert!(seen > GENESIS_TIMESTAMP);
}

#[tokio::test]
async fn validator_status_upserts_the_roster() {
    let ctx = context_for("node_a");
    handle_validator_status(&ctx, json!({"node_id": "node_c", "stake": 700.0}))
        .await
        .unwrap();

    let state = ctx.state.read().await;
    assert_eq!(state.dpos.stake_of("node_c"), 700.0);
}

#[tokio::test]
async fn network_status_adjusts_the_block_time() {
    let ctx = context_for("node_a");

    handle_network_status(&ctx, json!({"network_load": 0.95})).await.unwrap();
    assert_eq!(ctx.state.read().await.dpos.block_time(), 2.5);

    handle_network_status(&ctx, json!({"network_load": 0.1})).await.unwrap();
    assert_eq!(ctx.state.read().await.dpos.block_time(), 3.0);
}

// ── HTTP surface ────────────────────────────────────────────────────────────

async fn get_json(router: axum::Router, uri: &str) -> (u16, Value) {
    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri(uri)
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn chain_info_reports_the_tail() {
    let ctx = context_for("node_a");
    let tip_hash = ctx.tail().await.2;

    let (status, body) = get_json(api::router(ctx), "/chain_info").await;
    assert_eq!(status, 200);
    assert_eq!(body["chain_length"], 1);
    assert_eq!(body["latest_block_hash"], json!(tip_hash));
}

#[tokio::test]
async fn blocks_endpoint_serves_wire_dictionaries() {
    let ctx = context_for("node_b");
    let (bus, _inbound) = LocalBus::new();
    handle_transaction(&ctx, json!({"type": "transfer", "amount": 2}))
        .await
        .unwrap();
    proposer_tick(&ctx, &bus).await.unwrap().unwrap();

    let (status, body) = get_json(api::router(ctx.clone()), "/blocks?start_index=0&end_index=-1").await;
    assert_eq!(status, 200);
    let blocks = body.as_array().unwrap();
    assert_eq!(blocks.len(), 2);
    for field in ["index", "timestamp", "transactions", "previous_hash", "validator", "energy_metrics", "merkle_root", "hash"] {
        assert!(blocks[1].get(field).is_some(), "missing field {field}");
    }

    let (_, partial) = get_json(api::router(ctx), "/blocks?start_index=1&end_index=1").await;
    assert_eq!(partial.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn merkle_proof_endpoint_proves_inclusion() {
    let ctx = context_for("node_b");
    let (bus, _inbound) = LocalBus::new();
    handle_transaction(&ctx, json!({"type": "transfer", "amount": 3}))
        .await
        .unwrap();
    handle_transaction(&ctx, json!({"type": "transfer", "amount": 4}))
        .await
        .unwrap();
    proposer_tick(&ctx, &bus).await.unwrap().unwrap();

    let (status, body) = get_json(api::router(ctx.clone()), "/merkle-proof/1/0").await;
    assert_eq!(status, 200);
    assert_eq!(body["proof_valid"], json!(true));
    assert!(body["merkle_root"].is_string());
    assert!(body["proof"].is_array());
    assert_eq!(body["transaction"]["amount"], 3);

    let (missing_tx, _) = get_json(api::router(ctx.clone()), "/merkle-proof/1/9").await;
    assert_eq!(missing_tx, 404);
    let (missing_block, _) = get_json(api::router(ctx), "/merkle-proof/7/0").await;
    assert_eq!(missing_block, 404);
}

// ── Peer catch-up over real HTTP ────────────────────────────────────────────

#[tokio::test]
async fn catch_up_pulls_missing_blocks_from_a_peer() {
    // Peer with [G, B1, B2, B3]; the sync path bypasses the DPoS schedule,
    // so the extra blocks can be appended directly.
    let peer_ctx = context_for("node_a");
    for i in 1..=3u64 {
        let (index, timestamp, hash) = peer_ctx.tail().await;
        assert_eq!(index as u64, i - 1);
        let block = Block::new(
            i,
            timestamp + 3.0,
            vec![],
            hash,
            "node_a".into(),
            BTreeMap::from([("power_usage".to_string(), 0.8)]),
        )
        .unwrap();
        peer_ctx.append_block(block).await.unwrap();
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_port = listener.local_addr().unwrap().port();
    let peer_router = api::router(peer_ctx.clone());
    tokio::spawn(async move {
        axum::serve(listener, peer_router).await.unwrap();
    });

    // Local node only has the genesis block and one peer in its roster.
    let mut config = config_for("node_b");
    config.peers = vec![PeerAddr {
        id: "node_a".into(),
        host: "127.0.0.1".into(),
        port: peer_port,
    }];
    let local_ctx = context_with(config, healthy_reading());

    let client = PeerClient::new(std::time::Duration::from_secs(5)).unwrap();
    edge_node::node::sync_round(&local_ctx, &client).await;

    assert_eq!(local_ctx.chain_length().await, 4);
    assert_eq!(local_ctx.tail().await.2, peer_ctx.tail().await.2);
    assert!(local_ctx.state.read().await.chain.is_valid());
    // The synced blocks were persisted with their analytics rows.
    assert_eq!(local_ctx.store.chain_length().unwrap(), 4);
    assert_eq!(local_ctx.store.export_block_metrics().unwrap().len(), 3);
}
