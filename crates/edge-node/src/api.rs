use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::warn;

use edge_store::{BlockMetricsRow, TxLifecycleRow};

use crate::{clock::unix_now, context::SharedContext};

/// The peer HTTP surface.
///
/// `/chain_info`, `/blocks`, and `/merkle-proof/{block}/{tx}` make up the
/// wire protocol peers rely on for catch-up and inclusion proofs; the rest
/// are local observability endpoints.
pub fn router(ctx: SharedContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chain_info", get(chain_info))
        .route("/blocks", get(blocks))
        .route("/merkle-proof/{block_index}/{tx_index}", get(merkle_proof))
        .route("/metrics/node", get(node_metrics))
        .route("/export/block-metrics", get(export_block_metrics))
        .route("/export/transaction-lifecycle", get(export_transaction_lifecycle))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn internal<E: std::fmt::Display>(error: E) -> StatusCode {
    warn!(%error, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn health(State(ctx): State<SharedContext>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "node_id": ctx.config.node_id,
    }))
}

async fn chain_info(State(ctx): State<SharedContext>) -> Json<Value> {
    let state = ctx.state.read().await;
    Json(json!({
        "chain_length": state.chain.len(),
        "latest_block_hash": state.chain.tip().map(|tip| tip.hash.clone()),
    }))
}

#[derive(Debug, Deserialize)]
struct BlocksQuery {
    #[serde(default)]
    start_index: u64,
    #[serde(default = "open_ended")]
    end_index: i64,
}

fn open_ended() -> i64 {
    -1
}

/// Inclusive block range from the store; `end_index = -1` means "to tail".
async fn blocks(
    State(ctx): State<SharedContext>,
    Query(query): Query<BlocksQuery>,
) -> Result<Json<Vec<Value>>, StatusCode> {
    let blocks = ctx
        .store
        .blocks(query.start_index, query.end_index)
        .map_err(internal)?;

    blocks
        .iter()
        .map(|block| block.to_wire().map_err(internal))
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
}

async fn merkle_proof(
    State(ctx): State<SharedContext>,
    Path((block_index, tx_index)): Path<(u64, usize)>,
) -> Result<Json<Value>, StatusCode> {
    let block = ctx
        .store
        .block(block_index)
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let tx = block
        .transactions
        .get(tx_index)
        .ok_or(StatusCode::NOT_FOUND)?;

    let proof = block.proof(tx_index).map_err(internal)?;
    let proof_valid = block.verify_inclusion(tx, &proof);

    Ok(Json(json!({
        "transaction": tx,
        "merkle_root": block.merkle_root,
        "proof": proof,
        "proof_valid": proof_valid,
    })))
}

async fn node_metrics(State(ctx): State<SharedContext>) -> Json<Value> {
    let mut state = ctx.state.write().await;
    Json(state.metrics.snapshot(unix_now()))
}

async fn export_block_metrics(
    State(ctx): State<SharedContext>,
) -> Result<Json<Vec<BlockMetricsRow>>, StatusCode> {
    ctx.store.export_block_metrics().map_err(internal).map(Json)
}

async fn export_transaction_lifecycle(
    State(ctx): State<SharedContext>,
) -> Result<Json<Vec<TxLifecycleRow>>, StatusCode> {
    ctx.store
        .export_transaction_lifecycle()
        .map_err(internal)
        .map(Json)
}
