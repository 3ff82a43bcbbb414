use serde_json::Value;
use tracing::{debug, warn};

use edge_ledger::{Block, Chain};

/// A block accepted during catch-up, together with the interval to its
/// predecessor (feeds the per-block analytics table).
#[derive(Debug, Clone)]
pub struct AppliedBlock {
    pub block: Block,
    pub interval: f64,
}

/// What one peer's catch-up round produced.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub applied: Vec<AppliedBlock>,
    pub skipped_malformed: usize,
}

/// Extend `chain` with raw blocks fetched from a peer.
///
/// Each dictionary is reconstructed first; a block whose stored Merkle root
/// does not reproduce from its transactions is skipped outright.  Structural
/// continuity (advancing index and timestamp, previous hash linking to the
/// tip) is then enforced one block at a time; the first break ends the round
/// because nothing after it can link either.  The DPoS schedule and the
/// freshness window are deliberately NOT consulted here: the schedule that
/// produced an old block depended on a liveness view this node never saw.
pub fn apply_remote_blocks(chain: &mut Chain, raw_blocks: Vec<Value>) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();

    for raw in raw_blocks {
        let block = match Block::from_wire(raw) {
            Ok(block) => block,
            Err(e) => {
                warn!(error = %e, "skipping malformed block from peer");
                outcome.skipped_malformed += 1;
                continue;
            }
        };

        let prev_timestamp = chain.tip().map(|tip| tip.timestamp).unwrap_or(0.0);

        match chain.try_append(block) {
            Ok(appended) => {
                debug!(index = appended.index, "applied block from peer");
                outcome.applied.push(AppliedBlock {
                    interval: appended.timestamp - prev_timestamp,
                    block: appended.clone(),
                });
            }
            Err(e) => {
                debug!(error = %e, "continuity break, ending catch-up round");
                break;
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use edge_ledger::{genesis_block, GENESIS_TIMESTAMP};
    use edge_transaction::Transaction;

    use super::*;

    fn tx(i: u64) -> Transaction {
        Transaction::from_value(json!({"i": i})).unwrap()
    }

    fn extend(chain: &mut Chain, count: u64) {
        for _ in 0..count {
            let tip = chain.tip().unwrap();
            let block = Block::new(
                tip.index + 1,
                tip.timestamp + 3.0,
                vec![tx(tip.index + 1)],
                tip.hash.clone(),
                "node_a".into(),
                BTreeMap::new(),
            )
            .unwrap();
            chain.try_append(block).unwrap();
        }
    }

    fn seeded_chain() -> Chain {
        let genesis =
            genesis_block(&BTreeMap::from([("node_a".to_string(), 1000.0)])).unwrap();
        let mut chain = Chain::new();
        chain.try_append(genesis).unwrap();
        chain
    }

    fn wire_from(chain: &Chain, start: u64) -> Vec<Value> {
        chain
            .blocks_from(start)
            .iter()
            .map(|b| b.to_wire().unwrap())
            .collect()
    }

    #[test]
    fn catch_up_adopts_the_peer_tail() {
        let mut remote = seeded_chain();
        extend(&mut remote, 3); // [G, B1, B2, B3]

        let mut local = seeded_chain();
        extend(&mut local, 1); // [G, B1]

        let outcome = apply_remote_blocks(&mut local, wire_from(&remote, 2));

        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(outcome.skipped_malformed, 0);
        assert_eq!(local.len(), remote.len());
        assert!(local.is_valid());
        assert_eq!(local.tip().unwrap().hash, remote.tip().unwrap().hash);
        assert_eq!(outcome.applied[0].interval, 3.0);
    }

    #[test]
    fn continuity_break_stops_the_round() {
        let mut remote = seeded_chain();
        extend(&mut remote, 3);

        let mut local = seeded_chain();

        // Leave out B1: B2 cannot link to the local tip.
        let outcome = apply_remote_blocks(&mut local, wire_from(&remote, 2));
        assert!(outcome.applied.is_empty());
        assert_eq!(local.len(), 1);
    }

    #[test]
    fn malformed_block_is_skipped_not_fatal() {
        let mut remote = seeded_chain();
        extend(&mut remote, 2);

        let mut local = seeded_chain();

        let mut raw = wire_from(&remote, 1);
        raw[0]["merkle_root"] = json!("ff".repeat(32));

        let outcome = apply_remote_blocks(&mut local, raw);
        // B1 is malformed and skipped; B2 then fails continuity and ends the
        // round.  The local chain is untouched.
        assert_eq!(outcome.skipped_malformed, 1);
        assert!(outcome.applied.is_empty());
        assert_eq!(local.len(), 1);
    }

    #[test]
    fn already_known_blocks_do_not_reapply() {
        let mut remote = seeded_chain();
        extend(&mut remote, 2);

        let mut local = seeded_chain();
        extend(&mut local, 2);

        let outcome = apply_remote_blocks(&mut local, wire_from(&remote, 0));
        assert!(outcome.applied.is_empty());
        assert_eq!(local.len(), 3);
    }

    #[test]
    fn bootstrap_from_empty_chain_accepts_genesis_first() {
        let mut remote = seeded_chain();
        extend(&mut remote, 2);

        let mut local = Chain::new();
        let outcome = apply_remote_blocks(&mut local, wire_from(&remote, 0));

        assert_eq!(outcome.applied.len(), 3);
        assert_eq!(local.len(), 3);
        assert!(local.is_valid());
        assert_eq!(
            local.get(0).unwrap().timestamp,
            GENESIS_TIMESTAMP,
        );
    }
}
