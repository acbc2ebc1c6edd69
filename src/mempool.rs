//! Gateway-local mempool: recently submitted transactions that db-sync has
//! not indexed yet.
//!
//! Entries are evicted on TTL expiry or once the ledger confirms them. The
//! overlay merges their produced/consumed outputs onto SQL-sourced UTXO
//! views so wallets immediately observe their own submissions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use itertools::Itertools;
use pallas::ledger::primitives::conway;
use pallas::ledger::traverse::{MultiEraOutput, MultiEraTx, OriginalHash};
use tracing::warn;

use crate::db::Db;
use crate::model::{PolicyAsset, Utxo};
use crate::prelude::Error;

#[derive(Clone)]
pub struct MempoolTx {
    pub hash: String,
    pub bytes: Vec<u8>,
    pub submitted_at: SystemTime,
    pub ttl: Option<SystemTime>,
}

#[derive(Clone, Default)]
pub struct Mempool {
    txs: Arc<RwLock<HashMap<String, MempoolTx>>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a transaction, replacing any previous entry with the same
    /// hash.
    pub fn add_tx(&self, tx_bytes: Vec<u8>, ttl: Option<SystemTime>) -> Result<String, Error> {
        let parsed = MultiEraTx::decode(&tx_bytes).map_err(Error::parse)?;
        let hash = parsed.hash().to_string();

        let mut txs = self.txs.write().unwrap();

        txs.insert(
            hash.clone(),
            MempoolTx {
                hash: hash.clone(),
                bytes: tx_bytes,
                submitted_at: SystemTime::now(),
                ttl,
            },
        );

        Ok(hash)
    }

    pub fn get_tx(&self, tx_id: &str) -> Option<MempoolTx> {
        self.txs.read().unwrap().get(tx_id).cloned()
    }

    /// Searches the produced outputs of every tracked transaction for
    /// `(tx_id, index)`. Last writer wins when entries overlap.
    pub fn get_utxo(&self, tx_id: &str, index: u32) -> Option<Utxo> {
        let txs = self.txs.read().unwrap();

        let mut found = None;

        for tx in txs.values() {
            let Ok(parsed) = MultiEraTx::decode(&tx.bytes) else {
                continue;
            };

            if parsed.hash().to_string() != tx_id {
                continue;
            }

            for (output_index, output) in parsed.produces() {
                if output_index as u32 != index {
                    continue;
                }

                match utxo_from_output(tx_id, index, &output) {
                    Ok(utxo) => found = Some(utxo),
                    Err(err) => warn!(%tx_id, index, error = %err, "undecodable mempool output"),
                }
            }
        }

        found
    }

    /// Sorted hex hashes of every tracked transaction.
    pub fn hashes(&self) -> Vec<String> {
        let txs = self.txs.read().unwrap();

        txs.keys().cloned().sorted().collect()
    }

    /// Two eviction passes: TTL first, then everything the ledger already
    /// knows about. A failing SQL query skips the second pass rather than
    /// evicting on stale information.
    pub async fn prune(&self, db: &Db) {
        let now = SystemTime::now();

        let ids: Vec<String> = {
            let mut txs = self.txs.write().unwrap();

            txs.retain(|_, tx| !matches!(tx.ttl, Some(ttl) if now > ttl));

            txs.keys().cloned().collect()
        };

        if ids.is_empty() {
            return;
        }

        let missing = match db.filter_missing_txs(&ids).await {
            Ok(missing) => missing,
            Err(err) => {
                warn!(error = %err, "mempool confirmation check failed, keeping entries");
                return;
            }
        };

        let missing: HashSet<String> = missing.into_iter().collect();

        let mut txs = self.txs.write().unwrap();
        txs.retain(|id, _| missing.contains(id));
    }

    /// Merges tracked transactions onto a base UTXO set: produced outputs
    /// that pass `filter` are added (unless already present), consumed
    /// inputs are removed.
    pub fn overlay(&self, base: Vec<Utxo>, filter: impl Fn(&Utxo) -> bool) -> Vec<Utxo> {
        let mut merged: HashMap<(String, u32), Utxo> = base
            .into_iter()
            .map(|u| ((u.tx_id.clone(), u.output_index), u))
            .collect();

        let txs = self.txs.read().unwrap();

        for tx in txs.values() {
            let parsed = match MultiEraTx::decode(&tx.bytes) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(hash = %tx.hash, error = %err, "undecodable mempool tx");
                    continue;
                }
            };

            for (index, output) in parsed.produces() {
                let key = (tx.hash.clone(), index as u32);

                if merged.contains_key(&key) {
                    continue;
                }

                match utxo_from_output(&tx.hash, index as u32, &output) {
                    Ok(utxo) => {
                        if filter(&utxo) {
                            merged.insert(key, utxo);
                        }
                    }
                    Err(err) => {
                        warn!(hash = %tx.hash, index, error = %err, "undecodable mempool output")
                    }
                }
            }

            for input in parsed.consumes() {
                merged.remove(&(input.hash().to_string(), input.index() as u32));
            }
        }

        merged.into_values().collect()
    }
}

/// Shapes a ledger output into the gateway's UTXO model.
pub fn utxo_from_output(tx_id: &str, index: u32, output: &MultiEraOutput) -> Result<Utxo, Error> {
    let address = output.address().map_err(Error::parse)?.to_string();

    let value = output.value();

    let mut assets = Vec::new();

    for policy_assets in value.assets() {
        let policy = policy_assets.policy().to_string();

        for asset in policy_assets.assets() {
            assets.push(PolicyAsset {
                asset: format!("{}{}", policy, hex::encode(asset.name())),
                quantity: asset.any_coin().to_string(),
            });
        }
    }

    let datum_hash = output
        .datum()
        .map(|d| match d {
            conway::MintedDatumOption::Hash(hash) => hash.to_string(),
            conway::MintedDatumOption::Data(data) => data.original_hash().to_string(),
        })
        .unwrap_or_default();

    let inline_datum = output
        .datum()
        .and_then(|d| match d {
            conway::MintedDatumOption::Hash(_) => None,
            conway::MintedDatumOption::Data(data) => Some(hex::encode(data.raw_cbor())),
        })
        .unwrap_or_default();

    let ref_script = output
        .script_ref()
        .map(|script| match script {
            conway::MintedScriptRef::NativeScript(x) => hex::encode(x.raw_cbor()),
            conway::MintedScriptRef::PlutusV1Script(x) => hex::encode(&*x.0),
            conway::MintedScriptRef::PlutusV2Script(x) => hex::encode(&*x.0),
            conway::MintedScriptRef::PlutusV3Script(x) => hex::encode(&*x.0),
        })
        .unwrap_or_default();

    Ok(Utxo {
        tx_id: tx_id.to_string(),
        output_index: index,
        address,
        lovelace: value.coin().to_string(),
        assets,
        datum_hash,
        inline_datum,
        ref_script,
        consumed_by: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // simple payment tx (conway era) used across the mempool tests; spends
    // af9f7a…cdee#0 and produces a single output
    const TEST_TX: &str = "84a30081825820af9f7a12bcc0825957a4fd909c8275866755e8a9178b51582d4ee938fb51cdee000181a200581d60b6a03720b0c3dae80b0e38b08f904eadb5372486f56a8e7a04af7c10011b0000000241fc7a40021a000f4240a100818258207dc72470db3c452fafdce8910a5da38fa763c2893c524f4a3b3610049fc34e1458406299bf7fd991d02af9822fdd72d71d7eede3f8d88545961a4ff714e4bdc8802fc94a8076c8407b7c8a6b9c49a785a29553f8e045ca3096394f7ba1d2090ee801f5f6";

    fn test_tx() -> Vec<u8> {
        hex::decode(TEST_TX).unwrap()
    }

    fn tx_hash() -> String {
        MultiEraTx::decode(&test_tx()).unwrap().hash().to_string()
    }

    #[test]
    fn add_and_get() {
        let mempool = Mempool::new();

        let hash = mempool.add_tx(test_tx(), None).unwrap();
        assert_eq!(hash, tx_hash());

        assert!(mempool.get_tx(&hash).is_some());
        assert!(mempool.get_tx(&"00".repeat(32)).is_none());

        assert_eq!(mempool.hashes(), vec![hash]);
    }

    #[test]
    fn replacement_overwrites() {
        let mempool = Mempool::new();

        mempool.add_tx(test_tx(), None).unwrap();
        mempool
            .add_tx(test_tx(), Some(SystemTime::now() + Duration::from_secs(60)))
            .unwrap();

        assert_eq!(mempool.hashes().len(), 1);
        assert!(mempool.get_tx(&tx_hash()).unwrap().ttl.is_some());
    }

    #[test]
    fn produced_output_is_queryable() {
        let mempool = Mempool::new();
        mempool.add_tx(test_tx(), None).unwrap();

        let utxo = mempool.get_utxo(&tx_hash(), 0).expect("produced output");

        assert_eq!(utxo.tx_id, tx_hash());
        assert_eq!(utxo.output_index, 0);
        assert_eq!(utxo.lovelace, "9697000000");
        assert!(utxo.assets.is_empty());

        assert!(mempool.get_utxo(&tx_hash(), 99).is_none());
    }

    #[test]
    fn overlay_adds_produced_and_removes_consumed() {
        let mempool = Mempool::new();
        mempool.add_tx(test_tx(), None).unwrap();

        let consumed_id = "af9f7a12bcc0825957a4fd909c8275866755e8a9178b51582d4ee938fb51cdee";

        let base = vec![
            Utxo {
                tx_id: consumed_id.into(),
                output_index: 0,
                address: "addr_test1vpunknown".into(),
                lovelace: "1".into(),
                ..Default::default()
            },
            Utxo {
                tx_id: "11".repeat(32),
                output_index: 3,
                address: "addr_test1vpother".into(),
                lovelace: "2".into(),
                ..Default::default()
            },
        ];

        let merged = mempool.overlay(base, |_| true);

        // the spent input is gone, the unrelated base entry and the new
        // output remain
        assert_eq!(merged.len(), 2);
        assert!(!merged
            .iter()
            .any(|u| u.tx_id == consumed_id && u.output_index == 0));
        assert!(merged.iter().any(|u| u.tx_id == tx_hash()));
    }

    #[test]
    fn overlay_respects_filter() {
        let mempool = Mempool::new();
        mempool.add_tx(test_tx(), None).unwrap();

        let merged = mempool.overlay(Vec::new(), |_| false);

        assert!(merged.is_empty());
    }

    #[tokio::test]
    async fn expired_entries_are_pruned() {
        let mempool = Mempool::new();

        mempool
            .add_tx(test_tx(), Some(SystemTime::now() - Duration::from_secs(1)))
            .unwrap();

        // prune's first pass runs before any SQL is attempted, so an
        // unreachable database doesn't keep expired entries alive
        let db = Db::unreachable_for_tests();
        mempool.prune(&db).await;

        assert!(mempool.hashes().is_empty());
    }
}
