//! Read-only view over the node's on-disk chain archive.
//!
//! The archive has two halves: `immutable/`, large sequential chunk files
//! with fixed-width secondary indices, and `volatile/`, small files of
//! recent blocks that may still be rolled back. Secondary indices are kept
//! in memory in full; block bytes are read from disk on demand for the
//! immutable half and kept in memory for the volatile one.

mod immutable;
mod volatile;

pub use immutable::{ImmChunk, ImmutableStore, SecondaryIndexEntry, SECONDARY_ENTRY_SIZE};
pub use volatile::{VolChunk, VolatileStore};

use std::path::Path;
use std::sync::RwLock;

use pallas::ledger::traverse::MultiEraBlock;
use tracing::warn;

use crate::prelude::Error;

/// Index into a chunk and one of its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPtr {
    pub chunk: u32,
    pub entry: u32,
}

/// A block as stored on disk: a 2-array of `[era tag, block]`.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub hash: String,
    pub wrapped: Vec<u8>,
}

impl RawBlock {
    /// The block's own CBOR, without the era wrapper.
    pub fn block_cbor(&self) -> &[u8] {
        &self.wrapped[2..]
    }

    /// CBOR of the transaction at `index`, `None` when out of bounds.
    pub fn tx_cbor(&self, index: u32) -> Result<Option<Vec<u8>>, Error> {
        let block = MultiEraBlock::decode(&self.wrapped).map_err(Error::store)?;

        let txs = block.txs();

        Ok(txs.get(index as usize).map(|tx| tx.encode()))
    }
}

/// Checks the `[era tag, block]` wrapper and extracts the block hash.
///
/// The wrapper is always exactly two bytes: an array-of-2 head and a small
/// int in 0..=7 (Byron EBB through Conway).
pub fn decode_wrapped_block(bytes: &[u8]) -> Result<RawBlock, Error> {
    let header = *bytes
        .first()
        .ok_or_else(|| Error::store("empty block entry"))?;

    if header != 0x82 {
        return Err(Error::store(format!(
            "unexpected array header byte {header}"
        )));
    }

    let era = *bytes
        .get(1)
        .ok_or_else(|| Error::store("truncated block entry"))?;

    if era > 7 {
        return Err(Error::store(format!("unhandled block type {era}")));
    }

    let block = MultiEraBlock::decode(bytes).map_err(Error::store)?;

    Ok(RawBlock {
        hash: block.hash().to_string(),
        wrapped: bytes.to_vec(),
    })
}

pub struct ChainStore {
    immutable: ImmutableStore,
    volatile: VolatileStore,

    // the tip the poller last told us about; any other value triggers a
    // re-scan of the archive directories
    loaded_tip: RwLock<String>,
}

impl ChainStore {
    pub fn load(dir: &Path) -> Result<Self, Error> {
        let immutable = ImmutableStore::load(dir.join("immutable"))?;
        let volatile = VolatileStore::load(dir.join("volatile"))?;

        let mut loaded_tip = volatile.tip();

        if loaded_tip.is_empty() {
            loaded_tip = immutable.tip();
        }

        Ok(Self {
            immutable,
            volatile,
            loaded_tip: RwLock::new(loaded_tip),
        })
    }

    pub fn tip(&self) -> String {
        self.loaded_tip.read().unwrap().clone()
    }

    /// Called by the tip poller. A tip we already know is a no-op; a tip
    /// present in the volatile index just moves the marker; anything else
    /// means the archive changed on disk and both halves get re-synced.
    pub fn notify_tip(&self, tip: &str) {
        if *self.loaded_tip.read().unwrap() == tip {
            return;
        }

        // a fresh tip is almost never in the immutable half
        if self.volatile.has(tip) {
            *self.loaded_tip.write().unwrap() = tip.to_string();
            return;
        }

        self.immutable.sync();
        self.volatile.sync();

        *self.loaded_tip.write().unwrap() = tip.to_string();
    }

    /// Looks up a block by hex hash, immutable half first.
    pub fn block(&self, block_id: &str) -> Result<Option<RawBlock>, Error> {
        if let Some(block) = self.immutable.block(block_id)? {
            return Ok(Some(block));
        }

        Ok(self.volatile.block(block_id))
    }

    /// Transaction `tx_index` of block `block_id`; `None` when either the
    /// block is unknown or the index is out of bounds.
    pub fn block_tx(&self, block_id: &str, tx_index: u32) -> Result<Option<Vec<u8>>, Error> {
        let Some(block) = self.block(block_id)? else {
            return Ok(None);
        };

        block.tx_cbor(tx_index)
    }
}

/// Chunk id from a file path: basename without extension, minus an optional
/// `blocks-` style prefix, parsed as decimal.
pub fn extract_chunk_id(path: &Path) -> Result<u32, Error> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::store(format!("invalid chunk path {}", path.display())))?;

    let mut id_str = name.split('.').next().unwrap_or(name);

    if let Some((_, suffix)) = id_str.split_once('-') {
        id_str = suffix;
    }

    id_str
        .parse()
        .map_err(|_| Error::store(format!("failed to parse chunk id from {id_str}")))
}

pub(crate) fn log_and_skip<T>(context: &str, result: Result<T, Error>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, "{context}");
            None
        }
    }
}
