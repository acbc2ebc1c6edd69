//! The `volatile/` half of the chain archive.
//!
//! `blocks-<NNNN>.dat` files hold a handful of recent blocks each as
//! concatenated `[era tag, block]` items. Files are small and may be
//! rewritten or deleted on rollback, so decoded blocks are kept in memory
//! and re-checked against the directory on every sync.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use tracing::{info, warn};

use super::{decode_wrapped_block, extract_chunk_id, log_and_skip, BlockPtr, RawBlock};
use crate::cbor;
use crate::prelude::Error;

pub struct VolChunk {
    mod_time: SystemTime,
    blocks: Vec<RawBlock>,
}

impl VolChunk {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let mod_time = std::fs::metadata(path)?.modified()?;
        let bytes = std::fs::read(path)?;

        let mut blocks = Vec::new();
        let mut rest = &bytes[..];

        while !rest.is_empty() {
            let parsed = cbor::item_length(rest)
                .map_err(Error::from)
                .and_then(|len| decode_wrapped_block(&rest[..len]).map(|block| (len, block)));

            match parsed {
                Ok((len, block)) => {
                    blocks.push(block);
                    rest = &rest[len..];
                }
                Err(err) => {
                    warn!(
                        block = blocks.len() + 1,
                        path = %path.display(),
                        error = %err,
                        "failed to read volatile block"
                    );
                    break;
                }
            }
        }

        Ok(Self { mod_time, blocks })
    }

    pub fn blocks(&self) -> &[RawBlock] {
        &self.blocks
    }

    pub fn tip(&self) -> String {
        match self.blocks.last() {
            Some(block) => block.hash.clone(),
            None => String::new(),
        }
    }

    fn index_blocks(&self, ptrs: &mut HashMap<String, BlockPtr>, chunk_id: u32) {
        for (i, block) in self.blocks.iter().enumerate() {
            ptrs.insert(
                block.hash.clone(),
                BlockPtr {
                    chunk: chunk_id,
                    entry: i as u32,
                },
            );
        }
    }

    fn unindex_blocks(&self, ptrs: &mut HashMap<String, BlockPtr>) {
        for block in &self.blocks {
            ptrs.remove(&block.hash);
        }
    }
}

#[derive(Default)]
struct Inner {
    // chunk numbering is sparse, so a map instead of a vec
    chunks: HashMap<u32, VolChunk>,

    block_ptrs: Option<HashMap<String, BlockPtr>>,
}

impl Inner {
    fn latest_chunk_id(&self) -> Option<u32> {
        self.chunks.keys().max().copied()
    }
}

pub struct VolatileStore {
    dir: PathBuf,
    inner: RwLock<Inner>,
}

impl VolatileStore {
    pub fn load(dir: PathBuf) -> Result<Self, Error> {
        let mut inner = Inner::default();

        for dirent in std::fs::read_dir(&dir)? {
            let path = dirent?.path();

            if path.extension().and_then(|e| e.to_str()) != Some("dat") {
                continue;
            }

            let Some(id) = log_and_skip("skipping volatile file", extract_chunk_id(&path)) else {
                continue;
            };

            let Some(chunk) = log_and_skip("failed to read volatile chunk", VolChunk::load(&path))
            else {
                continue;
            };

            inner.chunks.insert(id, chunk);
        }

        info!(chunks = inner.chunks.len(), "loaded volatile chunks");

        Ok(Self {
            dir,
            inner: RwLock::new(inner),
        })
    }

    fn chunk_path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("blocks-{id:04}.dat"))
    }

    pub fn tip(&self) -> String {
        let inner = self.inner.read().unwrap();

        match inner.latest_chunk_id().and_then(|id| inner.chunks.get(&id)) {
            Some(chunk) => chunk.tip(),
            None => String::new(),
        }
    }

    pub fn sync(&self) {
        self.sync_loaded_chunks();
        self.sync_new_chunks();
        self.prune_orphaned_ptrs();
    }

    /// Every loaded chunk is re-checked: deleted files drop out, rewritten
    /// files are reloaded and reindexed.
    fn sync_loaded_chunks(&self) {
        let mut inner = self.inner.write().unwrap();

        let chunk_ids: Vec<u32> = inner.chunks.keys().copied().collect();

        for chunk_id in chunk_ids {
            let path = self.chunk_path(chunk_id);

            let mod_time = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    info!(path = %path.display(), "removing volatile chunk");

                    if let Some(old) = inner.chunks.remove(&chunk_id) {
                        if let Some(ptrs) = inner.block_ptrs.as_mut() {
                            old.unindex_blocks(ptrs);
                        }
                    }

                    continue;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unable to stat chunk during sync");
                    continue;
                }
            };

            let stale = inner
                .chunks
                .get(&chunk_id)
                .is_some_and(|c| mod_time > c.mod_time);

            if !stale {
                continue;
            }

            match VolChunk::load(&path) {
                Ok(reloaded) => {
                    let old = inner.chunks.remove(&chunk_id);

                    if let Some(ptrs) = inner.block_ptrs.as_mut() {
                        if let Some(old) = old {
                            old.unindex_blocks(ptrs);
                        }

                        reloaded.index_blocks(ptrs, chunk_id);
                    }

                    inner.chunks.insert(chunk_id, reloaded);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unable to reload volatile chunk");
                }
            }
        }
    }

    fn sync_new_chunks(&self) {
        let mut inner = self.inner.write().unwrap();

        let mut next_id = inner.latest_chunk_id().map(|id| id + 1).unwrap_or(0);

        loop {
            let path = self.chunk_path(next_id);

            if !path.exists() {
                break;
            }

            let chunk = match VolChunk::load(&path) {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unable to read volatile chunk");
                    break;
                }
            };

            if let Some(ptrs) = inner.block_ptrs.as_mut() {
                chunk.index_blocks(ptrs, next_id);
            }

            inner.chunks.insert(next_id, chunk);
            next_id += 1;
        }
    }

    /// Index entries whose chunk disappeared must not resolve.
    fn prune_orphaned_ptrs(&self) {
        let mut inner = self.inner.write().unwrap();

        let Inner {
            chunks, block_ptrs, ..
        } = &mut *inner;

        if let Some(ptrs) = block_ptrs.as_mut() {
            ptrs.retain(|_, ptr| chunks.contains_key(&ptr.chunk));
        }
    }

    pub fn has(&self, block_id: &str) -> bool {
        self.ensure_index();

        let inner = self.inner.read().unwrap();

        inner
            .block_ptrs
            .as_ref()
            .is_some_and(|ptrs| ptrs.contains_key(block_id))
    }

    pub fn block(&self, block_id: &str) -> Option<RawBlock> {
        self.ensure_index();

        let inner = self.inner.read().unwrap();

        let ptr = inner.block_ptrs.as_ref()?.get(block_id)?;
        let chunk = inner.chunks.get(&ptr.chunk)?;

        chunk.blocks.get(ptr.entry as usize).cloned()
    }

    fn ensure_index(&self) {
        if self.inner.read().unwrap().block_ptrs.is_some() {
            return;
        }

        let mut inner = self.inner.write().unwrap();

        if inner.block_ptrs.is_some() {
            return;
        }

        let mut ptrs = HashMap::new();

        for (chunk_id, chunk) in &inner.chunks {
            chunk.index_blocks(&mut ptrs, *chunk_id);
        }

        inner.block_ptrs = Some(ptrs);
    }
}
