//! The `immutable/` half of the chain archive.
//!
//! Every `<NNNNN>.chunk` file of raw blocks has a `<NNNNN>.secondary`
//! sidecar: a packed big-endian array with one entry per block (see section
//! 8.2.2 of the Ouroboros consensus report). Keeping all sidecars in memory
//! costs on the order of a gigabyte, which is still small next to the
//! db-sync database it complements.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use tracing::{info, warn};

use super::{decode_wrapped_block, extract_chunk_id, log_and_skip, BlockPtr, RawBlock};
use crate::prelude::Error;

pub const SECONDARY_ENTRY_SIZE: usize = 56;

/// One row of a `.secondary` sidecar, fixed width, big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryIndexEntry {
    pub block_offset: u64,
    pub header_offset: u16,
    pub header_size: u16,
    pub checksum: u32,
    pub block_id: [u8; 32],
    pub slot_or_epoch: u64,
}

impl SecondaryIndexEntry {
    pub fn read(bytes: &[u8; SECONDARY_ENTRY_SIZE]) -> Self {
        let mut block_id = [0u8; 32];
        block_id.copy_from_slice(&bytes[16..48]);

        Self {
            block_offset: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
            header_offset: u16::from_be_bytes(bytes[8..10].try_into().unwrap()),
            header_size: u16::from_be_bytes(bytes[10..12].try_into().unwrap()),
            checksum: u32::from_be_bytes(bytes[12..16].try_into().unwrap()),
            block_id,
            slot_or_epoch: u64::from_be_bytes(bytes[48..56].try_into().unwrap()),
        }
    }

    pub fn block_id_hex(&self) -> String {
        hex::encode(self.block_id)
    }
}

pub struct ImmChunk {
    mod_time: SystemTime,
    entries: Vec<SecondaryIndexEntry>,
}

impl ImmChunk {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut file = File::open(path)?;
        Self::read(&mut file)
    }

    pub fn read(file: &mut File) -> Result<Self, Error> {
        let mod_time = file.metadata()?.modified()?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut entries = Vec::with_capacity(bytes.len() / SECONDARY_ENTRY_SIZE);

        // trailing partial rows are dropped, same as reading until EOF
        for row in bytes.chunks_exact(SECONDARY_ENTRY_SIZE) {
            entries.push(SecondaryIndexEntry::read(row.try_into().unwrap()));
        }

        Ok(Self { mod_time, entries })
    }

    pub fn entries(&self) -> &[SecondaryIndexEntry] {
        &self.entries
    }

    pub fn tip(&self) -> String {
        match self.entries.last() {
            Some(entry) => entry.block_id_hex(),
            None => String::new(),
        }
    }

    fn index_blocks(&self, ptrs: &mut HashMap<String, BlockPtr>, chunk_id: u32) {
        for (i, entry) in self.entries.iter().enumerate() {
            ptrs.insert(
                entry.block_id_hex(),
                BlockPtr {
                    chunk: chunk_id,
                    entry: i as u32,
                },
            );
        }
    }

    fn unindex_blocks(&self, ptrs: &mut HashMap<String, BlockPtr>) {
        for entry in &self.entries {
            ptrs.remove(&entry.block_id_hex());
        }
    }
}

#[derive(Default)]
struct Inner {
    // indexed by chunk id, holes allowed
    chunks: Vec<Option<ImmChunk>>,

    // built on first lookup
    block_ptrs: Option<HashMap<String, BlockPtr>>,
}

impl Inner {
    fn latest_chunk_id(&self) -> Option<u32> {
        if self.chunks.is_empty() {
            None
        } else {
            Some(self.chunks.len() as u32 - 1)
        }
    }

    fn build_index(&mut self) {
        let mut ptrs = HashMap::new();

        for (chunk_id, chunk) in self.chunks.iter().enumerate() {
            if let Some(chunk) = chunk {
                chunk.index_blocks(&mut ptrs, chunk_id as u32);
            }
        }

        self.block_ptrs = Some(ptrs);
    }
}

pub struct ImmutableStore {
    dir: PathBuf,
    inner: RwLock<Inner>,
}

impl ImmutableStore {
    pub fn load(dir: PathBuf) -> Result<Self, Error> {
        let mut inner = Inner::default();

        for dirent in std::fs::read_dir(&dir)? {
            let path = dirent?.path();

            if path.extension().and_then(|e| e.to_str()) != Some("secondary") {
                continue;
            }

            let Some(id) = log_and_skip("skipping immutable file", extract_chunk_id(&path)) else {
                continue;
            };

            let Some(chunk) = log_and_skip("failed to read immutable chunk", ImmChunk::load(&path))
            else {
                continue;
            };

            while inner.chunks.len() < id as usize + 1 {
                inner.chunks.push(None);
            }

            inner.chunks[id as usize] = Some(chunk);
        }

        info!(chunks = inner.chunks.len(), "loaded secondary indices");

        Ok(Self {
            dir,
            inner: RwLock::new(inner),
        })
    }

    fn secondary_path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("{id:05}.secondary"))
    }

    fn chunk_path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("{id:05}.chunk"))
    }

    pub fn tip(&self) -> String {
        let inner = self.inner.read().unwrap();

        match inner.chunks.last() {
            Some(Some(chunk)) => chunk.tip(),
            _ => String::new(),
        }
    }

    pub fn sync(&self) {
        self.sync_loaded_chunks();
        self.sync_new_chunks();
    }

    /// The last chunk's sidecar is the only loaded one that may still grow;
    /// reload it when its modification time advanced.
    fn sync_loaded_chunks(&self) {
        let mut inner = self.inner.write().unwrap();

        let Some(chunk_id) = inner.latest_chunk_id() else {
            return;
        };

        let Some(chunk) = &inner.chunks[chunk_id as usize] else {
            return;
        };

        let path = self.secondary_path(chunk_id);

        let mod_time = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unable to stat chunk during sync");
                return;
            }
        };

        if mod_time <= chunk.mod_time {
            return;
        }

        match ImmChunk::load(&path) {
            Ok(reloaded) => {
                if inner.block_ptrs.is_some() {
                    let old = inner.chunks[chunk_id as usize].take();
                    let ptrs = inner.block_ptrs.as_mut().unwrap();

                    if let Some(old) = old {
                        old.unindex_blocks(ptrs);
                    }

                    reloaded.index_blocks(ptrs, chunk_id);
                }

                inner.chunks[chunk_id as usize] = Some(reloaded);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unable to reload immutable chunk");
            }
        }
    }

    fn sync_new_chunks(&self) {
        let mut inner = self.inner.write().unwrap();

        let mut next_id = inner.latest_chunk_id().map(|id| id + 1).unwrap_or(0);

        loop {
            let path = self.secondary_path(next_id);

            if !path.exists() {
                break;
            }

            let chunk = match ImmChunk::load(&path) {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unable to read immutable chunk");
                    break;
                }
            };

            if let Some(ptrs) = inner.block_ptrs.as_mut() {
                chunk.index_blocks(ptrs, next_id);
            }

            inner.chunks.push(Some(chunk));
            next_id += 1;
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

    /// Resolves a block by reading its byte span out of the chunk file. The
    /// span ends at the next entry's offset, or at EOF for the last entry.
    pub fn block(&self, block_id: &str) -> Result<Option<RawBlock>, Error> {
        self.ensure_index();

        let inner = self.inner.read().unwrap();

        let Some(ptr) = inner.block_ptrs.as_ref().and_then(|p| p.get(block_id)) else {
            return Ok(None);
        };

        let chunk = inner.chunks[ptr.chunk as usize]
            .as_ref()
            .ok_or_else(|| Error::store(format!("indexed chunk {} missing", ptr.chunk)))?;

        let entry = &chunk.entries[ptr.entry as usize];

        let mut file = File::open(self.chunk_path(ptr.chunk))?;

        file.seek(SeekFrom::Start(entry.block_offset))?;

        let is_last = ptr.entry as usize == chunk.entries.len() - 1;

        let block_size = if is_last {
            file.metadata()?.len() - entry.block_offset
        } else {
            chunk.entries[ptr.entry as usize + 1].block_offset - entry.block_offset
        };

        let mut bytes = vec![0u8; block_size as usize];
        file.read_exact(&mut bytes)?;

        decode_wrapped_block(&bytes).map(Some)
    }

    fn ensure_index(&self) {
        if self.inner.read().unwrap().block_ptrs.is_some() {
            return;
        }

        let mut inner = self.inner.write().unwrap();

        if inner.block_ptrs.is_none() {
            inner.build_index();
        }
    }
}
