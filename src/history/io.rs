//! Block-level file access for the history tree
//!
//! The file starts with a fixed 4096-byte header, followed by a grid of
//! equally-sized node blocks. Node `seq` lives at
//! `offset = HEADER_SIZE + seq * block_size`. Application data (the
//! attribute registry, typically) can be appended past the grid once the
//! tree is closed.
//!
//! Readers use positioned reads (`FileExt`), so no seek state is shared and
//! multiple threads can read concurrently while the writer appends new
//! blocks. A small direct-mapped cache of `Arc<Node>` absorbs the repeated
//! upper-node reads that tree descents produce.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::history::error::{HistoryError, HistoryResult};
use crate::history::node::Node;

/// Fixed size of the file header block
pub const HEADER_SIZE: usize = 4096;

/// Magic bytes identifying a history tree file
const MAGIC: &[u8; 4] = b"THST";

/// Version of the on-disk layout
pub const FILE_VERSION: u32 = 1;

/// Metadata stored in the file's leading block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Version of the event provider that produced this history.
    /// A mismatch on open means the history must be rebuilt.
    pub provider_version: u32,
    pub block_size: u32,
    pub max_children: u32,
    pub node_count: u32,
    pub root_seq: u32,
    pub tree_start: i64,
    /// Set only by a successful close; an unset flag on open means the
    /// history is a partial write and cannot be trusted
    pub complete: bool,
}

impl FileHeader {
    /// Serialize into exactly `HEADER_SIZE` bytes, checksum included
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FILE_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.provider_version.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.max_children.to_le_bytes());
        buf.extend_from_slice(&self.node_count.to_le_bytes());
        buf.extend_from_slice(&self.root_seq.to_le_bytes());
        buf.extend_from_slice(&self.tree_start.to_le_bytes());
        buf.push(self.complete as u8);

        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf.resize(HEADER_SIZE, 0);
        buf
    }

    /// Parse and validate a header block
    pub fn deserialize(buf: &[u8; HEADER_SIZE]) -> HistoryResult<Self> {
        if &buf[0..4] != MAGIC {
            return Err(HistoryError::Corruption(
                "bad magic bytes, not a history tree file".into(),
            ));
        }

        let read_u32 = |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());

        let file_version = read_u32(4);
        if file_version != FILE_VERSION {
            return Err(HistoryError::VersionMismatch {
                expected: FILE_VERSION,
                found: file_version,
            });
        }

        let provider_version = read_u32(8);
        let block_size = read_u32(12);
        let max_children = read_u32(16);
        let node_count = read_u32(20);
        let root_seq = read_u32(24);
        let tree_start = i64::from_le_bytes(buf[28..36].try_into().unwrap());
        let complete = buf[36] != 0;

        let stored_crc = u32::from_le_bytes(buf[37..41].try_into().unwrap());
        let computed_crc = crc32fast::hash(&buf[0..37]);
        if stored_crc != computed_crc {
            return Err(HistoryError::Corruption(format!(
                "header checksum mismatch: stored {:#x}, computed {:#x}",
                stored_crc, computed_crc
            )));
        }

        Ok(Self {
            provider_version,
            block_size,
            max_children,
            node_count,
            root_seq,
            tree_start,
            complete,
        })
    }
}

/// File-backed node storage with a direct-mapped read cache
#[derive(Debug)]
pub struct NodeStore {
    file: File,
    block_size: usize,
    max_children: usize,
    /// Slot for node `seq` is `seq % cache.len()`; a colliding insert
    /// simply replaces the previous occupant
    cache: Mutex<Vec<Option<Arc<Node>>>>,
}

impl NodeStore {
    /// Create a fresh, empty backing file, truncating any previous one
    pub fn create<P: AsRef<Path>>(
        path: P,
        block_size: usize,
        max_children: usize,
        cache_slots: usize,
    ) -> HistoryResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::with_file(file, block_size, max_children, cache_slots))
    }

    /// Open an existing backing file read/write
    pub fn open<P: AsRef<Path>>(
        path: P,
        block_size: usize,
        max_children: usize,
        cache_slots: usize,
    ) -> HistoryResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::with_file(file, block_size, max_children, cache_slots))
    }

    fn with_file(file: File, block_size: usize, max_children: usize, cache_slots: usize) -> Self {
        Self {
            file,
            block_size,
            max_children,
            cache: Mutex::new(vec![None; cache_slots.max(1)]),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Read and validate the header block
    pub fn read_header(&self) -> HistoryResult<FileHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        self.file.read_exact_at(&mut buf, 0)?;
        FileHeader::deserialize(&buf)
    }

    /// Write the header block and flush to disk
    pub fn write_header(&self, header: &FileHeader) -> HistoryResult<()> {
        self.file.write_all_at(&header.serialize(), 0)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn node_offset(&self, seq: u32) -> u64 {
        HEADER_SIZE as u64 + seq as u64 * self.block_size as u64
    }

    /// Write a node's block at its grid position and publish it to the
    /// read cache. A first write failure is retried once before escalating.
    pub fn write_node(&self, node: &Arc<Node>) -> HistoryResult<()> {
        let block = node.serialize(self.block_size, self.max_children);
        let offset = self.node_offset(node.seq());

        if let Err(e) = self.file.write_all_at(&block, offset) {
            warn!(seq = node.seq(), error = %e, "node write failed, retrying once");
            self.file.write_all_at(&block, offset)?;
        }

        self.cache_insert(Arc::clone(node));
        Ok(())
    }

    /// Fetch a node, from cache when possible.
    ///
    /// A first read failure is retried once before escalating, matching the
    /// write path. A short read past the written grid surfaces as
    /// `NodeMissing` so the caller can distinguish a lost node from file
    /// corruption.
    pub fn read_node(&self, seq: u32) -> HistoryResult<Arc<Node>> {
        {
            let cache = self.cache.lock();
            let slot = seq as usize % cache.len();
            if let Some(node) = &cache[slot] {
                if node.seq() == seq {
                    return Ok(Arc::clone(node));
                }
            }
        }

        let offset = self.node_offset(seq);
        let mut block = vec![0u8; self.block_size];
        if let Err(e) = self.file.read_exact_at(&mut block, offset) {
            warn!(seq, error = %e, "node read failed, retrying once");
            self.file.read_exact_at(&mut block, offset).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    HistoryError::NodeMissing(seq)
                } else {
                    HistoryError::Io(e)
                }
            })?;
        }

        let node = Node::deserialize(&block, self.max_children)?;
        if node.seq() != seq {
            return Err(HistoryError::Corruption(format!(
                "block at grid position {} holds node #{}",
                seq,
                node.seq()
            )));
        }

        let node = Arc::new(node);
        self.cache_insert(Arc::clone(&node));
        Ok(node)
    }

    fn cache_insert(&self, node: Arc<Node>) {
        let mut cache = self.cache.lock();
        let slot = node.seq() as usize % cache.len();
        cache[slot] = Some(node);
    }

    /// Offset of the first byte past the node grid
    fn trailing_offset(&self, node_count: u32) -> u64 {
        self.node_offset(node_count)
    }

    /// Append application data past the node grid. Only meaningful once the
    /// grid has stopped growing, i.e. after close.
    pub fn write_trailing_data(&self, node_count: u32, data: &[u8]) -> HistoryResult<()> {
        let offset = self.trailing_offset(node_count);
        let mut buf = Vec::with_capacity(4 + data.len());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);
        self.file.write_all_at(&buf, offset)?;
        self.file.set_len(offset + buf.len() as u64)?;
        self.file.sync_data()?;
        debug!(bytes = data.len(), "wrote trailing data");
        Ok(())
    }

    /// Read back the trailing application data, empty if none was written
    pub fn read_trailing_data(&self, node_count: u32) -> HistoryResult<Vec<u8>> {
        let offset = self.trailing_offset(node_count);
        let file_len = self.file.metadata()?.len();
        if file_len <= offset {
            return Ok(Vec::new());
        }

        let mut len_buf = [0u8; 4];
        self.file.read_exact_at(&mut len_buf, offset)?;
        let len = u32::from_le_bytes(len_buf) as u64;
        if offset + 4 + len > file_len {
            return Err(HistoryError::Corruption(format!(
                "trailing data claims {} bytes, file has {}",
                len,
                file_len - offset - 4
            )));
        }

        let mut data = vec![0u8; len as usize];
        self.file.read_exact_at(&mut data, offset + 4)?;
        Ok(data)
    }

    /// Flush outstanding writes to disk
    pub fn sync(&self) -> HistoryResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
