//! Checkpoint index: sparse timestamp-to-location mapping
//!
//! During a build, the producer drops a checkpoint every N events, recording
//! where it was in its input. Later runs use `binary_search` to find the
//! checkpoint covering a timestamp and resume reading from its location
//! instead of replaying the whole input.
//!
//! Two views over the same checkpoints: a B-tree keyed by timestamp for
//! floor lookups, and a rank table for O(1) positional access. They are
//! persisted to two companion files and only ever restored together; any
//! disagreement between them discards both, and the caller rebuilds.

pub mod btree;
pub mod rank;

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use btree::{CheckpointBTree, Key};
pub use rank::{Checkpoint, RankTable};

/// Suffixes of the two companion files, appended to the history file path
const RANK_SUFFIX: &str = ".idx-rank";
const BTREE_SUFFIX: &str = ".idx-btree";

const RANK_MAGIC: &[u8; 4] = b"CPRK";
const BTREE_MAGIC: &[u8; 4] = b"CPBT";
const INDEX_VERSION: u32 = 1;

/// Fixed header: magic(4) version(4) count(4) complete(1) crc(4)
const INDEX_HEADER_SIZE: usize = 17;

/// Errors from checkpoint index persistence
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint index corrupted: {0}")]
    Corruption(String),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Timestamp-keyed checkpoint index with positional access
#[derive(Debug, Default)]
pub struct CheckpointIndex {
    btree: CheckpointBTree,
    ranks: RankTable,
}

impl CheckpointIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a checkpoint, returning its rank
    pub fn insert(&mut self, timestamp: i64, location: u64) -> u32 {
        let rank = self.ranks.push(timestamp, location);
        self.btree.insert(Key { timestamp, rank });
        rank
    }

    /// Rank of the checkpoint with the largest timestamp <= `t`, `None`
    /// before the first checkpoint. Duplicate timestamps resolve to the
    /// latest one.
    pub fn binary_search(&self, t: i64) -> Option<u32> {
        self.btree
            .floor(Key {
                timestamp: t,
                rank: u32::MAX,
            })
            .map(|key| key.rank)
    }

    pub fn get(&self, rank: u32) -> Option<&Checkpoint> {
        self.ranks.get(rank)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Persist both views next to the history file at `base`
    pub fn save(&self, base: &Path) -> IndexResult<()> {
        let rank_order: Vec<&Checkpoint> = self.ranks.iter().collect();
        write_index_file(&companion(base, RANK_SUFFIX), RANK_MAGIC, &rank_order)?;

        let mut time_order = rank_order;
        time_order.sort_by_key(|cp| (cp.timestamp, cp.rank));
        write_index_file(&companion(base, BTREE_SUFFIX), BTREE_MAGIC, &time_order)?;

        info!(checkpoints = self.len(), "saved checkpoint index");
        Ok(())
    }

    /// Restore the index from the companion files of `base`.
    ///
    /// Returns `(index, restored)`. Both files must exist, verify, and
    /// agree; otherwise both are deleted and an empty index comes back with
    /// `restored == false` so the caller rebuilds from scratch. Partial
    /// recovery is never attempted.
    pub fn open(base: &Path) -> (Self, bool) {
        match Self::try_load(base) {
            Ok(index) => {
                info!(checkpoints = index.len(), "restored checkpoint index");
                (index, true)
            }
            Err(e) => {
                warn!(error = %e, "checkpoint index not restorable, discarding");
                for suffix in [RANK_SUFFIX, BTREE_SUFFIX] {
                    let path = companion(base, suffix);
                    if let Err(e) = fs::remove_file(&path) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %path.display(), error = %e, "failed to remove stale index file");
                        }
                    }
                }
                (Self::new(), false)
            }
        }
    }

    fn try_load(base: &Path) -> IndexResult<Self> {
        let rank_records = read_index_file(&companion(base, RANK_SUFFIX), RANK_MAGIC)?;
        let btree_records = read_index_file(&companion(base, BTREE_SUFFIX), BTREE_MAGIC)?;

        if rank_records.len() != btree_records.len() {
            return Err(IndexError::Corruption(format!(
                "rank file has {} checkpoints, btree file has {}",
                rank_records.len(),
                btree_records.len()
            )));
        }

        let mut ranks = RankTable::new();
        for (position, cp) in rank_records.iter().enumerate() {
            if cp.rank as usize != position {
                return Err(IndexError::Corruption(format!(
                    "checkpoint at position {} carries rank {}",
                    position, cp.rank
                )));
            }
            ranks.push(cp.timestamp, cp.location);
        }

        let mut btree = CheckpointBTree::new();
        for cp in &btree_records {
            btree.insert(Key {
                timestamp: cp.timestamp,
                rank: cp.rank,
            });
        }

        debug!(checkpoints = rank_records.len(), "checkpoint files verified");
        Ok(Self { btree, ranks })
    }
}

fn companion(base: &Path, suffix: &str) -> PathBuf {
    let mut os = base.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

fn header_bytes(magic: &[u8; 4], count: u32, complete: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(INDEX_HEADER_SIZE);
    buf.extend_from_slice(magic);
    buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    buf.push(complete as u8);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Write one index file: header, then checksummed bincode records. The
/// complete flag is only set once every record is on disk.
fn write_index_file(
    path: &Path,
    magic: &[u8; 4],
    checkpoints: &[&Checkpoint],
) -> IndexResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);

    let count = checkpoints.len() as u32;
    writer.write_all(&header_bytes(magic, count, false))?;
    for cp in checkpoints {
        let payload = bincode::serialize(cp)?;
        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    }
    writer.flush()?;

    let mut file = writer.into_inner().map_err(|e| e.into_error())?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header_bytes(magic, count, true))?;
    file.sync_data()?;
    Ok(())
}

fn read_index_file(path: &Path, magic: &[u8; 4]) -> IndexResult<Vec<Checkpoint>> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut header = [0u8; INDEX_HEADER_SIZE];
    reader.read_exact(&mut header)?;
    if &header[0..4] != magic {
        return Err(IndexError::Corruption("bad magic bytes".into()));
    }
    let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
    if version != INDEX_VERSION {
        return Err(IndexError::Corruption(format!(
            "index version {} not supported",
            version
        )));
    }
    let count = u32::from_le_bytes(header[8..12].try_into().unwrap());
    if header[12] == 0 {
        return Err(IndexError::Corruption(
            "index file was not completely written".into(),
        ));
    }
    let stored_crc = u32::from_le_bytes(header[13..17].try_into().unwrap());
    if stored_crc != crc32fast::hash(&header[0..13]) {
        return Err(IndexError::Corruption("header checksum mismatch".into()));
    }

    let mut checkpoints = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        // Checkpoint records are tiny; a huge length is a corrupt file
        if len > 1024 {
            return Err(IndexError::Corruption(format!(
                "implausible record length {}",
                len
            )));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf)?;
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            return Err(IndexError::Corruption(
                "record checksum mismatch".into(),
            ));
        }
        checkpoints.push(bincode::deserialize(&payload)?);
    }

    Ok(checkpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_index() -> CheckpointIndex {
        let mut index = CheckpointIndex::new();
        for i in 0..100i64 {
            index.insert(i * 1000, (i * 4096) as u64);
        }
        index
    }

    #[test]
    fn test_insert_and_search() {
        let index = sample_index();
        assert_eq!(index.len(), 100);

        assert_eq!(index.binary_search(-1), None);
        assert_eq!(index.binary_search(0), Some(0));
        assert_eq!(index.binary_search(999), Some(0));
        assert_eq!(index.binary_search(50_500), Some(50));
        assert_eq!(index.binary_search(i64::MAX), Some(99));

        let cp = index.get(50).unwrap();
        assert_eq!(cp.timestamp, 50_000);
        assert_eq!(cp.location, 50 * 4096);
    }

    #[test]
    fn test_save_and_restore() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("history.ht");

        sample_index().save(&base).unwrap();
        let (restored, ok) = CheckpointIndex::open(&base);
        assert!(ok);
        assert_eq!(restored.len(), 100);
        assert_eq!(restored.binary_search(42_123), Some(42));
        assert_eq!(restored.get(42).unwrap().location, 42 * 4096);
    }

    #[test]
    fn test_missing_files_mean_not_restored() {
        let dir = tempdir().unwrap();
        let (index, ok) = CheckpointIndex::open(&dir.path().join("nothing.ht"));
        assert!(!ok);
        assert!(index.is_empty());
    }

    #[test]
    fn test_one_missing_file_discards_the_other() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("history.ht");
        sample_index().save(&base).unwrap();

        fs::remove_file(companion(&base, BTREE_SUFFIX)).unwrap();
        let (_, ok) = CheckpointIndex::open(&base);
        assert!(!ok);
        // The survivor was discarded too
        assert!(!companion(&base, RANK_SUFFIX).exists());
    }

    #[test]
    fn test_corrupt_record_means_not_restored() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("history.ht");
        sample_index().save(&base).unwrap();

        let rank_path = companion(&base, RANK_SUFFIX);
        let mut bytes = fs::read(&rank_path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        fs::write(&rank_path, bytes).unwrap();

        let (index, ok) = CheckpointIndex::open(&base);
        assert!(!ok);
        assert!(index.is_empty());
        assert!(!companion(&base, BTREE_SUFFIX).exists());
    }

    #[test]
    fn test_count_disagreement_discards_both() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("history.ht");
        sample_index().save(&base).unwrap();

        // Rewrite the btree file with one fewer checkpoint
        let mut smaller = CheckpointIndex::new();
        for i in 0..99i64 {
            smaller.insert(i * 1000, i as u64);
        }
        let time_order: Vec<&Checkpoint> = smaller.ranks.iter().collect();
        write_index_file(&companion(&base, BTREE_SUFFIX), BTREE_MAGIC, &time_order).unwrap();

        let (_, ok) = CheckpointIndex::open(&base);
        assert!(!ok);
    }

    #[test]
    fn test_duplicate_timestamps() {
        let mut index = CheckpointIndex::new();
        index.insert(100, 1);
        index.insert(100, 2);
        index.insert(100, 3);

        // The latest checkpoint at the timestamp wins
        assert_eq!(index.binary_search(100), Some(2));
        assert_eq!(index.get(2).unwrap().location, 3);
    }
}
