use lmdb::{Database, Environment, Transaction, WriteFlags};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, Location};

/// Names accepted by [`IndexType::from_str`].
pub const INDEX_TYPES: &[&str] = &["sparse_mem_array", "btree_mem", "hash_mem", "lmdb"];

/// Pending LMDB writes are committed in transactions of this many entries.
const LMDB_WRITE_BATCH: usize = 100_000;

/// Id-keyed map used by the spatial index stores.
pub trait IdMap<V> {
    fn set(&mut self, id: i64, value: V) -> Result<()>;

    /// Only meaningful after [`IdMap::finalize`].
    fn get(&self, id: i64) -> Result<Option<V>>;

    /// Prepare for lookups. Calling it again is a no-op.
    fn finalize(&mut self) -> Result<()>;

    fn memory_used(&self) -> usize;
}

/// Values that can be stored in an [`IdMap`], including the on-disk backend.
pub trait IndexValue: Copy + 'static {
    const ENCODED_LEN: usize;

    fn encode(&self) -> Vec<u8>;

    fn decode(bytes: &[u8]) -> Option<Self>;
}

impl IndexValue for Location {
    const ENCODED_LEN: usize = 16;

    fn encode(&self) -> Vec<u8> {
        [self.lon.to_be_bytes(), self.lat.to_be_bytes()].concat()
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let lon = f64::from_be_bytes(bytes[0..8].try_into().ok()?);
        let lat = f64::from_be_bytes(bytes[8..16].try_into().ok()?);
        Some(Location::new(lon, lat))
    }
}

impl IndexValue for BoundingBox {
    const ENCODED_LEN: usize = 32;

    fn encode(&self) -> Vec<u8> {
        // Invalid boxes are never stored; encode them as NaN corners anyway.
        let corners = self.as_array().unwrap_or([f64::NAN; 4]);
        corners.iter().flat_map(|c| c.to_be_bytes()).collect()
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let mut corners = [0.0; 4];
        for (i, chunk) in bytes.chunks_exact(8).enumerate() {
            corners[i] = f64::from_be_bytes(chunk.try_into().ok()?);
        }
        Some(BoundingBox::from_corners(
            Location::new(corners[0], corners[1]),
            Location::new(corners[2], corners[3]),
        ))
    }
}

/// Backend selection, parsed from a name such as `lmdb,/var/tmp/nodes.db`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IndexType {
    #[default]
    SparseMemArray,
    BTreeMem,
    HashMem,
    Lmdb(Option<PathBuf>),
}

impl FromStr for IndexType {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let (kind, option) = match name.split_once(',') {
            Some((kind, option)) => (kind, Some(option)),
            None => (name, None),
        };

        match (kind, option) {
            ("sparse_mem_array", None) => Ok(IndexType::SparseMemArray),
            ("btree_mem", None) => Ok(IndexType::BTreeMem),
            ("hash_mem", None) => Ok(IndexType::HashMem),
            ("lmdb", None) => Ok(IndexType::Lmdb(None)),
            ("lmdb", Some(path)) if !path.is_empty() => Ok(IndexType::Lmdb(Some(path.into()))),
            _ => Err(Error::UnknownIndexType(name.to_string())),
        }
    }
}

impl IndexType {
    pub fn name(&self) -> &'static str {
        match self {
            IndexType::SparseMemArray => "sparse_mem_array",
            IndexType::BTreeMem => "btree_mem",
            IndexType::HashMem => "hash_mem",
            IndexType::Lmdb(_) => "lmdb",
        }
    }

    pub fn create_map<V: IndexValue>(&self) -> Result<Box<dyn IdMap<V>>> {
        let map: Box<dyn IdMap<V>> = match self {
            IndexType::SparseMemArray => Box::new(SparseMemArray::<V>::default()),
            IndexType::BTreeMem => Box::new(BTreeMem::<V>::default()),
            IndexType::HashMem => Box::new(HashMem::<V>::default()),
            IndexType::Lmdb(path) => Box::new(LmdbMap::<V>::new(path.as_deref())?),
        };
        Ok(map)
    }
}

/// Append-only vector, sorted once on finalize and searched by id.
pub struct SparseMemArray<V> {
    entries: Vec<(i64, V)>,
}

impl<V> Default for SparseMemArray<V> {
    fn default() -> Self {
        SparseMemArray {
            entries: Vec::new(),
        }
    }
}

impl<V: IndexValue> IdMap<V> for SparseMemArray<V> {
    fn set(&mut self, id: i64, value: V) -> Result<()> {
        self.entries.push((id, value));
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Option<V>> {
        Ok(self
            .entries
            .binary_search_by_key(&id, |&(entry_id, _)| entry_id)
            .ok()
            .map(|pos| self.entries[pos].1))
    }

    fn finalize(&mut self) -> Result<()> {
        // Stable sort, then keep the last write for every id.
        self.entries.sort_by_key(|&(id, _)| id);
        self.entries.reverse();
        self.entries.dedup_by_key(|&mut (id, _)| id);
        self.entries.reverse();
        self.entries.shrink_to_fit();
        Ok(())
    }

    fn memory_used(&self) -> usize {
        self.entries.capacity() * mem::size_of::<(i64, V)>()
    }
}

pub struct BTreeMem<V> {
    map: BTreeMap<i64, V>,
}

impl<V> Default for BTreeMem<V> {
    fn default() -> Self {
        BTreeMem {
            map: BTreeMap::new(),
        }
    }
}

impl<V: IndexValue> IdMap<V> for BTreeMem<V> {
    fn set(&mut self, id: i64, value: V) -> Result<()> {
        self.map.insert(id, value);
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Option<V>> {
        Ok(self.map.get(&id).copied())
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }

    fn memory_used(&self) -> usize {
        // Rough: entries only, node overhead not counted.
        self.map.len() * mem::size_of::<(i64, V)>()
    }
}

pub struct HashMem<V> {
    map: HashMap<i64, V>,
}

impl<V> Default for HashMem<V> {
    fn default() -> Self {
        HashMem {
            map: HashMap::new(),
        }
    }
}

impl<V: IndexValue> IdMap<V> for HashMem<V> {
    fn set(&mut self, id: i64, value: V) -> Result<()> {
        self.map.insert(id, value);
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Option<V>> {
        Ok(self.map.get(&id).copied())
    }

    fn finalize(&mut self) -> Result<()> {
        self.map.shrink_to_fit();
        Ok(())
    }

    fn memory_used(&self) -> usize {
        self.map.capacity() * mem::size_of::<(i64, V)>()
    }
}

/// Disk-based id map using LMDB, for inputs whose node locations do not fit
/// in memory.
pub struct LmdbMap<V> {
    env: Environment,
    db: Database,
    path: PathBuf,
    pending: Vec<(i64, V)>,
    // Removed (with the database) on drop when we created it.
    temp_dir: Option<TempDir>,
}

impl<V: IndexValue> LmdbMap<V> {
    /// Create the database at `db_path`, or in a fresh temp dir if `None`.
    pub fn new(db_path: Option<&Path>) -> Result<Self> {
        let (path, temp_dir) = match db_path {
            Some(path) => (path.to_path_buf(), None),
            None => {
                let temp_dir = tempfile::tempdir()?;
                (temp_dir.path().join("index.lmdb"), Some(temp_dir))
            }
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let env = Environment::new()
            .set_flags(lmdb::EnvironmentFlags::NO_SUB_DIR)
            .set_max_readers(126)
            .set_map_size(500 * 1024 * 1024 * 1024) // 500GB max map size for planet files
            .open(&path)?;

        let db = env.open_db(None)?;

        // The index never outlives a run; drop whatever an earlier one left.
        let mut txn = env.begin_rw_txn()?;
        txn.clear_db(db)?;
        txn.commit()?;
        log::debug!("LMDB index opened at {}", path.display());

        Ok(LmdbMap {
            env,
            db,
            path,
            pending: Vec::new(),
            temp_dir,
        })
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut txn = self.env.begin_rw_txn()?;
        for (id, value) in self.pending.drain(..) {
            txn.put(self.db, &id.to_be_bytes(), &value.encode(), WriteFlags::empty())?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl<V: IndexValue> IdMap<V> for LmdbMap<V> {
    fn set(&mut self, id: i64, value: V) -> Result<()> {
        self.pending.push((id, value));
        if self.pending.len() >= LMDB_WRITE_BATCH {
            self.flush()?;
        }
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Option<V>> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.db, &id.to_be_bytes()) {
            Ok(value) => Ok(V::decode(value)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn finalize(&mut self) -> Result<()> {
        self.flush()?;
        self.env.sync(true)?;
        Ok(())
    }

    fn memory_used(&self) -> usize {
        let on_disk = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        usize::try_from(on_disk).unwrap_or(usize::MAX)
            + self.pending.capacity() * mem::size_of::<(i64, V)>()
    }
}

impl<V> Drop for LmdbMap<V> {
    fn drop(&mut self) {
        if self.temp_dir.is_some() {
            log::debug!("Removing temporary LMDB index {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(index_type: &IndexType) -> Result<()> {
        let mut map: Box<dyn IdMap<Location>> = index_type.create_map()?;

        map.set(123, Location::new(-74.0060, 40.7128))?; // NYC
        map.set(-456, Location::new(-0.1278, 51.5074))?; // London
        map.set(123, Location::new(1.0, 2.0))?; // overwritten
        map.finalize()?;
        map.finalize()?;

        assert_eq!(map.get(123)?, Some(Location::new(1.0, 2.0)));
        assert_eq!(map.get(-456)?, Some(Location::new(-0.1278, 51.5074)));
        assert_eq!(map.get(999)?, None);
        assert!(map.memory_used() > 0);
        Ok(())
    }

    #[test]
    fn test_memory_backends() -> Result<()> {
        exercise(&IndexType::SparseMemArray)?;
        exercise(&IndexType::BTreeMem)?;
        exercise(&IndexType::HashMem)
    }

    #[test]
    fn test_lmdb_backend_in_temp_dir() -> Result<()> {
        exercise(&IndexType::Lmdb(None))
    }

    #[test]
    fn test_lmdb_backend_at_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("nodes.lmdb");
        exercise(&IndexType::Lmdb(Some(path.clone())))?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_lmdb_reopened_path_starts_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index_type = IndexType::Lmdb(Some(dir.path().join("nodes.lmdb")));

        {
            let mut first: Box<dyn IdMap<Location>> = index_type.create_map()?;
            first.set(1, Location::new(50.0, 50.0))?;
            first.finalize()?;
            assert_eq!(first.get(1)?, Some(Location::new(50.0, 50.0)));
        }

        let mut second: Box<dyn IdMap<Location>> = index_type.create_map()?;
        second.set(2, Location::new(0.0, 0.0))?;
        second.finalize()?;
        assert_eq!(second.get(1)?, None);
        assert_eq!(second.get(2)?, Some(Location::new(0.0, 0.0)));
        Ok(())
    }

    #[test]
    fn test_bbox_encoding() {
        let bbox = BoundingBox::from_corners(Location::new(0.0, 0.0), Location::new(10.0, 10.0));
        assert_eq!(BoundingBox::decode(&bbox.encode()), Some(bbox));
        assert_eq!(BoundingBox::decode(&[0u8; 3]), None);
    }

    #[test]
    fn test_parse_index_type() {
        assert_eq!(
            "sparse_mem_array".parse::<IndexType>().unwrap(),
            IndexType::SparseMemArray
        );
        assert_eq!(
            "lmdb,/tmp/x.lmdb".parse::<IndexType>().unwrap(),
            IndexType::Lmdb(Some(PathBuf::from("/tmp/x.lmdb")))
        );

        let err = "flex_mem".parse::<IndexType>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown index type 'flex_mem'. Use --show-index-types or -I to get a list."
        );
        assert!("hash_mem,opt".parse::<IndexType>().is_err());
    }
}
