//! Ephemeral in-memory object store.
//!
//! The default backend: good for tests, demos, and running the gateway
//! without a cluster. Asynchronous operations complete from spawned
//! threads so completion callbacks arrive cross-thread, exactly like the
//! librados backend delivers them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{AioComplete, Cluster, ObjectList, ObjectStat, Pool, StoreError, StoreResult};

struct Object {
    data: Vec<u8>,
    modified: SystemTime,
}

#[derive(Default)]
struct PoolData {
    objects: RwLock<BTreeMap<String, Object>>,
}

/// An in-memory cluster. Clone the `Arc` to share one cluster between
/// mounts (or hand it to a test that wants to seed objects directly).
pub struct MemCluster {
    fsid: String,
    pools: RwLock<HashMap<String, Arc<PoolData>>>,
}

impl MemCluster {
    pub fn new() -> Arc<MemCluster> {
        Arc::new(MemCluster {
            fsid: Uuid::new_v4().to_string(),
            pools: RwLock::new(HashMap::new()),
        })
    }
}

impl Cluster for MemCluster {
    fn open_pool(&self, pool: &str) -> StoreResult<Box<dyn Pool>> {
        // Opening creates the pool when missing; fresh clusters need no
        // provisioning step.
        let data = self.pools.write().entry(pool.to_string()).or_default().clone();
        Ok(Box::new(MemPool { data }))
    }

    fn create_pool(&self, name: &str) -> StoreResult<()> {
        let mut pools = self.pools.write();
        if pools.contains_key(name) {
            return Err(StoreError::Exists);
        }
        pools.insert(name.to_string(), Arc::new(PoolData::default()));
        Ok(())
    }

    fn fsid(&self) -> String {
        self.fsid.clone()
    }
}

pub struct MemPool {
    data: Arc<PoolData>,
}

impl MemPool {
    fn run<T, F>(&self, op: F, done: AioComplete<T>) -> StoreResult<()>
    where
        T: Send + 'static,
        F: FnOnce(&PoolData) -> StoreResult<T> + Send + 'static,
    {
        let data = self.data.clone();
        std::thread::Builder::new()
            .name("memstore-aio".to_string())
            .spawn(move || done(op(&data)))
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(format!("spawn: {}", e)))
    }
}

fn stat_impl(data: &PoolData, key: &str) -> StoreResult<ObjectStat> {
    let objects = data.objects.read();
    let obj = objects.get(key).ok_or(StoreError::NotFound)?;
    Ok(ObjectStat {
        size: obj.data.len() as u64,
        modified: obj.modified,
    })
}

fn read_impl(data: &PoolData, key: &str, off: u64, len: usize) -> StoreResult<Bytes> {
    let objects = data.objects.read();
    let obj = objects.get(key).ok_or(StoreError::NotFound)?;
    let off = off as usize;
    if off >= obj.data.len() {
        return Ok(Bytes::new());
    }
    let end = obj.data.len().min(off + len);
    Ok(Bytes::copy_from_slice(&obj.data[off..end]))
}

fn write_impl(data: &PoolData, key: &str, off: u64, buf: &[u8]) -> StoreResult<()> {
    let mut objects = data.objects.write();
    let obj = objects.entry(key.to_string()).or_insert_with(|| Object {
        data: Vec::new(),
        modified: SystemTime::now(),
    });
    let off = off as usize;
    if obj.data.len() < off + buf.len() {
        obj.data.resize(off + buf.len(), 0);
    }
    obj.data[off..off + buf.len()].copy_from_slice(buf);
    obj.modified = SystemTime::now();
    Ok(())
}

fn remove_impl(data: &PoolData, key: &str) -> StoreResult<()> {
    data.objects
        .write()
        .remove(key)
        .map(|_| ())
        .ok_or(StoreError::NotFound)
}

impl Pool for MemPool {
    fn stat(&self, key: &str, done: AioComplete<ObjectStat>) -> StoreResult<()> {
        let key = key.to_string();
        self.run(move |data| stat_impl(data, &key), done)
    }

    fn read(&self, key: &str, off: u64, len: usize, done: AioComplete<Bytes>) -> StoreResult<()> {
        let key = key.to_string();
        self.run(move |data| read_impl(data, &key, off, len), done)
    }

    fn write(&self, key: &str, off: u64, data: Bytes, done: AioComplete<()>) -> StoreResult<()> {
        let key = key.to_string();
        self.run(move |pool| write_impl(pool, &key, off, &data), done)
    }

    fn remove(&self, key: &str, done: AioComplete<()>) -> StoreResult<()> {
        let key = key.to_string();
        self.run(move |data| remove_impl(data, &key), done)
    }

    fn stat_sync(&self, key: &str) -> StoreResult<ObjectStat> {
        stat_impl(&self.data, key)
    }

    fn read_sync(&self, key: &str, off: u64, len: usize) -> StoreResult<Bytes> {
        read_impl(&self.data, key, off, len)
    }

    fn write_sync(&self, key: &str, off: u64, data: &[u8]) -> StoreResult<()> {
        write_impl(&self.data, key, off, data)
    }

    fn remove_sync(&self, key: &str) -> StoreResult<()> {
        remove_impl(&self.data, key)
    }

    fn list(&self) -> StoreResult<Box<dyn ObjectList>> {
        let names: Vec<String> = self.data.objects.read().keys().cloned().collect();
        Ok(Box::new(MemObjectList {
            names: names.into_iter(),
        }))
    }
}

struct MemObjectList {
    names: std::vec::IntoIter<String>,
}

impl ObjectList for MemObjectList {
    fn next_object(&mut self) -> StoreResult<Option<String>> {
        Ok(self.names.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn pool() -> Box<dyn Pool> {
        MemCluster::new().open_pool("p").unwrap()
    }

    #[test]
    fn sync_roundtrip() {
        let pool = pool();
        pool.write_sync("k", 0, b"hello").unwrap();
        let stat = pool.stat_sync("k").unwrap();
        assert_eq!(stat.size, 5);
        assert_eq!(&pool.read_sync("k", 0, 64).unwrap()[..], b"hello");
        pool.remove_sync("k").unwrap();
        assert_eq!(pool.remove_sync("k"), Err(StoreError::NotFound));
        assert_eq!(pool.stat_sync("k"), Err(StoreError::NotFound));
    }

    #[test]
    fn offset_write_extends() {
        let pool = pool();
        pool.write_sync("k", 0, b"aaaa").unwrap();
        pool.write_sync("k", 4, b"bb").unwrap();
        assert_eq!(&pool.read_sync("k", 0, 64).unwrap()[..], b"aaaabb");
    }

    #[test]
    fn async_completion_arrives_cross_thread() {
        let pool = pool();
        pool.write_sync("k", 0, b"x").unwrap();
        let (tx, rx) = mpsc::channel();
        let issuer = std::thread::current().id();
        pool.stat(
            "k",
            Box::new(move |res| {
                assert_ne!(std::thread::current().id(), issuer);
                tx.send(res).unwrap();
            }),
        )
        .unwrap();
        let stat = rx.recv().unwrap().unwrap();
        assert_eq!(stat.size, 1);
    }

    #[test]
    fn create_pool_conflicts() {
        let cluster = MemCluster::new();
        cluster.create_pool("p").unwrap();
        assert_eq!(cluster.create_pool("p"), Err(StoreError::Exists));
    }

    #[test]
    fn list_yields_every_object() {
        let pool = pool();
        pool.write_sync("b", 0, b"2").unwrap();
        pool.write_sync("a", 0, b"1").unwrap();
        let mut cursor = pool.list().unwrap();
        let mut names = Vec::new();
        while let Some(name) = cursor.next_object().unwrap() {
            names.push(name);
        }
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
