//! 带 TTL 的内存映射
//!
//! 条目记录最后写入时间；后台清理任务每个 tick 扫描一次，淘汰超过 TTL 的条目。
//! TTL 为 0 时不启动清理任务。

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::StorageError;

struct Entry<V> {
    value: V,
    touched: Instant,
}

type Entries<K, V> = Arc<RwLock<HashMap<K, Entry<V>>>>;

pub struct TtlMap<K, V> {
    entries: Entries<K, V>,
    ttl: Duration,
    sweeper: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// 不淘汰的映射。
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::ZERO,
            sweeper: Mutex::new(None),
        }
    }

    /// 启动清理任务（需要在 tokio 运行时内调用）。
    pub fn with_ttl(name: &'static str, ttl: Duration, tick: Duration) -> Self {
        let map = Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            sweeper: Mutex::new(None),
        };
        if ttl.is_zero() {
            return map;
        }
        let (quit_tx, mut quit_rx) = oneshot::channel();
        let entries = map.entries.clone();
        let tick = if tick.is_zero() { ttl } else { tick };
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut quit_rx => break,
                    _ = ticker.tick() => {
                        let evicted = sweep(&entries, ttl);
                        if evicted > 0 {
                            debug!(target: "crop.storage", store = name, evicted, "ttl_sweep");
                        }
                    }
                }
            }
        });
        if let Ok(mut slot) = map.sweeper.lock() {
            *slot = Some((quit_tx, handle));
        }
        map
    }

    pub fn get(&self, key: &K) -> Result<Option<V>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(entries.get(key).and_then(|entry| {
            if self.is_expired(entry) {
                None
            } else {
                Some(entry.value.clone())
            }
        }))
    }

    pub fn insert(&self, key: K, value: V) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        entries.insert(
            key,
            Entry {
                value,
                touched: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn remove(&self, key: &K) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        entries.remove(key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 停止清理任务。
    pub fn close(&self) {
        let taken = self.sweeper.lock().ok().and_then(|mut slot| slot.take());
        if let Some((quit_tx, handle)) = taken {
            let _ = quit_tx.send(());
            drop(handle);
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        !self.ttl.is_zero() && entry.touched.elapsed() > self.ttl
    }
}

impl<K, V> Default for TtlMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for TtlMap<K, V> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some((quit_tx, _)) = slot.take() {
                let _ = quit_tx.send(());
            }
        }
    }
}

fn sweep<K, V>(entries: &Entries<K, V>, ttl: Duration) -> usize
where
    K: Eq + Hash,
{
    let Ok(mut entries) = entries.write() else {
        return 0;
    };
    let before = entries.len();
    entries.retain(|_, entry| entry.touched.elapsed() <= ttl);
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweeper_evicts_and_close_stops_it() {
        let map: TtlMap<u64, u64> =
            TtlMap::with_ttl("test", Duration::from_millis(30), Duration::from_millis(10));
        map.insert(1, 10).expect("insert");
        assert_eq!(map.get(&1).expect("get"), Some(10));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(map.get(&1).expect("get"), None);
        assert!(map.is_empty());

        assert!(map.is_sweeping());
        map.close();
        assert!(!map.is_sweeping());
    }

    #[test]
    fn zero_ttl_never_expires() {
        let map: TtlMap<u64, &'static str> = TtlMap::new();
        map.insert(1, "a").expect("insert");
        assert_eq!(map.get(&1).expect("get"), Some("a"));
        assert!(!map.is_sweeping());
    }
}
