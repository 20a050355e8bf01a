//! 分类结果缓存：`lru::LruCache` 负责容量与淘汰顺序，值旁边记录写入时刻，过期在读取时惰性删除
//!
//! 任何访问模式下都不会返回超过 TTL 的条目。本结构不自带锁，由 Classifier 以 Mutex 包裹后共享。

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::Classification;

/// 意图识别使用的缓存：键为规范化话语的 SHA256
pub type ClassificationCache = TtlLruCache<String, Classification>;

/// 带 TTL 的 LRU 缓存
pub struct TtlLruCache<K: Hash + Eq, V> {
    entries: LruCache<K, (V, Instant)>,
    ttl: Duration,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlLruCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn put(&mut self, key: K, value: V) {
        self.put_at(key, value, Instant::now())
    }

    /// 以给定时刻读取：过期则删除并返回 None，命中则移到最近使用
    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        let inserted_at = self.entries.peek(key)?.1;
        if now.saturating_duration_since(inserted_at) >= self.ttl {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).map(|(value, _)| value.clone())
    }

    /// 以给定时刻写入：已存在则更新并移到最近使用；满容量时淘汰最久未用
    pub fn put_at(&mut self, key: K, value: V, now: Instant) {
        self.entries.put(key, (value, now));
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key).map(|(value, _)| value)
    }

    /// 主动清理所有已过期条目，返回清理数量
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, (_, at))| now.saturating_duration_since(*at) >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 物理存在的条目数（可能包含尚未被读到的过期条目）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 从最近使用到最久未用的键序列
    pub fn keys_by_recency(&self) -> Vec<K> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize, ttl_secs: u64) -> TtlLruCache<String, u32> {
        TtlLruCache::new(capacity, Duration::from_secs(ttl_secs))
    }

    #[test]
    fn test_get_missing() {
        let mut c = cache(2, 60);
        assert_eq!(c.get(&"a".to_string()), None);
    }

    #[test]
    fn test_zero_capacity_holds_one_entry() {
        let mut c = cache(0, 60);
        c.put("a".into(), 1);
        c.put("b".into(), 2);
        assert_eq!(c.capacity(), 1);
        assert_eq!(c.keys_by_recency(), vec!["b"]);
    }

    #[test]
    fn test_capacity_bound_evicts_lru() {
        let mut c = cache(3, 60);
        let t0 = Instant::now();
        for (i, k) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            c.put_at(k.to_string(), i as u32, t0);
        }
        assert_eq!(c.len(), 3);
        assert_eq!(c.keys_by_recency(), vec!["e", "d", "c"]);
        assert_eq!(c.get_at(&"a".to_string(), t0), None);
        assert_eq!(c.get_at(&"b".to_string(), t0), None);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut c = cache(2, 60);
        let t0 = Instant::now();
        c.put_at("a".into(), 1, t0);
        c.put_at("b".into(), 2, t0);
        assert_eq!(c.get_at(&"a".to_string(), t0 + Duration::from_secs(1)), Some(1));
        c.put_at("c".into(), 3, t0);

        assert_eq!(c.get_at(&"a".to_string(), t0), Some(1));
        assert_eq!(c.get_at(&"b".to_string(), t0), None);
        assert_eq!(c.keys_by_recency(), vec!["a", "c"]);
    }

    #[test]
    fn test_put_existing_updates_without_growing() {
        let mut c = cache(2, 60);
        let t0 = Instant::now();
        c.put_at("a".into(), 1, t0);
        c.put_at("b".into(), 2, t0);
        c.put_at("a".into(), 10, t0);
        assert_eq!(c.len(), 2);
        assert_eq!(c.keys_by_recency(), vec!["a", "b"]);
        assert_eq!(c.get_at(&"a".to_string(), t0), Some(10));
    }

    #[test]
    fn test_lazy_ttl_expiry() {
        let mut c = cache(4, 300);
        let t0 = Instant::now();
        c.put_at("a".into(), 1, t0);

        assert_eq!(c.get_at(&"a".to_string(), t0 + Duration::from_secs(299)), Some(1));
        // 访问不会延长寿命
        assert_eq!(c.get_at(&"a".to_string(), t0 + Duration::from_secs(300)), None);
        assert!(c.is_empty());
    }

    #[test]
    fn test_expired_entry_physically_present_until_read() {
        let mut c = cache(4, 10);
        let t0 = Instant::now();
        c.put_at("a".into(), 1, t0);
        c.put_at("b".into(), 2, t0 + Duration::from_secs(5));
        assert_eq!(c.len(), 2);

        let later = t0 + Duration::from_secs(11);
        assert_eq!(c.purge_expired(later), 1);
        assert_eq!(c.get_at(&"b".to_string(), later), Some(2));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut c = cache(4, 60);
        c.put("a".into(), 1);
        c.put("b".into(), 2);
        assert_eq!(c.remove(&"a".to_string()), Some(1));
        assert_eq!(c.remove(&"a".to_string()), None);
        c.clear();
        assert!(c.is_empty());
        assert!(c.keys_by_recency().is_empty());
    }
}
