//! Complete in-process mirrors of small reference tables.
//!
//! Caches are loaded once from a row stream and afterwards only change
//! through explicit inserts, or through removals when a rollback drops the
//! rows they mirror. Nothing expires.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tzindex_codec::Prim;
use tzindex_core::IndexerError;

use crate::model::{Constant, Proposal, ProposalId};

// ─── Stats ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub updates: u64,
    pub inserts: u64,
    pub size: u64,
    /// Approximate heap usage of the cached values.
    pub bytes: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size={} bytes={} hits={} misses={} inserts={} updates={}",
            self.size, self.bytes, self.hits, self.misses, self.inserts, self.updates
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    updates: AtomicU64,
    inserts: AtomicU64,
}

impl Counters {
    fn lookup<T>(&self, v: Option<T>) -> Option<T> {
        let c = if v.is_some() { &self.hits } else { &self.misses };
        c.fetch_add(1, Ordering::Relaxed);
        v
    }

    fn snapshot(&self, size: usize, bytes: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            size: size as u64,
            bytes: bytes as u64,
        }
    }
}

// ─── Proposals ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ProposalInner {
    by_id: HashMap<ProposalId, String>,
    by_hash: HashMap<String, ProposalId>,
    /// Next id to hand out; never decreases.
    next_id: ProposalId,
}

/// Proposal id → protocol hash.
#[derive(Default)]
pub struct ProposalCache {
    inner: RwLock<ProposalInner>,
    counters: Counters,
}

impl ProposalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with every row of `rows`.
    pub async fn build<S>(&self, rows: S) -> Result<usize, IndexerError>
    where
        S: Stream<Item = Result<Proposal, IndexerError>>,
    {
        let mut fresh = ProposalInner {
            next_id: 1,
            ..Default::default()
        };
        futures::pin_mut!(rows);
        while let Some(row) = rows.next().await {
            let p = row?;
            fresh.next_id = fresh.next_id.max(p.id + 1);
            fresh.by_hash.insert(p.hash.clone(), p.id);
            fresh.by_id.insert(p.id, p.hash);
        }
        let n = fresh.by_id.len();
        let mut inner = self.inner.write().unwrap();
        fresh.next_id = fresh.next_id.max(inner.next_id);
        *inner = fresh;
        Ok(n)
    }

    pub fn get_hash(&self, id: ProposalId) -> Option<String> {
        let inner = self.inner.read().unwrap();
        self.counters.lookup(inner.by_id.get(&id).cloned())
    }

    pub fn get_id(&self, hash: &str) -> Option<ProposalId> {
        let inner = self.inner.read().unwrap();
        self.counters.lookup(inner.by_hash.get(hash).copied())
    }

    /// Id the next new proposal receives.
    pub fn next_id(&self) -> ProposalId {
        self.inner.read().unwrap().next_id.max(1)
    }

    /// Add a proposal created by a committed block.
    pub fn insert(&self, id: ProposalId, hash: impl Into<String>) {
        let hash = hash.into();
        let mut inner = self.inner.write().unwrap();
        inner.next_id = inner.next_id.max(id + 1);
        let c = match inner.by_id.insert(id, hash.clone()) {
            Some(prev) => {
                inner.by_hash.remove(&prev);
                &self.counters.updates
            }
            None => &self.counters.inserts,
        };
        inner.by_hash.insert(hash, id);
        c.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop a proposal whose creating block was rolled back.
    pub fn remove(&self, id: ProposalId) {
        let mut inner = self.inner.write().unwrap();
        if let Some(hash) = inner.by_id.remove(&id) {
            inner.by_hash.remove(&hash);
            self.counters.updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read().unwrap();
        let bytes: usize = inner.by_id.values().map(|h| 2 * (h.len() + 8)).sum();
        self.counters.snapshot(inner.by_id.len(), bytes)
    }
}

// ─── Constants ────────────────────────────────────────────────────────────────

/// Global constant hash → value, used to expand scripts.
#[derive(Default)]
pub struct ConstantCache {
    inner: RwLock<HashMap<String, Prim>>,
    counters: Counters,
}

impl ConstantCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn build<S>(&self, rows: S) -> Result<usize, IndexerError>
    where
        S: Stream<Item = Result<Constant, IndexerError>>,
    {
        let mut fresh = HashMap::new();
        futures::pin_mut!(rows);
        while let Some(row) = rows.next().await {
            let c = row?;
            fresh.insert(c.address, c.value);
        }
        let n = fresh.len();
        *self.inner.write().unwrap() = fresh;
        Ok(n)
    }

    pub fn get(&self, hash: &str) -> Option<Prim> {
        let inner = self.inner.read().unwrap();
        self.counters.lookup(inner.get(hash).cloned())
    }

    pub fn insert(&self, hash: impl Into<String>, value: Prim) {
        let prev = self.inner.write().unwrap().insert(hash.into(), value);
        let c = if prev.is_some() {
            &self.counters.updates
        } else {
            &self.counters.inserts
        };
        c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remove(&self, hash: &str) {
        if self.inner.write().unwrap().remove(hash).is_some() {
            self.counters.updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read().unwrap();
        let bytes: usize = inner
            .iter()
            .map(|(k, v)| k.len() + v.to_bytes().len())
            .sum();
        self.counters.snapshot(inner.len(), bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(id: ProposalId, hash: &str) -> Result<Proposal, IndexerError> {
        Ok(Proposal {
            id,
            hash: hash.into(),
            height: 100,
            period: 40,
            source_id: 1,
        })
    }

    #[tokio::test]
    async fn proposal_cache_builds_and_counts() {
        let cache = ProposalCache::new();
        let rows = futures::stream::iter(vec![proposal(1, "PtEdo"), proposal(4, "PtFlo")]);
        assert_eq!(cache.build(rows).await.unwrap(), 2);

        assert_eq!(cache.get_hash(4).as_deref(), Some("PtFlo"));
        assert!(cache.get_hash(2).is_none());
        assert_eq!(cache.get_id("PtEdo"), Some(1));

        assert_eq!(cache.next_id(), 5);
        cache.insert(5, "PtGra");
        assert_eq!(cache.get_id("PtGra"), Some(5));
        assert_eq!(cache.next_id(), 6);

        let s = cache.stats();
        assert_eq!((s.hits, s.misses, s.inserts, s.size), (3, 1, 1, 3));
        assert!(s.to_string().starts_with("size=3"));
    }

    #[tokio::test]
    async fn proposal_ids_not_reused_after_rollback() {
        let cache = ProposalCache::new();
        cache.build(futures::stream::empty()).await.unwrap();
        let a = cache.next_id();
        cache.insert(a, "PtA");
        cache.remove(a);
        assert!(cache.get_hash(a).is_none());
        assert!(cache.next_id() > a);
    }

    #[tokio::test]
    async fn build_error_keeps_previous_contents() {
        let cache = ProposalCache::new();
        cache
            .build(futures::stream::iter(vec![proposal(1, "PtA")]))
            .await
            .unwrap();
        let rows = futures::stream::iter(vec![
            proposal(2, "PtB"),
            Err(IndexerError::Storage("read failed".into())),
        ]);
        assert!(cache.build(rows).await.is_err());
        assert_eq!(cache.get_id("PtA"), Some(1));
        assert!(cache.get_id("PtB").is_none());
    }

    #[tokio::test]
    async fn constant_cache_patch() {
        let cache = ConstantCache::new();
        let rows = futures::stream::iter(vec![Ok(Constant::new("exprA", 1, 10, Prim::int(1)))]);
        assert_eq!(cache.build(rows).await.unwrap(), 1);
        assert_eq!(cache.get("exprA"), Some(Prim::int(1)));

        cache.insert("exprB", Prim::string("x"));
        cache.remove("exprA");
        assert!(cache.get("exprA").is_none());
        assert_eq!(cache.len(), 1);
        let s = cache.stats();
        assert_eq!(s.inserts, 1);
        assert_eq!(s.updates, 1);
        assert!(s.bytes > 0);
    }
}
