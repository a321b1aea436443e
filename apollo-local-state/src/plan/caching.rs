use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::Digest;
use sha2::Sha256;

use crate::error::PlanningError;
use crate::plan::QueryPlan;

/// In memory LRU cache of query plans, keyed by query text and operation name.
///
/// Only successful plans are cached.
pub(crate) struct PlanCache {
    inner: Mutex<LruCache<PlanCacheKey, Arc<QueryPlan>>>,
}

#[derive(Clone, Hash, PartialEq, Eq)]
pub(crate) struct PlanCacheKey([u8; 32]);

impl PlanCacheKey {
    pub(crate) fn new(query: &str, operation_name: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        match operation_name {
            Some(name) => {
                hasher.update([1u8]);
                hasher.update(name.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        PlanCacheKey(digest)
    }
}

impl fmt::Display for PlanCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PlanCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PlanCacheKey")
            .field(&hex::encode(self.0))
            .finish()
    }
}

impl PlanCache {
    pub(crate) fn new(limit: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(limit)),
        }
    }

    /// Returns the cached plan, or plans with `plan` and caches the result.
    pub(crate) fn get_or_plan(
        &self,
        query: &str,
        operation_name: Option<&str>,
        plan: impl FnOnce() -> Result<QueryPlan, PlanningError>,
    ) -> Result<Arc<QueryPlan>, PlanningError> {
        let key = PlanCacheKey::new(query, operation_name);
        if let Some(plan) = self.inner.lock().get(&key) {
            tracing::trace!(%key, "plan cache hit");
            return Ok(plan.clone());
        }

        tracing::trace!(%key, "plan cache miss");
        // the lock is not held while planning; concurrent misses may plan twice
        let plan = Arc::new(plan()?);
        self.inner.lock().put(key, plan.clone());
        Ok(plan)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanCache")
            .field("len", &self.len())
            .finish()
    }
}
