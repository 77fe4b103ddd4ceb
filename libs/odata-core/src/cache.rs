//! Bounded memoization of compiled plans.
//!
//! Keys combine the schema version, the root type and the normalized option
//! text, so publishing a new schema makes every older entry unreachable.
//! Concurrent requests for the same key share one computation; failed
//! computations are never stored.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::notification::RemovalCause;
use moka::sync::Cache;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::error::Error;
use crate::plan::QueryPlan;
use crate::schema::SchemaVersion;

/// Identity of a compiled plan.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlanKey {
    pub version: SchemaVersion,
    pub root_type: String,
    /// Output of [`crate::QueryOptions::normalized`].
    pub options: String,
}

impl PlanKey {
    #[must_use]
    pub fn new(version: SchemaVersion, root_type: impl Into<String>, options: impl Into<String>) -> Self {
        Self {
            version,
            root_type: root_type.into(),
            options: options.into(),
        }
    }
}

/// Point-in-time counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Concurrent plan cache with single-flight computation.
#[derive(Clone)]
pub struct PlanCache {
    cache: Cache<PlanKey, Arc<QueryPlan>>,
    counters: Arc<Counters>,
}

impl PlanCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        let counters = Arc::new(Counters::default());
        let listener_counters = Arc::clone(&counters);

        let mut builder = Cache::builder()
            .max_capacity(config.max_entries)
            .eviction_listener(move |key: Arc<PlanKey>, _plan, cause| {
                if matches!(cause, RemovalCause::Size | RemovalCause::Expired) {
                    listener_counters.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        schema_version = %key.version,
                        root_type = %key.root_type,
                        ?cause,
                        "plan evicted"
                    );
                }
            });
        if let Some(ttl) = config.ttl {
            builder = builder.time_to_live(ttl);
        }

        Self {
            cache: builder.build(),
            counters,
        }
    }

    /// Returns the cached plan for `key` or runs `compute` once for all
    /// concurrent callers of the same key.
    ///
    /// A caller that waited on another caller's computation and received
    /// `Error::Cancelled` computes again unless its own `cancel` fired.
    ///
    /// # Errors
    /// Whatever `compute` returned; the failure is not cached and the next
    /// call computes again.
    pub fn get_or_compute<F>(
        &self,
        key: PlanKey,
        cancel: &CancellationToken,
        mut compute: F,
    ) -> Result<Arc<QueryPlan>, Error>
    where
        F: FnMut() -> Result<QueryPlan, Error>,
    {
        let mut computed = false;
        let result = loop {
            let mut ran = false;
            let result = self.cache.try_get_with_by_ref(&key, || {
                ran = true;
                compute().map(Arc::new)
            });
            computed |= ran;
            match result {
                Err(err) if !ran && matches!(*err, Error::Cancelled) && !cancel.is_cancelled() => {
                    tracing::debug!(
                        schema_version = %key.version,
                        root_type = %key.root_type,
                        "shared computation cancelled, retrying"
                    );
                }
                other => break other,
            }
        };

        let counter = if computed {
            &self.counters.misses
        } else {
            &self.counters.hits
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            schema_version = %key.version,
            root_type = %key.root_type,
            hit = !computed,
            "plan cache lookup"
        );

        result.map_err(Arc::unwrap_or_clone)
    }

    #[must_use]
    pub fn get(&self, key: &PlanKey) -> Option<Arc<QueryPlan>> {
        self.cache.get(key)
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Applies pending evictions; mainly useful before reading stats.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
        }
    }
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
