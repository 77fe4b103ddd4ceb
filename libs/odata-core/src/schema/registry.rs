use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use super::Schema;

/// Monotonically increasing publication stamp. Part of every plan cache key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SchemaVersion(u64);

impl SchemaVersion {
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A schema together with the version it was published under.
#[derive(Debug)]
pub struct PublishedSchema {
    version: SchemaVersion,
    schema: Arc<Schema>,
}

impl PublishedSchema {
    #[must_use]
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

impl Deref for PublishedSchema {
    type Target = Schema;

    fn deref(&self) -> &Schema {
        &self.schema
    }
}

/// Copy-on-write holder of the current schema.
///
/// Readers take a snapshot with [`SchemaRegistry::current`] and keep using it
/// for the whole request; a concurrent [`SchemaRegistry::publish`] swaps in a
/// fully built schema and never mutates one a reader holds.
pub struct SchemaRegistry {
    current: ArcSwap<PublishedSchema>,
}

impl SchemaRegistry {
    /// Registry whose first publication is `schema` at version 1.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            current: ArcSwap::from_pointee(PublishedSchema {
                version: SchemaVersion::default().next(),
                schema: Arc::new(schema),
            }),
        }
    }

    /// Snapshot of the currently published schema.
    #[must_use]
    pub fn current(&self) -> Arc<PublishedSchema> {
        self.current.load_full()
    }

    #[must_use]
    pub fn version(&self) -> SchemaVersion {
        self.current.load().version
    }

    /// Atomically replaces the schema and returns its new version.
    pub fn publish(&self, schema: Schema) -> SchemaVersion {
        let schema = Arc::new(schema);
        let previous = self.current.rcu(|cur| PublishedSchema {
            version: cur.version.next(),
            schema: Arc::clone(&schema),
        });
        let version = previous.version.next();
        tracing::info!(
            schema_version = %version,
            namespace = %schema.namespace(),
            "published schema"
        );
        version
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::schema::{SchemaBuilder, TypeDescription};

    fn schema(ns: &str) -> Schema {
        SchemaBuilder::new(ns)
            .with_type(TypeDescription::entity("Thing"))
            .build()
            .unwrap()
    }

    #[test]
    fn versions_increase_on_publish() {
        let registry = SchemaRegistry::new(schema("A"));
        assert_eq!(registry.version(), SchemaVersion::new(1));

        let v2 = registry.publish(schema("B"));
        assert_eq!(v2, SchemaVersion::new(2));
        assert_eq!(registry.current().namespace(), "B");
    }

    #[test]
    fn snapshots_survive_republication() {
        let registry = SchemaRegistry::new(schema("A"));
        let snapshot = registry.current();
        registry.publish(schema("B"));

        assert_eq!(snapshot.namespace(), "A");
        assert_eq!(snapshot.version(), SchemaVersion::new(1));
    }

    #[test]
    fn concurrent_publishes_get_distinct_versions() {
        let registry = SchemaRegistry::new(schema("A"));
        let mut versions: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| registry.publish(schema("B"))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        versions.sort();
        versions.dedup();
        assert_eq!(versions.len(), 8);
        assert_eq!(registry.version(), SchemaVersion::new(9));
    }
}
