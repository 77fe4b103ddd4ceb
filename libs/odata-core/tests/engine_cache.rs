#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::{Arc, Barrier};

use odata_core::{
    BindError, CacheConfig, CancellationToken, EngineConfig, Error, QueryEngine, QueryOptions,
    SchemaVersion,
};

const THREADS: usize = 8;

#[test]
fn concurrent_requests_compile_once() {
    let engine = QueryEngine::new(common::schema());
    let barrier = Barrier::new(THREADS);
    let options = QueryOptions::new()
        .with_filter("Orders/any(o: o/Amount gt 100) and Address/City eq 'Oslo'")
        .with_expand("Orders($orderby=Amount desc;$top=5)");

    let plans: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    engine
                        .parse_and_bind(&options, "Person", &CancellationToken::new())
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(plans.windows(2).all(|w| w[0] == w[1]));
    let stats = engine.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, (THREADS - 1) as u64);
    assert_eq!(stats.entries, 1);
}

#[test]
fn equivalent_option_spellings_share_an_entry() {
    let engine = QueryEngine::new(common::schema());
    let cancel = CancellationToken::new();

    let a = QueryOptions::parse_query("$top=5&$filter=Age%20gt%201").unwrap();
    let b = QueryOptions::new().with_filter(" Age gt 1 ").with_top("5");
    let first = engine.parse_and_bind(&a, "Person", &cancel).unwrap();
    let second = engine.parse_and_bind(&b, "NS.Person", &cancel).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn publishing_a_schema_invalidates_old_plans() {
    let engine = QueryEngine::new(common::schema());
    let cancel = CancellationToken::new();
    let options = QueryOptions::new().with_filter("Age gt 30");

    let old = engine.parse_and_bind(&options, "Person", &cancel).unwrap();
    assert!(old.predicate.is_some());

    let version = engine.publish_schema(common::schema_without_age());
    assert_eq!(version, SchemaVersion::new(2));

    let err = engine.parse_and_bind(&options, "Person", &cancel).unwrap_err();
    assert!(matches!(
        err,
        Error::Bind {
            source: BindError::UnknownProperty { ref name, .. },
            ..
        } if name == "Age"
    ));
}

#[test]
fn failures_are_recomputed_not_cached() {
    let engine = QueryEngine::new(common::schema());
    let cancel = CancellationToken::new();
    let options = QueryOptions::new().with_filter("Bogus eq 1");

    for _ in 0..2 {
        assert!(engine.parse_and_bind(&options, "Person", &cancel).is_err());
    }
    let stats = engine.cache_stats();
    assert_eq!((stats.misses, stats.entries), (2, 0));
}

#[test]
fn small_cache_evicts() {
    let config = EngineConfig {
        cache: CacheConfig {
            max_entries: 4,
            ttl: None,
        },
        ..EngineConfig::default()
    };
    let engine = QueryEngine::from_config(common::schema(), &config);
    let cancel = CancellationToken::new();

    for top in 0..32 {
        let options = QueryOptions::new().with_top(top.to_string());
        engine.parse_and_bind(&options, "Person", &cancel).unwrap();
    }

    let stats = engine.cache_stats();
    assert!(stats.entries <= 4, "{stats:?}");
    assert!(stats.evictions > 0, "{stats:?}");
}

#[test]
fn unknown_root_type_is_rejected() {
    let engine = QueryEngine::new(common::schema());
    let err = engine
        .parse_and_bind(&QueryOptions::new(), "NS.Nobody", &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.code(), "odata.bind.unknown_type");
}
