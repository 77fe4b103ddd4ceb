#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use odata_core::{CancellationToken, QueryEngine, QueryOptions};
use tracing_test::traced_test;

#[test]
#[traced_test]
fn rejected_query_is_logged_with_code_and_offset() {
    let engine = QueryEngine::new(common::schema());
    let options = QueryOptions::new().with_filter("Bogus eq 1");

    assert!(
        engine
            .parse_and_bind(&options, "Person", &CancellationToken::new())
            .is_err()
    );

    assert!(logs_contain("query rejected"));
    assert!(logs_contain("odata.bind.unknown_property"));
    assert!(logs_contain("schema_version=v1"));
}

#[test]
#[traced_test]
fn cache_hits_are_logged() {
    let engine = QueryEngine::new(common::schema());
    let options = QueryOptions::new().with_top("1");
    let cancel = CancellationToken::new();

    engine.parse_and_bind(&options, "Person", &cancel).unwrap();
    engine.parse_and_bind(&options, "Person", &cancel).unwrap();

    assert!(logs_contain("compiled query plan"));
    assert!(logs_contain("hit=true"));
}

#[test]
#[traced_test]
fn publishing_is_logged() {
    let engine = QueryEngine::new(common::schema());
    engine.publish_schema(common::schema());
    assert!(logs_contain("published schema"));
}
