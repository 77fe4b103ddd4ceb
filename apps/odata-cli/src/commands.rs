use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use odata_core::{
    CancellationToken, EngineConfig, PlanExecutor, QueryEngine, QueryOptions, QueryPlan,
    SchemaDescription,
};
use odata_memory::MemoryExecutor;
use serde_json::Value as Json;

/// Command output, or the diagnostic of a rejected query.
pub type Outcome = std::result::Result<Json, Json>;

pub fn load_engine(schema: &Path, config: &EngineConfig) -> Result<QueryEngine> {
    let text = fs::read_to_string(schema)
        .with_context(|| format!("failed to read schema {}", schema.display()))?;
    let description: SchemaDescription = if has_extension(schema, "json") {
        serde_json::from_str(&text)
            .with_context(|| format!("invalid schema {}", schema.display()))?
    } else {
        serde_saphyr::from_str(&text)
            .map_err(|e| anyhow!("invalid schema {}: {e}", schema.display()))?
    };
    let schema = description.build().context("schema is inconsistent")?;
    Ok(QueryEngine::from_config(schema, config))
}

pub fn plan(engine: &QueryEngine, root: &str, query: &str) -> Result<Outcome> {
    match compile(engine, root, query)? {
        Ok(plan) => Ok(Ok(serde_json::to_value(&*plan)?)),
        Err(rejected) => Ok(Err(rejected)),
    }
}

pub fn run(engine: &QueryEngine, root: &str, query: &str, data: &Path) -> Result<Outcome> {
    let plan = match compile(engine, root, query)? {
        Ok(plan) => plan,
        Err(rejected) => return Ok(Err(rejected)),
    };
    let text = fs::read_to_string(data)
        .with_context(|| format!("failed to read data {}", data.display()))?;
    let instances: Vec<Json> = serde_json::from_str(&text)
        .with_context(|| format!("{} must hold a JSON array of objects", data.display()))?;

    let result = MemoryExecutor.execute(&plan, &instances)?;
    tracing::info!(
        input = instances.len(),
        output = result.items.len(),
        "query executed"
    );
    Ok(Ok(serde_json::to_value(result)?))
}

fn compile(
    engine: &QueryEngine,
    root: &str,
    query: &str,
) -> Result<std::result::Result<Arc<QueryPlan>, Json>> {
    let options = match QueryOptions::parse_query(query) {
        Ok(options) => options,
        Err(err) => return Ok(Err(rejection(&err)?)),
    };
    match engine.parse_and_bind(&options, root, &CancellationToken::new()) {
        Ok(plan) => Ok(Ok(plan)),
        Err(err) => Ok(Err(rejection(&err)?)),
    }
}

fn rejection(err: &odata_core::Error) -> Result<Json> {
    Ok(serde_json::json!({ "error": serde_json::to_value(err.diagnostic())? }))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const SCHEMA: &str = r"
namespace: Sales
types:
  - name: Customer
    kind: entity
    key: [Id]
    properties:
      - { name: Id, type: Edm.Int32, nullable: false }
      - { name: Name, type: Edm.String }
";

    fn file(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn engine() -> QueryEngine {
        let schema = file(".yaml", SCHEMA);
        load_engine(schema.path(), &EngineConfig::default()).unwrap()
    }

    #[test]
    fn json_schema_is_accepted() {
        let json = r#"{"namespace": "Sales", "types": [{"name": "Customer", "kind": "entity",
            "key": ["Id"], "properties": [{"name": "Id", "type": "Edm.Int32", "nullable": false}]}]}"#;
        let schema = file(".json", json);
        assert!(load_engine(schema.path(), &EngineConfig::default()).is_ok());
    }

    #[test]
    fn broken_schema_is_an_error() {
        let schema = file(".yaml", "namespace: Sales\ntypes:\n  - name: X\n    kind: entity\n    base: Missing\n");
        let err = load_engine(schema.path(), &EngineConfig::default()).unwrap_err();
        assert!(err.to_string().contains("schema is inconsistent"));
    }

    #[test]
    fn plan_prints_json() {
        let out = plan(&engine(), "Customer", "$filter=Id gt 1&$top=2")
            .unwrap()
            .unwrap();
        assert_eq!(out["root_type"], "Sales.Customer");
        assert_eq!(out["top"], 2);
    }

    #[test]
    fn rejected_query_yields_diagnostic() {
        let out = plan(&engine(), "Customer", "$filter=Nope eq 1")
            .unwrap()
            .unwrap_err();
        assert_eq!(out["error"]["code"], "odata.bind.unknown_property");
        assert_eq!(out["error"]["option"], "$filter");
    }

    #[test]
    fn run_executes_over_data_file() {
        let data = file(
            ".json",
            r#"[{"Id": 1, "Name": "Ann"}, {"Id": 2, "Name": "Bob"}, {"Id": 3, "Name": "Cid"}]"#,
        );
        let out = run(&engine(), "Customer", "$filter=Id ge 2&$select=Name&$count=true", data.path())
            .unwrap()
            .unwrap();
        assert_eq!(
            out,
            serde_json::json!({"items": [{"Name": "Bob"}, {"Name": "Cid"}], "count": 2})
        );
    }

    #[test]
    fn data_must_be_an_array() {
        let data = file(".json", r#"{"Id": 1}"#);
        assert!(run(&engine(), "Customer", "", data.path()).is_err());
    }
}
