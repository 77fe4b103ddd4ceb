//! The `parse_and_bind` entrypoint: options bag in, query plan out.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bind::{Binder, BoundQuery};
use crate::cache::{CacheStats, PlanCache, PlanKey};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::lexer::tokenize;
use crate::limits::ODataLimits;
use crate::options::{QueryOption, QueryOptions};
use crate::plan::QueryPlan;
use crate::schema::{Schema, SchemaRegistry, SchemaVersion, TypeId};
use crate::syntax::{
    ExpandItem, RawValue, Span, parse_filter, parse_orderby, parse_select_expand,
};
use crate::translate::translate;

/// Compiles `options` against `schema` without caching.
///
/// # Errors
/// The first lexing, parsing, binding, translation or limit error, tagged with
/// the option it came from; `Error::UnknownRootType` when `root_type` does not
/// name an entity type.
pub fn parse_and_bind(
    options: &QueryOptions,
    schema: &Schema,
    root_type: &str,
    limits: &ODataLimits,
    cancel: &CancellationToken,
) -> Result<QueryPlan, Error> {
    let root = resolve_root(schema, root_type)?;
    Compiler {
        schema,
        root,
        limits,
        case_insensitive: false,
        cancel,
    }
    .compile(options)
}

/// Schema registry, plan cache and limits shared by every request.
#[derive(Debug)]
pub struct QueryEngine {
    registry: SchemaRegistry,
    cache: PlanCache,
    limits: ODataLimits,
    case_insensitive: bool,
}

impl QueryEngine {
    /// Engine with default configuration.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self::from_config(schema, &EngineConfig::default())
    }

    #[must_use]
    pub fn from_config(schema: Schema, config: &EngineConfig) -> Self {
        Self {
            registry: SchemaRegistry::new(schema),
            cache: PlanCache::new(&config.cache),
            limits: config.limits.clone(),
            case_insensitive: config.case_insensitive_properties,
        }
    }

    /// Compiles `options` for `root_type`, or returns the cached plan for
    /// the same normalized options under the current schema version.
    ///
    /// The schema is read once per call, so a concurrent publish never mixes
    /// two schema versions into one plan.
    ///
    /// # Errors
    /// See [`parse_and_bind`].
    pub fn parse_and_bind(
        &self,
        options: &QueryOptions,
        root_type: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<QueryPlan>, Error> {
        let published = self.registry.current();
        let version = published.version();
        let schema: &Schema = published.schema();

        let root = resolve_root(schema, root_type)?;
        let key = PlanKey::new(version, schema.type_name(root), options.normalized());

        self.cache
            .get_or_compute(key, cancel, || {
                let compiler = Compiler {
                    schema,
                    root,
                    limits: &self.limits,
                    case_insensitive: self.case_insensitive,
                    cancel,
                };
                compiler.compile(options)
            })
            .inspect_err(|err| log_rejection(err, version))
    }

    /// Replaces the schema; plans compiled against older versions are no
    /// longer reachable.
    pub fn publish_schema(&self, schema: Schema) -> SchemaVersion {
        self.registry.publish(schema)
    }

    #[must_use]
    pub fn schema_version(&self) -> SchemaVersion {
        self.registry.version()
    }

    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    #[must_use]
    pub fn limits(&self) -> &ODataLimits {
        &self.limits
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.run_pending_tasks();
        self.cache.stats()
    }
}

fn resolve_root(schema: &Schema, name: &str) -> Result<TypeId, Error> {
    schema
        .find_type(name)
        .filter(|id| schema.get(*id).is_entity())
        .ok_or_else(|| Error::UnknownRootType {
            name: name.to_owned(),
        })
}

fn log_rejection(err: &Error, version: SchemaVersion) {
    match err {
        Error::Cancelled => tracing::debug!(schema_version = %version, "query compilation cancelled"),
        err => tracing::debug!(
            option = ?err.option().map(QueryOption::name),
            code = err.code(),
            offset = ?err.offset(),
            schema_version = %version,
            error = %err,
            "query rejected"
        ),
    }
}

/// One compilation of one options bag.
struct Compiler<'a> {
    schema: &'a Schema,
    root: TypeId,
    limits: &'a ODataLimits,
    case_insensitive: bool,
    cancel: &'a CancellationToken,
}

impl Compiler<'_> {
    fn compile(&self, options: &QueryOptions) -> Result<QueryPlan, Error> {
        for option in [
            QueryOption::Filter,
            QueryOption::OrderBy,
            QueryOption::Select,
            QueryOption::Expand,
        ] {
            if let Some(text) = options.get(option) {
                self.limits.validate_filter(option, text)?;
            }
        }

        let mut binder =
            Binder::new(self.schema, self.root, self.cancel).case_insensitive_properties(self.case_insensitive);
        let mut query = BoundQuery::default();

        if let Some(text) = present(options, QueryOption::Filter) {
            let tokens = tokenize(text).map_err(|e| Error::lex(QueryOption::Filter, e))?;
            let tree = parse_filter(&tokens).map_err(|e| Error::syntax(QueryOption::Filter, e))?;
            self.limits
                .validate_node_count(QueryOption::Filter, tree.node_count())?;
            let bound = binder
                .bind_filter(&tree)
                .map_err(|e| Error::bind(QueryOption::Filter, e))?;
            query.filter = Some(bound);
        }

        if let Some(text) = present(options, QueryOption::OrderBy) {
            let tokens = tokenize(text).map_err(|e| Error::lex(QueryOption::OrderBy, e))?;
            let items =
                parse_orderby(&tokens).map_err(|e| Error::syntax(QueryOption::OrderBy, e))?;
            let nodes = items.iter().map(|item| item.expr.node_count()).sum();
            self.limits.validate_node_count(QueryOption::OrderBy, nodes)?;
            query.orderby = binder
                .bind_orderby(&items)
                .map_err(|e| Error::bind(QueryOption::OrderBy, e))?;
        }

        let select = present(options, QueryOption::Select)
            .map(|text| tokenize(text).map_err(|e| Error::lex(QueryOption::Select, e)))
            .transpose()?;
        let expand = present(options, QueryOption::Expand)
            .map(|text| tokenize(text).map_err(|e| Error::lex(QueryOption::Expand, e)))
            .transpose()?;
        if select.is_some() || expand.is_some() {
            let tree = parse_select_expand(select.as_ref(), expand.as_ref())?;
            validate_nested_node_counts(self.limits, &tree.expand)?;
            let bound = binder.bind_select_expand(&tree)?;
            query.select = bound.select;
            query.expand = bound.expand;
        }

        query.top = raw_value(options, QueryOption::Top);
        query.skip = raw_value(options, QueryOption::Skip);
        query.count = raw_value(options, QueryOption::Count);

        let plan = translate(self.schema, self.root, query, self.limits, self.cancel)?;
        tracing::debug!(
            root_type = %plan.root_type,
            expand_depth = plan.depth(),
            "compiled query plan"
        );
        Ok(plan)
    }
}

/// Applies the node budget to each nested `$filter` and `$orderby`.
fn validate_nested_node_counts(limits: &ODataLimits, items: &[ExpandItem]) -> Result<(), Error> {
    for item in items {
        let options = &item.options;
        if let Some(filter) = &options.filter {
            limits.validate_node_count(QueryOption::Expand, filter.node_count())?;
        }
        if let Some(orderby) = &options.orderby {
            let nodes = orderby.iter().map(|i| i.expr.node_count()).sum();
            limits.validate_node_count(QueryOption::Expand, nodes)?;
        }
        if let Some(nested) = &options.expand {
            validate_nested_node_counts(limits, nested)?;
        }
    }
    Ok(())
}

/// Option text, or `None` when the option is absent or blank.
fn present(options: &QueryOptions, option: QueryOption) -> Option<&str> {
    options.get(option).filter(|text| !text.trim().is_empty())
}

/// Scalar option value with its span inside the untrimmed option string.
fn raw_value(options: &QueryOptions, option: QueryOption) -> Option<RawValue> {
    let text = present(options, option)?;
    let leading = text.chars().take_while(|c| c.is_whitespace()).count();
    let trimmed = text.trim();
    Some(RawValue {
        text: trimmed.to_owned(),
        span: Span::new(leading, leading + trimmed.chars().count()),
    })
}
