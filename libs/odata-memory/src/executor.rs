use std::cmp::Ordering;

use odata_core::{
    BoundOrderBy, ExecutionError, ExecutionResult, PathStep, PlanExecutor, PropertyPath, QueryPlan,
    Selection, SortDir,
};
use serde_json::{Map, Value as Json};

use crate::error::EvalError;
use crate::eval::{self, Scope, TYPE_ANNOTATION};

/// Runs plans over a slice of JSON objects.
///
/// Navigation properties are expected inline: a collection navigation is an
/// array of objects, a single one is an object or null. Derived instances
/// name their type in `@odata.type`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryExecutor;

impl PlanExecutor for MemoryExecutor {
    type Source = [Json];
    type Item = Json;

    fn execute(
        &self,
        plan: &QueryPlan,
        source: &[Json],
    ) -> Result<ExecutionResult<Json>, ExecutionError> {
        if let Some(index) = source.iter().position(|row| !row.is_object()) {
            return Err(EvalError::NotAnObject { index }.into());
        }
        let rows: Vec<&Json> = source.iter().collect();
        let result = run(plan, &rows)?;
        tracing::debug!(
            root_type = %plan.root_type,
            input = source.len(),
            output = result.items.len(),
            "executed plan"
        );
        Ok(result)
    }
}

fn run(plan: &QueryPlan, rows: &[&Json]) -> Result<ExecutionResult<Json>, EvalError> {
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        let keep = match &plan.predicate {
            Some(predicate) => eval::matches(predicate, &Scope::new(row))?,
            None => true,
        };
        if keep {
            kept.push(*row);
        }
    }

    let count = plan
        .count
        .then(|| u64::try_from(kept.len()).unwrap_or(u64::MAX));
    if !plan.order_by.is_empty() {
        kept = sort(kept, &plan.order_by)?;
    }

    let skip = plan
        .skip
        .map_or(0, |s| usize::try_from(s).unwrap_or(usize::MAX));
    let top = plan
        .top
        .map_or(usize::MAX, |t| usize::try_from(t).unwrap_or(usize::MAX));
    let items = kept
        .into_iter()
        .skip(skip)
        .take(top)
        .map(|row| shape(plan, row))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ExecutionResult { items, count })
}

/// Stable sort by the evaluated `$orderby` keys.
fn sort<'a>(rows: Vec<&'a Json>, order_by: &[BoundOrderBy]) -> Result<Vec<&'a Json>, EvalError> {
    let mut keyed = rows
        .into_iter()
        .map(|row| {
            let scope = Scope::new(row);
            let keys = order_by
                .iter()
                .map(|item| eval::eval(&item.expr, &scope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((keys, row))
        })
        .collect::<Result<Vec<_>, EvalError>>()?;

    keyed.sort_by(|(a, _), (b, _)| {
        for ((x, y), item) in a.iter().zip(b).zip(order_by) {
            let ord = match item.dir {
                SortDir::Asc => x.sort_cmp(y),
                SortDir::Desc => x.sort_cmp(y).reverse(),
            };
            if ord.is_ne() {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

/// Applies projection and expansion to one instance.
fn shape(plan: &QueryPlan, row: &Json) -> Result<Json, EvalError> {
    let mut out = match &plan.select {
        Selection::All => row.as_object().cloned().unwrap_or_default(),
        Selection::Paths(paths) => project(row, paths),
    };

    let scope = Scope::new(row);
    for expand in &plan.expand {
        let value = match eval::resolve(&expand.path, &scope) {
            Some(Json::Array(items)) => {
                let refs: Vec<&Json> = items.iter().filter(|i| i.is_object()).collect();
                let nested = run(&expand.plan, &refs)?;
                if let Some(count) = nested.count {
                    out.insert(format!("{}@odata.count", expand.navigation), count.into());
                }
                Json::Array(nested.items)
            }
            Some(item) if item.is_object() => run(&expand.plan, &[item])?
                .items
                .into_iter()
                .next()
                .unwrap_or(Json::Null),
            _ => Json::Null,
        };
        out.insert(expand.navigation.clone(), value);
    }
    Ok(Json::Object(out))
}

fn project(row: &Json, paths: &[PropertyPath]) -> Map<String, Json> {
    let mut out = Map::new();
    if let Some(ty) = row.get(TYPE_ANNOTATION) {
        out.insert(TYPE_ANNOTATION.to_owned(), ty.clone());
    }
    let scope = Scope::new(row);
    for path in paths {
        let value = eval::resolve(path, &scope).cloned().unwrap_or(Json::Null);
        let names: Vec<&str> = path
            .steps
            .iter()
            .filter(|step| !matches!(step, PathStep::Cast { .. }))
            .map(PathStep::name)
            .collect();
        insert_nested(&mut out, &names, value);
    }
    out
}

fn insert_nested(map: &mut Map<String, Json>, names: &[&str], value: Json) {
    match names {
        [] => {}
        [last] => {
            map.insert((*last).to_owned(), value);
        }
        [first, rest @ ..] => {
            let entry = map
                .entry((*first).to_owned())
                .or_insert_with(|| Json::Object(Map::new()));
            if !entry.is_object() {
                *entry = Json::Object(Map::new());
            }
            if let Json::Object(inner) = entry {
                insert_nested(inner, rest, value);
            }
        }
    }
}
