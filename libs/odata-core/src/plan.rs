//! Backend-agnostic query plan handed to an executor.

use serde::Serialize;

use crate::bind::{BoundNode, BoundOrderBy, PropertyPath};

/// Projection of one plan level.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "paths")]
pub enum Selection {
    /// No `$select`, or `$select=*`.
    #[default]
    All,
    /// Deduplicated paths in first-seen order.
    Paths(Vec<PropertyPath>),
}

impl Selection {
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }

    #[must_use]
    pub fn paths(&self) -> &[PropertyPath] {
        match self {
            Selection::All => &[],
            Selection::Paths(paths) => paths,
        }
    }
}

/// An expanded navigation and the plan for its related entities.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpandPlan {
    pub path: PropertyPath,
    pub navigation: String,
    pub collection: bool,
    pub plan: QueryPlan,
}

/// Resolved filter, ordering, projection, expansion and paging.
///
/// Plans are immutable once built and shared as `Arc<QueryPlan>` between
/// the cache and every caller that asked for the same query.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryPlan {
    /// Qualified name of the entity type the plan applies to.
    pub root_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<BoundNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<BoundOrderBy>,
    pub select: Selection,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expand: Vec<ExpandPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    pub count: bool,
}

impl QueryPlan {
    /// Plan that returns every instance of `root_type` unchanged.
    #[must_use]
    pub fn unrestricted(root_type: impl Into<String>) -> Self {
        Self {
            root_type: root_type.into(),
            predicate: None,
            order_by: Vec::new(),
            select: Selection::All,
            expand: Vec::new(),
            top: None,
            skip: None,
            count: false,
        }
    }

    /// Nested expansion levels below this plan.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.expand
            .iter()
            .map(|e| 1 + e.plan.depth())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_plan_serializes_compactly() {
        let plan = QueryPlan::unrestricted("Sales.Customer");
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "root_type": "Sales.Customer",
                "select": { "kind": "all" },
                "count": false,
            })
        );
    }

    #[test]
    fn depth_counts_nested_expansions() {
        let mut inner = QueryPlan::unrestricted("Sales.Order");
        inner.expand.push(ExpandPlan {
            path: PropertyPath::root(PropertyPath::IT),
            navigation: "Lines".to_owned(),
            collection: true,
            plan: QueryPlan::unrestricted("Sales.Line"),
        });
        let mut outer = QueryPlan::unrestricted("Sales.Customer");
        outer.expand.push(ExpandPlan {
            path: PropertyPath::root(PropertyPath::IT),
            navigation: "Orders".to_owned(),
            collection: true,
            plan: inner,
        });
        assert_eq!(outer.depth(), 2);
    }
}
