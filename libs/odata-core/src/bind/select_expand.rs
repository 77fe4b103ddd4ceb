//! Binding of `$select` paths and `$expand` trees, nested options included.

use crate::error::{BindError, Error};
use crate::options::QueryOption;
use crate::schema::TypeId;
use crate::syntax::{
    ExpandItem, ExpandOptions, ExpandTarget, PathExpr, RawValue, SelectExpandClauseTree,
    SelectItem, Span,
};

use super::{Binder, BoundNode, BoundOrderBy, EdmType, PathStep, PropertyPath};

#[derive(Clone, Debug, PartialEq)]
pub enum BoundSelectItem {
    Wildcard,
    Path(PropertyPath),
}

/// Bound options of one query level: the request itself or the nested
/// options of an expanded navigation. Paging values stay raw until
/// translation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoundQuery {
    pub filter: Option<BoundNode>,
    pub orderby: Vec<BoundOrderBy>,
    pub select: Vec<BoundSelectItem>,
    pub expand: Vec<BoundExpandItem>,
    pub top: Option<RawValue>,
    pub skip: Option<RawValue>,
    pub count: Option<RawValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoundExpandItem {
    /// Path to the navigation, including casts and complex hops.
    pub path: PropertyPath,
    pub navigation: String,
    pub target: TypeId,
    pub collection: bool,
    pub options: BoundQuery,
    pub span: Span,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoundSelectExpand {
    pub select: Vec<BoundSelectItem>,
    pub expand: Vec<BoundExpandItem>,
}

impl Binder<'_> {
    /// Binds both clauses, tagging failures with the option they came from.
    ///
    /// # Errors
    /// `Error::Bind` for unresolved paths or invalid nested options.
    pub fn bind_select_expand(
        &mut self,
        tree: &SelectExpandClauseTree,
    ) -> Result<BoundSelectExpand, Error> {
        let select = self
            .bind_select(&tree.select)
            .map_err(|e| Error::bind(QueryOption::Select, e))?;
        let expand = self
            .bind_expand(&tree.expand)
            .map_err(|e| Error::bind(QueryOption::Expand, e))?;
        Ok(BoundSelectExpand { select, expand })
    }

    /// Binds `$select` items; paths must end in a property of the current
    /// type and may not cross a navigation.
    ///
    /// # Errors
    /// `BindError` for unknown members, bad casts and invalid paths.
    pub fn bind_select(&mut self, items: &[SelectItem]) -> Result<Vec<BoundSelectItem>, BindError> {
        items
            .iter()
            .map(|item| match item {
                SelectItem::Wildcard(_) => Ok(BoundSelectItem::Wildcard),
                SelectItem::Path(path) => self.select_path(path).map(BoundSelectItem::Path),
            })
            .collect()
    }

    fn select_path(&self, expr: &PathExpr) -> Result<PropertyPath, BindError> {
        let node = self.walk(expr)?;
        let path = node.as_path().cloned().unwrap_or_else(|| PropertyPath::root(PropertyPath::IT));

        if let Some(index) = crossed_navigation(&path) {
            return Err(BindError::InvalidPath {
                detail: format!(
                    "$select cannot traverse navigation '{}'; use $expand",
                    path.steps[index].name()
                ),
                position: expr.positions.get(index).copied().unwrap_or(expr.span.start),
            });
        }
        if matches!(path.steps.last(), Some(PathStep::Cast { .. }) | None) {
            return Err(BindError::InvalidPath {
                detail: "$select path must end in a property".to_owned(),
                position: expr.span.start,
            });
        }
        Ok(path)
    }

    /// Binds `$expand` items and their nested options.
    ///
    /// # Errors
    /// `BindError::NotExpandable` when a path does not end in a navigation,
    /// plus any error from binding nested options.
    pub fn bind_expand(&mut self, items: &[ExpandItem]) -> Result<Vec<BoundExpandItem>, BindError> {
        let mut bound = Vec::with_capacity(items.len());
        for item in items {
            self.check_cancelled()?;
            match &item.target {
                ExpandTarget::Wildcard => {
                    let navigations: Vec<_> = self
                        .schema
                        .navigations(self.root)
                        .map(|n| (n.name.clone(), n.target, n.is_collection(), n.is_nullable()))
                        .collect();
                    for (name, target, collection, nullable) in navigations {
                        let mut path = PropertyPath::root(PropertyPath::IT);
                        path.push(PathStep::Navigation {
                            name: name.clone(),
                            nullable,
                            collection,
                        });
                        bound.push(BoundExpandItem {
                            path,
                            navigation: name,
                            target,
                            collection,
                            options: self.expand_options(target, &item.options)?,
                            span: item.span,
                        });
                    }
                }
                ExpandTarget::Path(expr) => bound.push(self.expand_path(expr, item)?),
            }
        }
        Ok(bound)
    }

    fn expand_path(&self, expr: &PathExpr, item: &ExpandItem) -> Result<BoundExpandItem, BindError> {
        let node = self.walk(expr)?;
        let path = node.as_path().cloned().unwrap_or_else(|| PropertyPath::root(PropertyPath::IT));
        let last_at = expr.positions.last().copied().unwrap_or(expr.span.start);

        if let Some(index) = crossed_navigation(&path) {
            return Err(BindError::InvalidPath {
                detail: format!(
                    "$expand cannot traverse navigation '{}'; nest a $expand instead",
                    path.steps[index].name()
                ),
                position: expr.positions.get(index).copied().unwrap_or(expr.span.start),
            });
        }

        let Some(PathStep::Navigation {
            name, collection, ..
        }) = path.steps.last()
        else {
            let name = path.steps.last().map_or("", PathStep::name).to_owned();
            let containing = self.parent_type_name(expr)?;
            return Err(BindError::NotExpandable {
                name,
                containing_type: containing,
                position: last_at,
            });
        };

        let target = node
            .ty
            .structured_id()
            .ok_or_else(|| BindError::InvalidPath {
                detail: format!("navigation '{name}' has no entity target"),
                position: last_at,
            })?;
        Ok(BoundExpandItem {
            navigation: name.clone(),
            collection: *collection,
            target,
            options: self.expand_options(target, &item.options)?,
            span: item.span,
            path,
        })
    }

    /// Type owning the last segment of `expr`.
    fn parent_type_name(&self, expr: &PathExpr) -> Result<String, BindError> {
        let len = expr.segments.len().saturating_sub(1);
        let parent = PathExpr {
            segments: expr.segments[..len].to_vec(),
            positions: expr.positions[..len.min(expr.positions.len())].to_vec(),
            span: expr.span,
        };
        let ty = if parent.segments.is_empty() {
            EdmType::Structured(self.root)
        } else {
            self.walk(&parent)?.ty
        };
        Ok(self.describe(&ty))
    }

    fn expand_options(
        &self,
        target: TypeId,
        options: &ExpandOptions,
    ) -> Result<BoundQuery, BindError> {
        let mut nested = self.rebased(target);
        let filter = options
            .filter
            .as_ref()
            .map(|f| nested.bind_filter(f))
            .transpose()?;
        let orderby = match &options.orderby {
            Some(items) => nested.bind_orderby(items)?,
            None => Vec::new(),
        };
        let select = match &options.select {
            Some(items) => nested.bind_select(items)?,
            None => Vec::new(),
        };
        let expand = match &options.expand {
            Some(items) => nested.bind_expand(items)?,
            None => Vec::new(),
        };
        Ok(BoundQuery {
            filter,
            orderby,
            select,
            expand,
            top: options.top.clone(),
            skip: options.skip.clone(),
            count: options.count.clone(),
        })
    }

    /// Resolves every segment of a `/`-separated path from `$it`.
    fn walk(&self, expr: &PathExpr) -> Result<BoundNode, BindError> {
        let mut node = self.it(expr.span);
        for (segment, &at) in expr.segments.iter().zip(&expr.positions) {
            self.check_cancelled()?;
            let span = Span::new(expr.span.start, at + segment.chars().count());
            node = if segment.contains('.') {
                self.cast_segment(node, segment, at, span)?
            } else {
                self.member(node, segment, at, span)?
            };
        }
        Ok(node)
    }
}

/// Index of a navigation step that is not the last step.
fn crossed_navigation(path: &PropertyPath) -> Option<usize> {
    let inner = path.steps.len().saturating_sub(1);
    path.steps[..inner]
        .iter()
        .position(|s| matches!(s, PathStep::Navigation { .. }))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::lexer::tokenize;
    use crate::schema::{Multiplicity, Schema, SchemaBuilder, TypeDescription};
    use crate::syntax::parse_select_expand;

    fn schema() -> Schema {
        SchemaBuilder::new("Sales")
            .with_type(TypeDescription::complex("Address").property("City", "Edm.String"))
            .with_type(
                TypeDescription::entity("Customer")
                    .key("Id")
                    .required("Id", "Edm.Int32")
                    .property("Name", "Edm.String")
                    .property("Address", "Address")
                    .navigation("Orders", "Order", Multiplicity::Many)
                    .navigation("Manager", "Customer", Multiplicity::ZeroOrOne),
            )
            .with_type(
                TypeDescription::entity("Order")
                    .key("Id")
                    .required("Id", "Edm.Int32")
                    .property("Amount", "Edm.Decimal")
                    .navigation("Lines", "Line", Multiplicity::Many),
            )
            .with_type(
                TypeDescription::entity("Line")
                    .key("No")
                    .required("No", "Edm.Int32"),
            )
            .build()
            .unwrap()
    }

    fn bind(select: Option<&str>, expand: Option<&str>) -> Result<BoundSelectExpand, Error> {
        let schema = schema();
        let select = select.map(|s| tokenize(s).unwrap());
        let expand = expand.map(|s| tokenize(s).unwrap());
        let tree = parse_select_expand(select.as_ref(), expand.as_ref()).unwrap();
        let root = schema.find_type("Customer").unwrap();
        let cancel = CancellationToken::new();
        Binder::new(&schema, root, &cancel).bind_select_expand(&tree)
    }

    #[test]
    fn select_paths_resolve_through_complex_types() {
        let bound = bind(Some("Name,Address/City"), None).unwrap();
        let paths: Vec<String> = bound
            .select
            .iter()
            .map(|s| match s {
                BoundSelectItem::Path(p) => p.to_string(),
                BoundSelectItem::Wildcard => "*".to_owned(),
            })
            .collect();
        assert_eq!(paths, vec!["Name", "Address/City"]);
    }

    #[test]
    fn select_unknown_property_reports_offset() {
        let err = bind(Some("Name,Address/Zip"), None).unwrap_err();
        assert_eq!(err.option(), Some(QueryOption::Select));
        assert_eq!(err.offset(), Some(13));
    }

    #[test]
    fn offsets_survive_spaces_around_slash() {
        let err = bind(Some("Address / Bogus"), None).unwrap_err();
        assert_eq!(err.offset(), Some(10));

        let err = bind(Some("Name, Address /  Zip"), None).unwrap_err();
        assert_eq!(err.offset(), Some(17));

        let err = bind(None, Some("Address / City")).unwrap_err();
        assert_eq!(err.offset(), Some(10));
    }

    #[test]
    fn select_cannot_cross_navigation() {
        let err = bind(Some("Manager/Name"), None).unwrap_err();
        assert_eq!(err.code(), "odata.bind.invalid_path");
        assert_eq!(err.offset(), Some(0));
    }

    #[test]
    fn expand_binds_nested_options_against_target() {
        let bound = bind(
            None,
            Some("Orders($filter=Amount gt 10;$orderby=Id desc;$top=5;$expand=Lines)"),
        )
        .unwrap();
        let orders = &bound.expand[0];
        assert_eq!(orders.navigation, "Orders");
        assert!(orders.collection);
        assert!(orders.options.filter.is_some());
        assert_eq!(orders.options.orderby.len(), 1);
        assert_eq!(orders.options.top.as_ref().unwrap().text, "5");
        assert_eq!(orders.options.expand[0].navigation, "Lines");
    }

    #[test]
    fn nested_filter_errors_belong_to_expand() {
        let err = bind(None, Some("Orders($filter=Name eq 'x')")).unwrap_err();
        assert_eq!(err.option(), Some(QueryOption::Expand));
        assert_eq!(err.code(), "odata.bind.unknown_property");
        assert_eq!(err.offset(), Some(15));
    }

    #[test]
    fn expand_of_structural_property_is_rejected() {
        let err = bind(None, Some("Name")).unwrap_err();
        let Error::Bind { source, .. } = err else {
            panic!("expected bind error");
        };
        assert_eq!(
            source,
            BindError::NotExpandable {
                name: "Name".to_owned(),
                containing_type: "Sales.Customer".to_owned(),
                position: 0,
            }
        );
    }

    #[test]
    fn wildcard_expands_every_navigation() {
        let bound = bind(None, Some("*")).unwrap();
        let names: Vec<_> = bound.expand.iter().map(|e| e.navigation.as_str()).collect();
        assert_eq!(names, vec!["Orders", "Manager"]);
    }
}
