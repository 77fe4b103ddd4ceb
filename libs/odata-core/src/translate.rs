//! Assembles bound options into a [`QueryPlan`].
//!
//! Translation is a structural pass: it validates paging values, enforces
//! per-level limits, deduplicates `$select` paths and turns every `$expand`
//! item into a nested plan.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::bind::{BoundExpandItem, BoundQuery, BoundSelectItem};
use crate::error::{Error, TranslateError};
use crate::limits::ODataLimits;
use crate::options::QueryOption;
use crate::plan::{ExpandPlan, QueryPlan, Selection};
use crate::schema::{Schema, TypeId};
use crate::syntax::RawValue;

/// Translates bound options of the request into a plan rooted at `root`.
///
/// # Errors
/// `Error::Translate` for malformed paging or conflicting expansions,
/// `Error::LimitExceeded` and `Error::Cancelled`.
pub fn translate(
    schema: &Schema,
    root: TypeId,
    query: BoundQuery,
    limits: &ODataLimits,
    cancel: &CancellationToken,
) -> Result<QueryPlan, Error> {
    Translator {
        schema,
        limits,
        cancel,
    }
    .level(root, query, 0)
}

struct Translator<'a> {
    schema: &'a Schema,
    limits: &'a ODataLimits,
    cancel: &'a CancellationToken,
}

impl Translator<'_> {
    /// Errors from nested levels point into the `$expand` string.
    fn tag(depth: usize, option: QueryOption) -> QueryOption {
        if depth == 0 { option } else { QueryOption::Expand }
    }

    fn level(&self, root: TypeId, query: BoundQuery, depth: usize) -> Result<QueryPlan, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let BoundQuery {
            filter,
            orderby,
            select,
            expand,
            top,
            skip,
            count,
        } = query;

        self.limits
            .validate_orderby_count(Self::tag(depth, QueryOption::OrderBy), orderby.len())?;

        let top = Self::paging(top.as_ref(), QueryOption::Top, depth)?;
        if let Some(top) = top {
            self.limits.validate_top(Self::tag(depth, QueryOption::Top), top)?;
        }
        let skip = Self::paging(skip.as_ref(), QueryOption::Skip, depth)?;
        if let Some(skip) = skip {
            self.limits.validate_skip(Self::tag(depth, QueryOption::Skip), skip)?;
        }
        let count = match &count {
            Some(raw) => parse_count(raw)
                .map_err(|e| Error::translate(Self::tag(depth, QueryOption::Count), e))?,
            None => false,
        };

        Ok(QueryPlan {
            root_type: self.schema.type_name(root).to_owned(),
            predicate: filter,
            order_by: orderby,
            select: self.selection(select, depth)?,
            expand: self.expansions(expand, depth)?,
            top,
            skip,
            count,
        })
    }

    fn paging(
        raw: Option<&RawValue>,
        option: QueryOption,
        depth: usize,
    ) -> Result<Option<u64>, Error> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let text = raw.text.trim();
        let digits = !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit());
        let value = digits.then(|| text.parse::<u64>().ok()).flatten();
        match value {
            Some(v) => Ok(Some(v)),
            None if digits => Err(Error::LimitExceeded {
                option: Self::tag(depth, option),
                detail: format!("{option} value '{text}' is out of range"),
            }),
            None => Err(Error::translate(
                Self::tag(depth, option),
                TranslateError::InvalidPaging {
                    option,
                    value: text.to_owned(),
                    position: raw.span.start,
                },
            )),
        }
    }

    fn selection(&self, items: Vec<BoundSelectItem>, depth: usize) -> Result<Selection, Error> {
        self.limits
            .validate_select_count(Self::tag(depth, QueryOption::Select), items.len())?;
        if items.is_empty() || items.contains(&BoundSelectItem::Wildcard) {
            return Ok(Selection::All);
        }

        let mut seen = HashSet::new();
        let paths = items
            .into_iter()
            .filter_map(|item| match item {
                BoundSelectItem::Path(path) => Some(path),
                BoundSelectItem::Wildcard => None,
            })
            .filter(|path| seen.insert(path.to_string()))
            .collect();
        Ok(Selection::Paths(paths))
    }

    fn expansions(
        &self,
        items: Vec<BoundExpandItem>,
        depth: usize,
    ) -> Result<Vec<ExpandPlan>, Error> {
        let mut seen = HashSet::new();
        let mut plans = Vec::with_capacity(items.len());
        for item in items {
            if depth >= self.limits.max_expand_depth {
                return Err(Error::translate(
                    QueryOption::Expand,
                    TranslateError::ExpandDepthExceeded {
                        max_depth: self.limits.max_expand_depth,
                        position: item.span.start,
                    },
                ));
            }
            let key = item.path.to_string();
            if !seen.insert(key.clone()) {
                return Err(Error::translate(
                    QueryOption::Expand,
                    TranslateError::ConflictingExpand {
                        path: key,
                        position: item.span.start,
                    },
                ));
            }
            let BoundExpandItem {
                path,
                navigation,
                target,
                collection,
                options,
                ..
            } = item;
            plans.push(ExpandPlan {
                path,
                navigation,
                collection,
                plan: self.level(target, options, depth + 1)?,
            });
        }
        Ok(plans)
    }
}

fn parse_count(raw: &RawValue) -> Result<bool, TranslateError> {
    let text = raw.text.trim();
    if text.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if text.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(TranslateError::InvalidCount {
            value: text.to_owned(),
            position: raw.span.start,
        })
    }
}
