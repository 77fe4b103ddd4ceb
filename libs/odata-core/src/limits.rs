//! Input validation and safety limits for query compilation
//!
//! This module enforces sane caps to prevent abuse and resource exhaustion:
//! - Maximum `$top` and `$skip` values
//! - Maximum number of `$orderby` items and `$select` paths
//! - Maximum `$filter` length and syntax tree size
//! - Maximum `$expand` nesting depth

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::options::QueryOption;

/// Configurable input limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ODataLimits {
    /// Maximum value for $top (default: 1000)
    pub max_top: u64,
    /// Maximum value for $skip (default: unlimited)
    pub max_skip: Option<u64>,
    /// Maximum number of items in $orderby (default: 10)
    pub max_orderby_items: usize,
    /// Maximum length of any expression option in characters (default: 8192)
    pub max_filter_length: usize,
    /// Maximum number of syntax tree nodes per expression (default: 2000)
    pub max_node_count: usize,
    /// Maximum $expand nesting depth (default: 5)
    pub max_expand_depth: usize,
    /// Maximum number of $select paths (default: 100)
    pub max_select_items: usize,
}

impl Default for ODataLimits {
    fn default() -> Self {
        Self {
            max_top: 1000,
            max_skip: None,
            max_orderby_items: 10,
            max_filter_length: 8192,
            max_node_count: 2000,
            max_expand_depth: 5,
            max_select_items: 100,
        }
    }
}

impl ODataLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_top(mut self, max_top: u64) -> Self {
        self.max_top = max_top;
        self
    }

    #[must_use]
    pub fn with_max_skip(mut self, max_skip: u64) -> Self {
        self.max_skip = Some(max_skip);
        self
    }

    #[must_use]
    pub fn with_max_orderby_items(mut self, max: usize) -> Self {
        self.max_orderby_items = max;
        self
    }

    #[must_use]
    pub fn with_max_filter_length(mut self, max: usize) -> Self {
        self.max_filter_length = max;
        self
    }

    #[must_use]
    pub fn with_max_node_count(mut self, max: usize) -> Self {
        self.max_node_count = max;
        self
    }

    #[must_use]
    pub fn with_max_expand_depth(mut self, max: usize) -> Self {
        self.max_expand_depth = max;
        self
    }

    #[must_use]
    pub fn with_max_select_items(mut self, max: usize) -> Self {
        self.max_select_items = max;
        self
    }

    /// Validate a $top value
    ///
    /// # Errors
    /// `Error::LimitExceeded` when `top` is above `max_top`.
    pub fn validate_top(&self, option: QueryOption, top: u64) -> Result<(), Error> {
        if top > self.max_top {
            return Err(exceeded(
                option,
                format!("$top {top} is above the maximum of {}", self.max_top),
            ));
        }
        Ok(())
    }

    /// Validate a $skip value
    ///
    /// # Errors
    /// `Error::LimitExceeded` when `skip` is above `max_skip`.
    pub fn validate_skip(&self, option: QueryOption, skip: u64) -> Result<(), Error> {
        match self.max_skip {
            Some(max) if skip > max => Err(exceeded(
                option,
                format!("$skip {skip} is above the maximum of {max}"),
            )),
            _ => Ok(()),
        }
    }

    /// Validate the length of an expression option, counted in characters
    ///
    /// # Errors
    /// `Error::LimitExceeded` when the text is longer than `max_filter_length`.
    pub fn validate_filter(&self, option: QueryOption, text: &str) -> Result<(), Error> {
        let len = text.chars().count();
        if len > self.max_filter_length {
            return Err(exceeded(
                option,
                format!(
                    "expression is {len} characters long, maximum is {}",
                    self.max_filter_length
                ),
            ));
        }
        Ok(())
    }

    /// Validate the size of a parsed expression
    ///
    /// # Errors
    /// `Error::LimitExceeded` when `nodes` is above `max_node_count`.
    pub fn validate_node_count(&self, option: QueryOption, nodes: usize) -> Result<(), Error> {
        if nodes > self.max_node_count {
            return Err(exceeded(
                option,
                format!(
                    "expression has {nodes} nodes, maximum is {}",
                    self.max_node_count
                ),
            ));
        }
        Ok(())
    }

    /// Validate number of $orderby items
    ///
    /// # Errors
    /// `Error::LimitExceeded` when `count` is above `max_orderby_items`.
    pub fn validate_orderby_count(&self, option: QueryOption, count: usize) -> Result<(), Error> {
        if count > self.max_orderby_items {
            return Err(exceeded(
                option,
                format!(
                    "too many $orderby items ({count}, max: {})",
                    self.max_orderby_items
                ),
            ));
        }
        Ok(())
    }

    /// Validate number of $select paths
    ///
    /// # Errors
    /// `Error::LimitExceeded` when `count` is above `max_select_items`.
    pub fn validate_select_count(&self, option: QueryOption, count: usize) -> Result<(), Error> {
        if count > self.max_select_items {
            return Err(exceeded(
                option,
                format!(
                    "too many $select paths ({count}, max: {})",
                    self.max_select_items
                ),
            ));
        }
        Ok(())
    }
}

fn exceeded(option: QueryOption, detail: String) -> Error {
    Error::LimitExceeded { option, detail }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ODataLimits::default();
        assert_eq!(limits.max_top, 1000);
        assert_eq!(limits.max_skip, None);
        assert_eq!(limits.max_orderby_items, 10);
        assert_eq!(limits.max_filter_length, 8192);
        assert_eq!(limits.max_expand_depth, 5);
    }

    #[test]
    fn test_validate_top() {
        let limits = ODataLimits::default();
        assert!(limits.validate_top(QueryOption::Top, 1000).is_ok());
        let err = limits.validate_top(QueryOption::Top, 1001).unwrap_err();
        assert_eq!(err.code(), "odata.limit.exceeded");
        assert_eq!(err.option(), Some(QueryOption::Top));
    }

    #[test]
    fn test_validate_skip_unlimited_by_default() {
        let limits = ODataLimits::default();
        assert!(limits.validate_skip(QueryOption::Skip, u64::MAX).is_ok());

        let limits = limits.with_max_skip(100);
        assert!(limits.validate_skip(QueryOption::Skip, 101).is_err());
    }

    #[test]
    fn test_validate_filter_counts_chars() {
        let limits = ODataLimits::new().with_max_filter_length(4);
        assert!(limits.validate_filter(QueryOption::Filter, "\u{e4}\u{f6}\u{fc}\u{df}").is_ok());
        assert!(limits.validate_filter(QueryOption::Filter, "abcde").is_err());
    }

    #[test]
    fn test_validate_orderby_and_select_counts() {
        let limits = ODataLimits::new()
            .with_max_orderby_items(2)
            .with_max_select_items(1);
        assert!(limits.validate_orderby_count(QueryOption::OrderBy, 2).is_ok());
        assert!(limits.validate_orderby_count(QueryOption::OrderBy, 3).is_err());
        assert!(limits.validate_select_count(QueryOption::Select, 2).is_err());
    }

    #[test]
    fn test_deserializes_partial_config() {
        let limits: ODataLimits = serde_json::from_str(r#"{"max_top": 50}"#).unwrap();
        assert_eq!(limits.max_top, 50);
        assert_eq!(limits.max_node_count, 2000);
        assert!(serde_json::from_str::<ODataLimits>(r#"{"max_tops": 50}"#).is_err());
    }
}
