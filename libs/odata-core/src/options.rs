//! The query-options bag: raw `$filter`, `$orderby`, ... strings keyed by option.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::Error;

/// System query options understood by the core, in canonical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryOption {
    Filter,
    OrderBy,
    Select,
    Expand,
    Top,
    Skip,
    Count,
}

impl QueryOption {
    pub const ALL: [QueryOption; 7] = [
        QueryOption::Filter,
        QueryOption::OrderBy,
        QueryOption::Select,
        QueryOption::Expand,
        QueryOption::Top,
        QueryOption::Skip,
        QueryOption::Count,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            QueryOption::Filter => "$filter",
            QueryOption::OrderBy => "$orderby",
            QueryOption::Select => "$select",
            QueryOption::Expand => "$expand",
            QueryOption::Top => "$top",
            QueryOption::Skip => "$skip",
            QueryOption::Count => "$count",
        }
    }
}

impl fmt::Display for QueryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for QueryOption {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl FromStr for QueryOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryOption::ALL
            .into_iter()
            .find(|o| o.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedOption { name: s.to_owned() })
    }
}

/// Raw option strings for one request.
///
/// Parameters without a leading `$` are custom parameters and are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct QueryOptions {
    raw: BTreeMap<QueryOption, String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) one option.
    pub fn with(mut self, option: QueryOption, value: impl Into<String>) -> Self {
        self.raw.insert(option, value.into());
        self
    }

    pub fn with_filter(self, value: impl Into<String>) -> Self {
        self.with(QueryOption::Filter, value)
    }

    pub fn with_orderby(self, value: impl Into<String>) -> Self {
        self.with(QueryOption::OrderBy, value)
    }

    pub fn with_select(self, value: impl Into<String>) -> Self {
        self.with(QueryOption::Select, value)
    }

    pub fn with_expand(self, value: impl Into<String>) -> Self {
        self.with(QueryOption::Expand, value)
    }

    pub fn with_top(self, value: impl Into<String>) -> Self {
        self.with(QueryOption::Top, value)
    }

    pub fn with_skip(self, value: impl Into<String>) -> Self {
        self.with(QueryOption::Skip, value)
    }

    pub fn with_count(self, value: impl Into<String>) -> Self {
        self.with(QueryOption::Count, value)
    }

    /// Build from `(name, value)` pairs.
    ///
    /// # Errors
    /// Returns `Error::UnsupportedOption` for an unknown `$`-option and
    /// `Error::DuplicateOption` when an option repeats.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut out = Self::new();
        for (name, value) in pairs {
            let name = name.as_ref().trim();
            if !name.starts_with('$') {
                continue;
            }
            let option: QueryOption = name.parse()?;
            if out.raw.insert(option, value.into()).is_some() {
                return Err(Error::DuplicateOption {
                    name: option.name().to_owned(),
                });
            }
        }
        Ok(out)
    }

    /// Parse a URL query string such as `$filter=Name%20eq%20'x'&$top=10`.
    ///
    /// # Errors
    /// Returns `Error::InvalidQueryString` when the string is not valid
    /// `application/x-www-form-urlencoded`, plus the errors of [`Self::from_pairs`].
    pub fn parse_query(raw: &str) -> Result<Self, Error> {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(raw).map_err(|e| Error::InvalidQueryString {
                detail: e.to_string(),
            })?;
        Self::from_pairs(pairs)
    }

    #[must_use]
    pub fn get(&self, option: QueryOption) -> Option<&str> {
        self.raw.get(&option).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (QueryOption, &str)> {
        self.raw.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Canonical text used as the cache key: options in fixed order, values
    /// trimmed, blank options dropped.
    #[must_use]
    pub fn normalized(&self) -> String {
        let mut out = String::new();
        for (option, value) in self.iter() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('&');
            }
            out.push_str(option.name());
            out.push('=');
            out.push_str(value);
        }
        out
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn parses_url_encoded_query() {
        let opts =
            QueryOptions::parse_query("?$filter=Name%20eq%20'O''Neil'&$top=10&page=3").unwrap();
        assert_eq!(opts.get(QueryOption::Filter), Some("Name eq 'O''Neil'"));
        assert_eq!(opts.get(QueryOption::Top), Some("10"));
        assert_eq!(opts.get(QueryOption::Skip), None);
    }

    #[test]
    fn option_names_are_case_insensitive() {
        let opts = QueryOptions::from_pairs([("$TOP", "1")]).unwrap();
        assert_eq!(opts.get(QueryOption::Top), Some("1"));
    }

    #[test]
    fn rejects_unknown_system_option() {
        let err = QueryOptions::from_pairs([("$search", "blue")]).unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedOption {
                name: "$search".to_owned()
            }
        );
    }

    #[test]
    fn rejects_duplicate_option() {
        let err = QueryOptions::parse_query("$top=1&$top=2").unwrap_err();
        assert!(matches!(err, Error::DuplicateOption { name } if name == "$top"));
    }

    #[test]
    fn normalized_is_order_independent() {
        let a = QueryOptions::new().with_top("10").with_filter("  A eq 1 ");
        let b = QueryOptions::new().with_filter("A eq 1").with_top("10");
        assert_eq!(a.normalized(), b.normalized());
        assert_eq!(a.normalized(), "$filter=A eq 1&$top=10");
    }

    #[test]
    fn normalized_drops_blank_options() {
        let opts = QueryOptions::new().with_filter("   ").with_skip("5");
        assert_eq!(opts.normalized(), "$skip=5");
    }
}
