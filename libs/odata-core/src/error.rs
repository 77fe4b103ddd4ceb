//! Error values produced by every stage of the query pipeline.
//!
//! Each stage has its own error type (`LexError`, `SyntaxError`, `BindError`,
//! `TranslateError`). The top-level [`Error`] carries the stage error together
//! with the query option it came from, so the host can point at the offending
//! parameter and character offset.

use std::fmt;

use serde::Serialize;

use crate::catalog::{self, ErrDef};
use crate::options::QueryOption;

/// Malformed character stream.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character '{unexpected}' at position {position}")]
    UnexpectedChar { position: usize, unexpected: char },

    #[error("unterminated string literal starting at position {position}")]
    UnterminatedString { position: usize },

    #[error("invalid {kind} literal '{text}' at position {position}")]
    InvalidLiteral {
        position: usize,
        kind: &'static str,
        text: String,
    },
}

impl LexError {
    #[must_use]
    pub fn position(&self) -> usize {
        match self {
            LexError::UnexpectedChar { position, .. }
            | LexError::UnterminatedString { position }
            | LexError::InvalidLiteral { position, .. } => *position,
        }
    }
}

/// Grammatically invalid token sequence.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("syntax error at position {position}: expected {}, found {found}", expected_list(.expected))]
pub struct SyntaxError {
    pub position: usize,
    pub expected: Vec<&'static str>,
    pub found: String,
}

impl SyntaxError {
    #[must_use]
    pub fn new(position: usize, expected: Vec<&'static str>, found: impl Into<String>) -> Self {
        Self {
            position,
            expected,
            found: found.into(),
        }
    }
}

fn expected_list(expected: &[&'static str]) -> String {
    match expected {
        [] => "nothing".to_owned(),
        [one] => (*one).to_owned(),
        many => format!("one of {}", many.join(", ")),
    }
}

/// Identifier, function or type resolution failure against the schema.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("unknown property '{name}' on type '{containing_type}'")]
    UnknownProperty {
        name: String,
        containing_type: String,
        position: usize,
    },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String, position: usize },

    #[error("no overload of '{name}' accepts ({got}): {detail}")]
    FunctionSignatureMismatch {
        name: String,
        got: String,
        detail: String,
        position: usize,
    },

    #[error("call to '{name}' is ambiguous between {candidates}")]
    AmbiguousOverload {
        name: String,
        candidates: String,
        position: usize,
    },

    #[error("operator '{operator}' cannot be applied to {left} and {right}")]
    TypeMismatch {
        operator: String,
        left: String,
        right: String,
        position: usize,
    },

    #[error("type '{target}' is not derived from '{source_type}'")]
    InvalidCast {
        source_type: String,
        target: String,
        position: usize,
    },

    #[error("unknown type '{name}'")]
    UnknownType { name: String, position: usize },

    #[error("unknown range variable '{name}'")]
    UnknownRangeVariable { name: String, position: usize },

    #[error("invalid path: {detail}")]
    InvalidPath { detail: String, position: usize },

    #[error("$filter must be a boolean expression, found {found}")]
    NonBooleanFilter { found: String, position: usize },

    #[error("cannot order by {found}")]
    NotSortable { found: String, position: usize },

    #[error("'{name}' on type '{containing_type}' is not a navigation property")]
    NotExpandable {
        name: String,
        containing_type: String,
        position: usize,
    },

    #[error("binding was cancelled")]
    Cancelled,
}

impl BindError {
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        match self {
            BindError::UnknownProperty { position, .. }
            | BindError::UnknownFunction { position, .. }
            | BindError::FunctionSignatureMismatch { position, .. }
            | BindError::AmbiguousOverload { position, .. }
            | BindError::TypeMismatch { position, .. }
            | BindError::InvalidCast { position, .. }
            | BindError::UnknownType { position, .. }
            | BindError::UnknownRangeVariable { position, .. }
            | BindError::InvalidPath { position, .. }
            | BindError::NonBooleanFilter { position, .. }
            | BindError::NotSortable { position, .. }
            | BindError::NotExpandable { position, .. } => Some(*position),
            BindError::Cancelled => None,
        }
    }
}

/// Plan assembly failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("{option} must be a non-negative integer, got '{value}'")]
    InvalidPaging {
        option: QueryOption,
        value: String,
        position: usize,
    },

    #[error("$count must be 'true' or 'false', got '{value}'")]
    InvalidCount { value: String, position: usize },

    #[error("navigation '{path}' is expanded more than once")]
    ConflictingExpand { path: String, position: usize },

    #[error("$expand nesting exceeds the maximum depth of {max_depth}")]
    ExpandDepthExceeded { max_depth: usize, position: usize },
}

impl TranslateError {
    #[must_use]
    pub fn position(&self) -> usize {
        match self {
            TranslateError::InvalidPaging { position, .. }
            | TranslateError::InvalidCount { position, .. }
            | TranslateError::ConflictingExpand { position, .. }
            | TranslateError::ExpandDepthExceeded { position, .. } => *position,
        }
    }
}

/// Unified error returned by [`crate::parse_and_bind`] and [`crate::QueryEngine`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid {option}: {source}")]
    Lex {
        option: QueryOption,
        #[source]
        source: LexError,
    },

    #[error("invalid {option}: {source}")]
    Syntax {
        option: QueryOption,
        #[source]
        source: SyntaxError,
    },

    #[error("invalid {option}: {source}")]
    Bind {
        option: QueryOption,
        #[source]
        source: BindError,
    },

    #[error("invalid {option}: {source}")]
    Translate {
        option: QueryOption,
        #[source]
        source: TranslateError,
    },

    #[error("{option} exceeds limit: {detail}")]
    LimitExceeded { option: QueryOption, detail: String },

    #[error("unsupported query option '{name}'")]
    UnsupportedOption { name: String },

    #[error("query option '{name}' specified more than once")]
    DuplicateOption { name: String },

    #[error("malformed query string: {detail}")]
    InvalidQueryString { detail: String },

    #[error("unknown root type '{name}'")]
    UnknownRootType { name: String },

    #[error("query compilation was cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn lex(option: QueryOption, source: LexError) -> Self {
        Error::Lex { option, source }
    }

    pub(crate) fn syntax(option: QueryOption, source: SyntaxError) -> Self {
        Error::Syntax { option, source }
    }

    pub(crate) fn bind(option: QueryOption, source: BindError) -> Self {
        match source {
            BindError::Cancelled => Error::Cancelled,
            source => Error::Bind { option, source },
        }
    }

    pub(crate) fn translate(option: QueryOption, source: TranslateError) -> Self {
        Error::Translate { option, source }
    }

    /// Catalog entry describing this error kind.
    #[must_use]
    pub fn def(&self) -> &'static ErrDef {
        match self {
            Error::Lex { .. } => &catalog::LEX_ERROR,
            Error::Syntax { .. } => &catalog::SYNTAX_ERROR,
            Error::Bind { source, .. } => match source {
                BindError::UnknownProperty { .. } => &catalog::UNKNOWN_PROPERTY,
                BindError::UnknownFunction { .. } => &catalog::UNKNOWN_FUNCTION,
                BindError::FunctionSignatureMismatch { .. } => {
                    &catalog::FUNCTION_SIGNATURE_MISMATCH
                }
                BindError::AmbiguousOverload { .. } => &catalog::AMBIGUOUS_OVERLOAD,
                BindError::TypeMismatch { .. }
                | BindError::NonBooleanFilter { .. }
                | BindError::NotSortable { .. } => &catalog::TYPE_MISMATCH,
                BindError::InvalidCast { .. } => &catalog::INVALID_CAST,
                BindError::UnknownType { .. } => &catalog::UNKNOWN_TYPE,
                BindError::UnknownRangeVariable { .. }
                | BindError::InvalidPath { .. }
                | BindError::NotExpandable { .. } => &catalog::INVALID_PATH,
                BindError::Cancelled => &catalog::CANCELLED,
            },
            Error::Translate { source, .. } => match source {
                TranslateError::InvalidPaging { .. } | TranslateError::InvalidCount { .. } => {
                    &catalog::INVALID_PAGING
                }
                TranslateError::ConflictingExpand { .. }
                | TranslateError::ExpandDepthExceeded { .. } => &catalog::CONFLICTING_PATHS,
            },
            Error::LimitExceeded { .. } => &catalog::LIMIT_EXCEEDED,
            Error::UnsupportedOption { .. }
            | Error::DuplicateOption { .. }
            | Error::InvalidQueryString { .. } => &catalog::INVALID_OPTION,
            Error::UnknownRootType { .. } => &catalog::UNKNOWN_TYPE,
            Error::Cancelled => &catalog::CANCELLED,
        }
    }

    /// Stable machine-readable code, e.g. `odata.bind.unknown_property`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.def().code
    }

    /// Query option the error belongs to, if any.
    #[must_use]
    pub fn option(&self) -> Option<QueryOption> {
        match self {
            Error::Lex { option, .. }
            | Error::Syntax { option, .. }
            | Error::Bind { option, .. }
            | Error::Translate { option, .. }
            | Error::LimitExceeded { option, .. } => Some(*option),
            _ => None,
        }
    }

    /// 0-based character offset into the option string.
    #[must_use]
    pub fn offset(&self) -> Option<usize> {
        match self {
            Error::Lex { source, .. } => Some(source.position()),
            Error::Syntax { source, .. } => Some(source.position),
            Error::Bind { source, .. } => source.position(),
            Error::Translate { source, .. } => Some(source.position()),
            _ => None,
        }
    }

    /// Structured, serializable form for the host protocol layer.
    #[must_use]
    pub fn diagnostic(&self) -> Diagnostic {
        let def = self.def();
        Diagnostic {
            code: def.code,
            title: def.title,
            status: def.status,
            option: self.option(),
            offset: self.offset(),
            message: self.to_string(),
        }
    }
}

/// Error report handed to the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: &'static str,
    pub title: &'static str,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option: Option<QueryOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "[{}] {} (at {offset})", self.code, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}
