//! Untyped syntax trees produced by the grammar parser.
//!
//! Nodes carry character spans into the option string they were parsed
//! from. Nothing here knows about the schema: `Name eq 5` parses fine even
//! when `Name` is a string property; the binder rejects it.

mod literal;
mod parser;
mod select_expand;

use std::fmt;

use serde::Serialize;

pub use literal::{Literal, parse_iso_duration};
pub use parser::{MAX_NESTING, Parser, parse_filter, parse_orderby};
pub use select_expand::{
    ExpandItem, ExpandOptions, ExpandTarget, PathExpr, RawValue, SelectExpandClauseTree,
    SelectItem, parse_expand, parse_select, parse_select_expand,
};

/// Character range `[start, end)` into the original option string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both.
    #[must_use]
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOperator {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Has,
    Add,
    Sub,
    Mul,
    Div,
    DivBy,
    Mod,
}

impl BinaryOperator {
    #[must_use]
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::Or | BinaryOperator::And)
    }

    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Ne
                | BinaryOperator::Gt
                | BinaryOperator::Ge
                | BinaryOperator::Lt
                | BinaryOperator::Le
        )
    }

    #[must_use]
    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOperator::Eq | BinaryOperator::Ne)
    }

    #[must_use]
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Sub
                | BinaryOperator::Mul
                | BinaryOperator::Div
                | BinaryOperator::DivBy
                | BinaryOperator::Mod
        )
    }

    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            BinaryOperator::Or => "or",
            BinaryOperator::And => "and",
            BinaryOperator::Eq => "eq",
            BinaryOperator::Ne => "ne",
            BinaryOperator::Gt => "gt",
            BinaryOperator::Ge => "ge",
            BinaryOperator::Lt => "lt",
            BinaryOperator::Le => "le",
            BinaryOperator::Has => "has",
            BinaryOperator::Add => "add",
            BinaryOperator::Sub => "sub",
            BinaryOperator::Mul => "mul",
            BinaryOperator::Div => "div",
            BinaryOperator::DivBy => "divby",
            BinaryOperator::Mod => "mod",
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOperator {
    Not,
    Negate,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOperator::Not => f.write_str("not"),
            UnaryOperator::Negate => f.write_str("-"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LambdaKind {
    Any,
    All,
}

impl fmt::Display for LambdaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LambdaKind::Any => f.write_str("any"),
            LambdaKind::All => f.write_str("all"),
        }
    }
}

/// What follows a `/` in a path expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    /// Property or navigation name.
    Member(String),
    /// Namespace-qualified derived type.
    TypeCast(String),
    /// `$count`
    Count,
    /// `any(x: ...)` / `all(x: ...)`
    Lambda {
        kind: LambdaKind,
        variable: Option<String>,
        predicate: Option<Box<SyntaxNode>>,
    },
}

/// Untyped expression tree node.
#[derive(Clone, Debug, PartialEq)]
pub enum SyntaxNode {
    Literal {
        value: Literal,
        span: Span,
    },
    /// First member name of a path, resolved against the implicit `$it`.
    Identifier {
        name: String,
        span: Span,
    },
    /// Namespace-qualified name in expression position (type cast on `$it`
    /// or type argument of `cast`/`isof`).
    QualifiedName {
        name: String,
        span: Span,
    },
    BinaryOp {
        op: BinaryOperator,
        left: Box<SyntaxNode>,
        right: Box<SyntaxNode>,
        span: Span,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<SyntaxNode>,
        span: Span,
    },
    FunctionCall {
        name: String,
        args: Vec<SyntaxNode>,
        span: Span,
    },
    /// `source/segment`
    PathSegment {
        source: Box<SyntaxNode>,
        segment: Segment,
        span: Span,
    },
    /// `$it`, `$root`-less range variables and lambda variables.
    RangeVariable {
        name: String,
        span: Span,
    },
    /// `operand in (a, b, c)`
    In {
        operand: Box<SyntaxNode>,
        list: Vec<SyntaxNode>,
        span: Span,
    },
}

impl SyntaxNode {
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            SyntaxNode::Literal { span, .. }
            | SyntaxNode::Identifier { span, .. }
            | SyntaxNode::QualifiedName { span, .. }
            | SyntaxNode::BinaryOp { span, .. }
            | SyntaxNode::UnaryOp { span, .. }
            | SyntaxNode::FunctionCall { span, .. }
            | SyntaxNode::PathSegment { span, .. }
            | SyntaxNode::RangeVariable { span, .. }
            | SyntaxNode::In { span, .. } => *span,
        }
    }

    /// Number of nodes in the tree, used for complexity budgets.
    #[must_use]
    pub fn node_count(&self) -> usize {
        match self {
            SyntaxNode::Literal { .. }
            | SyntaxNode::Identifier { .. }
            | SyntaxNode::QualifiedName { .. }
            | SyntaxNode::RangeVariable { .. } => 1,
            SyntaxNode::BinaryOp { left, right, .. } => 1 + left.node_count() + right.node_count(),
            SyntaxNode::UnaryOp { operand, .. } => 1 + operand.node_count(),
            SyntaxNode::FunctionCall { args, .. } => {
                1 + args.iter().map(SyntaxNode::node_count).sum::<usize>()
            }
            SyntaxNode::PathSegment {
                source, segment, ..
            } => {
                let inner = match segment {
                    Segment::Lambda {
                        predicate: Some(p), ..
                    } => p.node_count(),
                    _ => 0,
                };
                1 + source.node_count() + inner
            }
            SyntaxNode::In { operand, list, .. } => {
                1 + operand.node_count() + list.iter().map(SyntaxNode::node_count).sum::<usize>()
            }
        }
    }
}

/// Sort direction of an `$orderby` item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum SortDir {
    #[default]
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

impl SortDir {
    /// Reverse the sort direction (Asc <-> Desc)
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }
}

impl fmt::Display for SortDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDir::Asc => f.write_str("asc"),
            SortDir::Desc => f.write_str("desc"),
        }
    }
}

/// One `$orderby` item before binding.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderByItem {
    pub expr: SyntaxNode,
    pub dir: SortDir,
    pub span: Span,
}
