//! Semantic binding: resolves a syntax tree against the schema.
//!
//! The binder walks the untyped tree once, resolving identifiers against the
//! current type context, checking operator and function types and inserting
//! explicit conversions where numeric operands widen. Every bound node knows
//! its static type and whether it can evaluate to null; property paths that
//! traverse a nullable step are tagged so executors short-circuit instead of
//! failing.

mod functions;
mod select_expand;
mod types;

use std::fmt;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::BindError;
use crate::schema::{Member, PrimitiveKind, Schema, TypeId};
use crate::syntax::{
    BinaryOperator, LambdaKind, Literal, OrderByItem, Segment, SortDir, Span, SyntaxNode,
    UnaryOperator,
};

pub use functions::BuiltinFunction;
pub use select_expand::{
    BoundExpandItem, BoundQuery, BoundSelectExpand, BoundSelectItem,
};
pub use types::{EdmType, common_numeric};

/// One step of a property path.
#[derive(Clone, Debug, PartialEq)]
pub enum PathStep {
    Property {
        name: String,
        nullable: bool,
        collection: bool,
    },
    Navigation {
        name: String,
        nullable: bool,
        collection: bool,
    },
    /// Narrowing to a derived type; `accepted` lists the target and every
    /// type deriving from it.
    Cast {
        type_name: String,
        accepted: Vec<String>,
    },
}

impl PathStep {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            PathStep::Property { name, .. } | PathStep::Navigation { name, .. } => name,
            PathStep::Cast { type_name, .. } => type_name,
        }
    }

    /// Single-valued step that may be absent on an instance.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        match self {
            PathStep::Property { nullable, .. } | PathStep::Navigation { nullable, .. } => {
                *nullable
            }
            PathStep::Cast { .. } => true,
        }
    }
}

/// Member access chain rooted at `$it` or a lambda variable.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyPath {
    pub variable: String,
    pub steps: Vec<PathStep>,
    /// Set once a step other than the last may be null: evaluating the path
    /// must yield null instead of failing.
    pub null_propagating: bool,
}

impl PropertyPath {
    pub const IT: &'static str = "$it";

    #[must_use]
    pub fn root(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            steps: Vec::new(),
            null_propagating: false,
        }
    }

    pub(crate) fn push(&mut self, step: PathStep) {
        if self.steps.last().is_some_and(PathStep::is_nullable) {
            self.null_propagating = true;
        }
        self.steps.push(step);
    }

    /// Member names without the variable, e.g. `Address/City`.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        self.steps.iter().map(PathStep::name).collect()
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if self.variable != Self::IT || self.steps.is_empty() {
            f.write_str(&self.variable)?;
            first = false;
        }
        for step in &self.steps {
            if !first {
                f.write_str("/")?;
            }
            f.write_str(step.name())?;
            first = false;
        }
        Ok(())
    }
}

impl Serialize for PropertyPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BoundKind {
    Constant(Literal),
    /// Enum value with its resolved member names and numeric value.
    EnumConstant {
        type_name: String,
        members: Vec<String>,
        value: i64,
    },
    Property(PropertyPath),
    /// `path/$count`
    Count(Box<BoundNode>),
    Binary {
        op: BinaryOperator,
        left: Box<BoundNode>,
        right: Box<BoundNode>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<BoundNode>,
    },
    Function {
        function: BuiltinFunction,
        args: Vec<BoundNode>,
    },
    /// Implicit widening to the node's type.
    Convert(Box<BoundNode>),
    /// `cast(expr, T)`: null when the value is not a `T`.
    Cast {
        operand: Box<BoundNode>,
        target_name: String,
        accepted: Vec<String>,
    },
    /// `isof(expr, T)`
    IsOf {
        operand: Box<BoundNode>,
        target: EdmType,
        target_name: String,
        accepted: Vec<String>,
    },
    Lambda {
        kind: LambdaKind,
        source: Box<BoundNode>,
        variable: Option<String>,
        predicate: Option<Box<BoundNode>>,
    },
    In {
        operand: Box<BoundNode>,
        list: Vec<BoundNode>,
    },
}

/// Typed expression node.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundNode {
    pub kind: BoundKind,
    pub ty: EdmType,
    pub nullable: bool,
    pub span: Span,
}

impl BoundNode {
    fn new(kind: BoundKind, ty: EdmType, nullable: bool, span: Span) -> Self {
        Self {
            kind,
            ty,
            nullable,
            span,
        }
    }

    /// Property path of a plain member access.
    #[must_use]
    pub fn as_path(&self) -> Option<&PropertyPath> {
        match &self.kind {
            BoundKind::Property(path) => Some(path),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_constant(&self) -> Option<&Literal> {
        match &self.kind {
            BoundKind::Constant(lit) => Some(lit),
            _ => None,
        }
    }

    fn boxed(self) -> Box<BoundNode> {
        Box::new(self)
    }
}

/// Canonical OData-like rendering with explicit grouping and conversions.
impl fmt::Display for BoundNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BoundKind::Constant(lit) => write!(f, "{lit}"),
            BoundKind::EnumConstant {
                type_name, members, ..
            } => write!(f, "{type_name}'{}'", members.join(",")),
            BoundKind::Property(path) => write!(f, "{path}"),
            BoundKind::Count(source) => write!(f, "{source}/$count"),
            BoundKind::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            BoundKind::Unary {
                op: UnaryOperator::Not,
                operand,
            } => write!(f, "(not {operand})"),
            BoundKind::Unary {
                op: UnaryOperator::Negate,
                operand,
            } => write!(f, "(-{operand})"),
            BoundKind::Function { function, args } => {
                write!(f, "{function}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            BoundKind::Convert(inner) => match self.ty.primitive() {
                Some(kind) => write!(f, "convert({inner}, {kind})"),
                None => write!(f, "{inner}"),
            },
            BoundKind::Cast {
                operand,
                target_name,
                ..
            } => write!(f, "cast({operand}, {target_name})"),
            BoundKind::IsOf {
                operand,
                target_name,
                ..
            } => write!(f, "isof({operand}, {target_name})"),
            BoundKind::Lambda {
                kind,
                source,
                variable,
                predicate,
            } => match (variable, predicate) {
                (Some(var), Some(predicate)) => write!(f, "{source}/{kind}({var}: {predicate})"),
                _ => write!(f, "{source}/{kind}()"),
            },
            BoundKind::In { operand, list } => {
                write!(f, "({operand} in (")?;
                write_list(f, list)?;
                f.write_str("))")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, nodes: &[BoundNode]) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{node}")?;
    }
    Ok(())
}

impl Serialize for BoundNode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Bound `$orderby` item.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundOrderBy {
    pub expr: BoundNode,
    pub dir: SortDir,
}

/// Binds one syntax tree against `root`, the type `$it` refers to.
///
/// # Errors
/// `BindError` for unresolved names, type errors and cancellation.
pub fn bind(
    tree: &SyntaxNode,
    schema: &Schema,
    root: TypeId,
    cancel: &CancellationToken,
) -> Result<BoundNode, BindError> {
    Binder::new(schema, root, cancel).bind(tree)
}

/// Resolves syntax trees for one root type.
pub struct Binder<'a> {
    schema: &'a Schema,
    root: TypeId,
    cancel: &'a CancellationToken,
    case_insensitive: bool,
    /// Lambda variables in scope, innermost last.
    scopes: Vec<(String, EdmType)>,
}

impl<'a> Binder<'a> {
    #[must_use]
    pub fn new(schema: &'a Schema, root: TypeId, cancel: &'a CancellationToken) -> Self {
        Self {
            schema,
            root,
            cancel,
            case_insensitive: false,
            scopes: Vec::new(),
        }
    }

    /// Resolve property names ignoring ASCII case when no exact match exists.
    #[must_use]
    pub fn case_insensitive_properties(mut self, enabled: bool) -> Self {
        self.case_insensitive = enabled;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    #[must_use]
    pub fn root(&self) -> TypeId {
        self.root
    }

    /// Binder for a different root type sharing schema, settings and token.
    fn rebased(&self, root: TypeId) -> Binder<'a> {
        Binder {
            schema: self.schema,
            root,
            cancel: self.cancel,
            case_insensitive: self.case_insensitive,
            scopes: Vec::new(),
        }
    }

    fn describe(&self, ty: &EdmType) -> String {
        ty.describe(self.schema)
    }

    fn check_cancelled(&self) -> Result<(), BindError> {
        if self.cancel.is_cancelled() {
            Err(BindError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Binds a `$filter` expression, which must be boolean.
    ///
    /// # Errors
    /// `BindError::NonBooleanFilter` when the expression is not boolean, plus
    /// any error of [`Self::bind`].
    pub fn bind_filter(&mut self, tree: &SyntaxNode) -> Result<BoundNode, BindError> {
        let bound = self.bind(tree)?;
        if !bound.ty.is_boolean() {
            return Err(BindError::NonBooleanFilter {
                found: self.describe(&bound.ty),
                position: tree.span().start,
            });
        }
        Ok(bound)
    }

    /// Binds `$orderby` items; each must be a primitive or enum value.
    ///
    /// # Errors
    /// `BindError::NotSortable` for structured or collection values, plus any
    /// error of [`Self::bind`].
    pub fn bind_orderby(&mut self, items: &[OrderByItem]) -> Result<Vec<BoundOrderBy>, BindError> {
        items
            .iter()
            .map(|item| {
                let expr = self.bind(&item.expr)?;
                if !expr.ty.is_scalar() {
                    return Err(BindError::NotSortable {
                        found: self.describe(&expr.ty),
                        position: item.span.start,
                    });
                }
                Ok(BoundOrderBy {
                    expr,
                    dir: item.dir,
                })
            })
            .collect()
    }

    /// Binds any expression.
    ///
    /// # Errors
    /// `BindError` for unresolved names, type errors and cancellation.
    pub fn bind(&mut self, node: &SyntaxNode) -> Result<BoundNode, BindError> {
        self.check_cancelled()?;
        match node {
            SyntaxNode::Literal { value, span } => self.bind_literal(value, *span),
            SyntaxNode::Identifier { name, span } => {
                let root = self.it(*span);
                self.member(root, name, span.start, *span)
            }
            SyntaxNode::QualifiedName { name, span } => {
                let root = self.it(*span);
                self.cast_segment(root, name, span.start, *span)
            }
            SyntaxNode::RangeVariable { name, span } => self.range_variable(name, *span),
            SyntaxNode::PathSegment {
                source,
                segment,
                span,
            } => self.bind_segment(source, segment, *span),
            SyntaxNode::BinaryOp {
                op,
                left,
                right,
                span,
            } => {
                let left = self.bind(left)?;
                let right = self.bind(right)?;
                self.bind_binary(*op, left, right, *span)
            }
            SyntaxNode::UnaryOp { op, operand, span } => {
                let operand = self.bind(operand)?;
                self.bind_unary(*op, operand, *span)
            }
            SyntaxNode::FunctionCall { name, args, span } => self.bind_call(name, args, *span),
            SyntaxNode::In {
                operand,
                list,
                span,
            } => self.bind_in(operand, list, *span),
        }
    }

    // ---- leaves ----

    fn bind_literal(&self, value: &Literal, span: Span) -> Result<BoundNode, BindError> {
        let Literal::Enum { type_name, value } = value else {
            let ty = EdmType::of_literal(value);
            let nullable = *value == Literal::Null;
            return Ok(BoundNode::new(
                BoundKind::Constant(value.clone()),
                ty,
                nullable,
                span,
            ));
        };

        let id = self
            .schema
            .find_type(type_name)
            .filter(|id| self.schema.get(*id).enum_type().is_some())
            .ok_or_else(|| BindError::UnknownType {
                name: type_name.clone(),
                position: span.start,
            })?;
        self.enum_constant(id, value, span)
    }

    fn enum_constant(&self, id: TypeId, text: &str, span: Span) -> Result<BoundNode, BindError> {
        let ty = self.schema.get(id);
        let parsed = ty.enum_type().and_then(|e| e.parse_value(text));
        let Some(value) = parsed else {
            return Err(BindError::UnknownProperty {
                name: text.to_owned(),
                containing_type: ty.name.clone(),
                position: span.start,
            });
        };
        Ok(BoundNode::new(
            BoundKind::EnumConstant {
                type_name: ty.name.clone(),
                members: text.split(',').map(|m| m.trim().to_owned()).collect(),
                value,
            },
            EdmType::Enum(id),
            false,
            span,
        ))
    }

    /// The implicit root `$it`.
    fn it(&self, span: Span) -> BoundNode {
        BoundNode::new(
            BoundKind::Property(PropertyPath::root(PropertyPath::IT)),
            EdmType::Structured(self.root),
            false,
            Span::new(span.start, span.start),
        )
    }

    fn range_variable(&self, name: &str, span: Span) -> Result<BoundNode, BindError> {
        if name == PropertyPath::IT {
            return Ok(BoundNode { span, ..self.it(span) });
        }
        let (_, ty) = self
            .scopes
            .iter()
            .rev()
            .find(|(v, _)| v == name)
            .ok_or_else(|| BindError::UnknownRangeVariable {
                name: name.to_owned(),
                position: span.start,
            })?;
        Ok(BoundNode::new(
            BoundKind::Property(PropertyPath::root(name)),
            ty.clone(),
            false,
            span,
        ))
    }

    // ---- paths ----

    fn bind_segment(
        &mut self,
        source: &SyntaxNode,
        segment: &Segment,
        span: Span,
    ) -> Result<BoundNode, BindError> {
        let source = self.bind(source)?;
        match segment {
            Segment::Member(name) => {
                let at = segment_start(span, name);
                self.member(source, name, at, span)
            }
            Segment::TypeCast(name) => {
                let at = segment_start(span, name);
                self.cast_segment(source, name, at, span)
            }
            Segment::Count => self.count(source, span),
            Segment::Lambda {
                kind,
                variable,
                predicate,
            } => self.lambda(source, *kind, variable.as_deref(), predicate.as_deref(), span),
        }
    }

    fn member(&self, source: BoundNode, name: &str, at: usize, span: Span) -> Result<BoundNode, BindError> {
        let (mut path, ty, nullable) = source_path(source, name, at)?;
        let id = match &ty {
            EdmType::Structured(id) => *id,
            EdmType::Collection(_) => {
                return Err(BindError::InvalidPath {
                    detail: format!(
                        "cannot access '{name}' on collection '{path}' without any or all"
                    ),
                    position: at,
                });
            }
            other => {
                return Err(BindError::InvalidPath {
                    detail: format!("{} has no member '{name}'", self.describe(other)),
                    position: at,
                });
            }
        };

        let member = self
            .schema
            .find_member(id, name, self.case_insensitive)
            .ok_or_else(|| BindError::UnknownProperty {
                name: name.to_owned(),
                containing_type: self.schema.type_name(id).to_owned(),
                position: at,
            })?;

        let (step, member_ty) = match member {
            Member::Structural(p) => (
                PathStep::Property {
                    name: p.name.clone(),
                    nullable: p.nullable && !p.ty.collection,
                    collection: p.ty.collection,
                },
                EdmType::of_ref(self.schema, p.ty),
            ),
            Member::Navigation(n) => {
                let target = EdmType::Structured(n.target);
                (
                    PathStep::Navigation {
                        name: n.name.clone(),
                        nullable: n.is_nullable(),
                        collection: n.is_collection(),
                    },
                    if n.is_collection() {
                        EdmType::Collection(Box::new(target))
                    } else {
                        target
                    },
                )
            }
        };
        let nullable = nullable || step.is_nullable();
        path.push(step);
        Ok(BoundNode::new(BoundKind::Property(path), member_ty, nullable, span))
    }

    /// Names of `id` and every type deriving from it.
    fn accepted_names(&self, id: TypeId) -> Vec<String> {
        std::iter::once(id)
            .chain(self.schema.get(id).derived().iter().copied())
            .map(|t| self.schema.type_name(t).to_owned())
            .collect()
    }

    fn cast_segment(&self, source: BoundNode, name: &str, at: usize, span: Span) -> Result<BoundNode, BindError> {
        let target = self
            .schema
            .find_type(name)
            .ok_or_else(|| BindError::UnknownType {
                name: name.to_owned(),
                position: at,
            })?;
        let (mut path, ty, nullable) = source_path(source, name, at)?;

        let Some(current) = ty.structured_id() else {
            return Err(BindError::InvalidCast {
                source_type: self.describe(&ty),
                target: name.to_owned(),
                position: at,
            });
        };
        if !self.schema.is_same_or_derived(target, current) {
            return Err(BindError::InvalidCast {
                source_type: self.schema.type_name(current).to_owned(),
                target: self.schema.type_name(target).to_owned(),
                position: at,
            });
        }

        let collection = ty.is_collection();
        path.push(PathStep::Cast {
            type_name: self.schema.type_name(target).to_owned(),
            accepted: self.accepted_names(target),
        });
        let narrowed = EdmType::Structured(target);
        let (ty, nullable) = if collection {
            (EdmType::Collection(Box::new(narrowed)), nullable)
        } else {
            (narrowed, target != current || nullable)
        };
        Ok(BoundNode::new(BoundKind::Property(path), ty, nullable, span))
    }

    fn count(&self, source: BoundNode, span: Span) -> Result<BoundNode, BindError> {
        if !source.ty.is_collection() || source.as_path().is_none() {
            return Err(BindError::InvalidPath {
                detail: format!("$count requires a collection, found {}", self.describe(&source.ty)),
                position: span.end.saturating_sub("$count".len()),
            });
        }
        let nullable = source.nullable;
        Ok(BoundNode::new(
            BoundKind::Count(source.boxed()),
            EdmType::Primitive(PrimitiveKind::Int64),
            nullable,
            span,
        ))
    }

    fn lambda(
        &mut self,
        source: BoundNode,
        kind: LambdaKind,
        variable: Option<&str>,
        predicate: Option<&SyntaxNode>,
        span: Span,
    ) -> Result<BoundNode, BindError> {
        let Some(element) = source.ty.element().cloned() else {
            return Err(BindError::InvalidPath {
                detail: format!("{kind} requires a collection, found {}", self.describe(&source.ty)),
                position: source.span.end,
            });
        };
        if source.as_path().is_none() {
            return Err(BindError::InvalidPath {
                detail: format!("{kind} must follow a property path"),
                position: source.span.end,
            });
        }

        let predicate = match (variable, predicate) {
            (Some(var), Some(predicate)) => {
                self.scopes.push((var.to_owned(), element));
                let bound = self.bind(predicate);
                self.scopes.pop();
                let bound = bound?;
                if !bound.ty.is_boolean() {
                    return Err(BindError::TypeMismatch {
                        operator: kind.to_string(),
                        left: self.describe(&source.ty),
                        right: self.describe(&bound.ty),
                        position: predicate.span().start,
                    });
                }
                Some(bound.boxed())
            }
            _ if kind == LambdaKind::All => {
                return Err(BindError::InvalidPath {
                    detail: "all requires a lambda predicate".to_owned(),
                    position: source.span.end,
                });
            }
            _ => None,
        };

        Ok(BoundNode::new(
            BoundKind::Lambda {
                kind,
                source: source.boxed(),
                variable: variable.map(str::to_owned),
                predicate,
            },
            EdmType::BOOLEAN,
            false,
            span,
        ))
    }

    // ---- operators ----

    fn mismatch(&self, operator: &str, left: &EdmType, right: &EdmType, span: Span) -> BindError {
        BindError::TypeMismatch {
            operator: operator.to_owned(),
            left: self.describe(left),
            right: self.describe(right),
            position: span.start,
        }
    }

    fn bind_binary(
        &self,
        op: BinaryOperator,
        left: BoundNode,
        right: BoundNode,
        span: Span,
    ) -> Result<BoundNode, BindError> {
        let nullable = left.nullable || right.nullable;
        let (left, right, ty) = if op.is_logical() {
            let boolean = |n: &BoundNode| n.ty.is_boolean() || n.ty == EdmType::Null;
            if !boolean(&left) || !boolean(&right) {
                return Err(self.mismatch(op.keyword(), &left.ty, &right.ty, span));
            }
            (left, right, EdmType::BOOLEAN)
        } else if op == BinaryOperator::Has {
            let (left, right) = self.bind_has(left, right, span)?;
            (left, right, EdmType::BOOLEAN)
        } else if op.is_comparison() {
            let (left, right) = self.unify(op.keyword(), left, right, span)?;
            if !op.is_equality() && !(left.ty.is_scalar() || left.ty == EdmType::Null) {
                return Err(self.mismatch(op.keyword(), &left.ty, &right.ty, span));
            }
            (left, right, EdmType::BOOLEAN)
        } else {
            self.bind_arithmetic(op, left, right, span)?
        };

        Ok(BoundNode::new(
            BoundKind::Binary {
                op,
                left: left.boxed(),
                right: right.boxed(),
            },
            ty,
            nullable,
            span,
        ))
    }

    fn bind_has(
        &self,
        left: BoundNode,
        right: BoundNode,
        span: Span,
    ) -> Result<(BoundNode, BoundNode), BindError> {
        let EdmType::Enum(id) = left.ty else {
            return Err(self.mismatch("has", &left.ty, &right.ty, span));
        };
        let right = match (&right.ty, &right.kind) {
            (EdmType::Enum(other), _) if *other == id => right,
            (_, BoundKind::Constant(Literal::String(text))) => {
                self.enum_constant(id, text, right.span)?
            }
            _ => return Err(self.mismatch("has", &left.ty, &right.ty, span)),
        };
        Ok((left, right))
    }

    /// Brings both operands of a comparison to one type.
    fn unify(
        &self,
        op: &str,
        left: BoundNode,
        right: BoundNode,
        span: Span,
    ) -> Result<(BoundNode, BoundNode), BindError> {
        match (&left.ty, &right.ty) {
            (EdmType::Null, EdmType::Null) => Ok((left, right)),
            (EdmType::Null, other) => {
                let ty = other.clone();
                Ok((BoundNode { ty, ..left }, right))
            }
            (other, EdmType::Null) => {
                let ty = other.clone();
                Ok((left, BoundNode { ty, ..right }))
            }
            (a, b) if a == b => Ok((left, right)),
            (EdmType::Primitive(a), EdmType::Primitive(b)) => match common_numeric(*a, *b) {
                Some(target) => Ok((convert(left, target), convert(right, target))),
                None => Err(self.mismatch(op, &left.ty, &right.ty, span)),
            },
            (EdmType::Enum(id), _) => match &right.kind {
                BoundKind::Constant(Literal::String(text)) => {
                    let right = self.enum_constant(*id, text, right.span)?;
                    Ok((left, right))
                }
                _ => Err(self.mismatch(op, &left.ty, &right.ty, span)),
            },
            (_, EdmType::Enum(id)) => match &left.kind {
                BoundKind::Constant(Literal::String(text)) => {
                    let left = self.enum_constant(*id, text, left.span)?;
                    Ok((left, right))
                }
                _ => Err(self.mismatch(op, &left.ty, &right.ty, span)),
            },
            _ => Err(self.mismatch(op, &left.ty, &right.ty, span)),
        }
    }

    fn bind_arithmetic(
        &self,
        op: BinaryOperator,
        left: BoundNode,
        right: BoundNode,
        span: Span,
    ) -> Result<(BoundNode, BoundNode, EdmType), BindError> {
        use PrimitiveKind::{Date, DateTimeOffset, Decimal, Duration};

        let (left, right) = match (&left.ty, &right.ty) {
            (EdmType::Null, EdmType::Primitive(_)) | (EdmType::Primitive(_), EdmType::Null) => {
                self.unify(op.keyword(), left, right, span)?
            }
            _ => (left, right),
        };
        let (Some(a), Some(b)) = (left.ty.primitive(), right.ty.primitive()) else {
            return Err(self.mismatch(op.keyword(), &left.ty, &right.ty, span));
        };

        if let Some(mut target) = common_numeric(a, b) {
            if op == BinaryOperator::DivBy && target.is_integral() {
                target = Decimal;
            }
            let ty = EdmType::Primitive(target);
            return Ok((convert(left, target), convert(right, target), ty));
        }

        let additive = matches!(op, BinaryOperator::Add | BinaryOperator::Sub);
        let result = match (a, b) {
            (DateTimeOffset, Duration) | (Duration, DateTimeOffset)
                if additive && (a == DateTimeOffset || op == BinaryOperator::Add) =>
            {
                DateTimeOffset
            }
            (Date, Duration) if additive => Date,
            (Duration, Duration) if additive => Duration,
            (DateTimeOffset, DateTimeOffset) | (Date, Date) if op == BinaryOperator::Sub => {
                Duration
            }
            _ => return Err(self.mismatch(op.keyword(), &left.ty, &right.ty, span)),
        };
        Ok((left, right, EdmType::Primitive(result)))
    }

    fn bind_unary(&self, op: UnaryOperator, operand: BoundNode, span: Span) -> Result<BoundNode, BindError> {
        let ok = match op {
            UnaryOperator::Not => operand.ty.is_boolean() || operand.ty == EdmType::Null,
            UnaryOperator::Negate => {
                operand.ty.is_numeric()
                    || operand.ty == EdmType::Primitive(PrimitiveKind::Duration)
                    || operand.ty == EdmType::Null
            }
        };
        if !ok {
            return Err(BindError::TypeMismatch {
                operator: op.to_string(),
                left: self.describe(&operand.ty),
                right: String::new(),
                position: span.start,
            });
        }
        let ty = match op {
            UnaryOperator::Not => EdmType::BOOLEAN,
            UnaryOperator::Negate => operand.ty.clone(),
        };
        let nullable = operand.nullable;
        Ok(BoundNode::new(
            BoundKind::Unary {
                op,
                operand: operand.boxed(),
            },
            ty,
            nullable,
            span,
        ))
    }

    fn bind_in(
        &mut self,
        operand: &SyntaxNode,
        list: &[SyntaxNode],
        span: Span,
    ) -> Result<BoundNode, BindError> {
        const IN: &str = "in";

        let mut operand = self.bind(operand)?;
        let mut items = list
            .iter()
            .map(|item| self.bind(item))
            .collect::<Result<Vec<_>, _>>()?;

        // A null operand takes the type of the list, as in a comparison.
        if operand.ty == EdmType::Null
            && let Some(item) = items.iter().find(|i| i.ty != EdmType::Null)
        {
            operand.ty = item.ty.clone();
        }

        if !operand.ty.is_scalar() && operand.ty != EdmType::Null {
            let item_ty = items.first().map_or(EdmType::Null, |i| i.ty.clone());
            return Err(self.mismatch(IN, &operand.ty, &item_ty, span));
        }

        if let Some(mut target) = operand.ty.primitive().filter(|k| k.is_numeric()) {
            for item in &items {
                match &item.ty {
                    EdmType::Null => {}
                    EdmType::Primitive(k) if k.is_numeric() => {
                        target = common_numeric(target, *k).unwrap_or(target);
                    }
                    other => return Err(self.mismatch(IN, &operand.ty, other, item.span)),
                }
            }
            operand = convert(operand, target);
            items = items.into_iter().map(|i| convert(i, target)).collect();
        } else {
            items = items
                .into_iter()
                .map(|item| self.unify(IN, operand.clone(), item, span).map(|(_, item)| item))
                .collect::<Result<Vec<_>, _>>()?;
        }

        let nullable = operand.nullable;
        Ok(BoundNode::new(
            BoundKind::In {
                operand: operand.boxed(),
                list: items,
            },
            EdmType::BOOLEAN,
            nullable,
            span,
        ))
    }
}

/// Widens `node` to `target`, folding numeric constants.
fn convert(node: BoundNode, target: PrimitiveKind) -> BoundNode {
    let ty = EdmType::Primitive(target);
    if node.ty == ty {
        return node;
    }
    if node.ty == EdmType::Null {
        return BoundNode { ty, ..node };
    }
    if let BoundKind::Constant(lit) = &node.kind
        && let Some(folded) = types::convert_literal(lit, target)
    {
        return BoundNode {
            kind: BoundKind::Constant(folded),
            ty,
            ..node
        };
    }
    let (nullable, span) = (node.nullable, node.span);
    BoundNode::new(BoundKind::Convert(node.boxed()), ty, nullable, span)
}

/// Splits a bound path into its parts; `next` names the segment that follows.
fn source_path(
    source: BoundNode,
    next: &str,
    at: usize,
) -> Result<(PropertyPath, EdmType, bool), BindError> {
    let BoundNode {
        kind, ty, nullable, ..
    } = source;
    match kind {
        BoundKind::Property(path) => Ok((path, ty, nullable)),
        _ => Err(BindError::InvalidPath {
            detail: format!("'{next}' must follow a property path"),
            position: at,
        }),
    }
}

/// Start of the trailing `name` inside a path span.
fn segment_start(span: Span, name: &str) -> usize {
    span.end.saturating_sub(name.chars().count())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::schema::{Multiplicity, SchemaBuilder, TypeDescription};
    use crate::syntax::parse_filter;

    fn schema() -> Schema {
        SchemaBuilder::new("Sales")
            .with_type(TypeDescription::enumeration("Color").member("Red").member("Blue"))
            .with_type(
                TypeDescription::enumeration("Access")
                    .member("Read")
                    .member("Write")
                    .flags(),
            )
            .with_type(TypeDescription::complex("Address").property("City", "Edm.String"))
            .with_type(
                TypeDescription::entity("Customer")
                    .key("Id")
                    .required("Id", "Edm.Int32")
                    .property("Name", "Edm.String")
                    .property("Level", "Edm.Int16")
                    .property("Rating", "Edm.Double")
                    .property("Balance", "Edm.Decimal")
                    .property("Favorite", "Color")
                    .property("Rights", "Access")
                    .property("Address", "Address")
                    .property("Since", "Edm.DateTimeOffset")
                    .property("Born", "Edm.Date")
                    .collection("Tags", "Edm.String")
                    .navigation("Orders", "Order", Multiplicity::Many)
                    .navigation("Manager", "Customer", Multiplicity::ZeroOrOne),
            )
            .with_type(
                TypeDescription::entity("VipCustomer")
                    .base("Customer")
                    .property("Tier", "Edm.Int32"),
            )
            .with_type(
                TypeDescription::entity("Order")
                    .key("Id")
                    .required("Id", "Edm.Int32")
                    .property("Amount", "Edm.Decimal"),
            )
            .build()
            .unwrap()
    }

    fn bind_src(schema: &Schema, src: &str) -> Result<BoundNode, BindError> {
        let tokens = tokenize(src).unwrap();
        let tree = parse_filter(&tokens).unwrap();
        let root = schema.find_type("Customer").unwrap();
        let cancel = CancellationToken::new();
        Binder::new(schema, root, &cancel).bind_filter(&tree)
    }

    fn binary_sides(node: &BoundNode) -> (&BoundNode, &BoundNode) {
        match &node.kind {
            BoundKind::Binary { left, right, .. } => (left, right),
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn int_property_against_double_literal_is_widened() {
        let schema = schema();
        let bound = bind_src(&schema, "Id gt 2.5e0").unwrap();
        let (left, right) = binary_sides(&bound);
        assert!(matches!(left.kind, BoundKind::Convert(_)));
        assert_eq!(left.ty, EdmType::Primitive(PrimitiveKind::Double));
        assert_eq!(right.ty, EdmType::Primitive(PrimitiveKind::Double));
    }

    #[test]
    fn integer_literal_folds_to_decimal() {
        let schema = schema();
        let bound = bind_src(&schema, "Balance ge 10").unwrap();
        let (left, right) = binary_sides(&bound);
        assert!(matches!(left.kind, BoundKind::Property(_)));
        assert!(matches!(right.as_constant(), Some(Literal::Decimal(_))));
    }

    #[test]
    fn string_against_number_is_a_mismatch() {
        let schema = schema();
        let err = bind_src(&schema, "Name eq 5").unwrap_err();
        assert!(matches!(err, BindError::TypeMismatch { ref operator, .. } if operator == "eq"));
    }

    #[test]
    fn date_against_datetime_is_a_mismatch() {
        let schema = schema();
        let err = bind_src(&schema, "Born eq 2024-01-01T00:00:00Z").unwrap_err();
        assert!(matches!(err, BindError::TypeMismatch { .. }));
    }

    #[test]
    fn unknown_property_reports_offset_of_name() {
        let schema = schema();
        let err = bind_src(&schema, "Name eq 'x' and Address/Zip eq '1'").unwrap_err();
        assert_eq!(
            err,
            BindError::UnknownProperty {
                name: "Zip".to_owned(),
                containing_type: "Sales.Address".to_owned(),
                position: 24,
            }
        );
    }

    #[test]
    fn nullable_navigation_marks_path_null_propagating() {
        let schema = schema();
        let bound = bind_src(&schema, "Manager/Name eq 'x'").unwrap();
        let (left, _) = binary_sides(&bound);
        let path = left.as_path().unwrap();
        assert!(path.null_propagating);
        assert_eq!(path.to_string(), "Manager/Name");
        assert!(left.nullable);
    }

    #[test]
    fn cast_narrows_to_derived_type() {
        let schema = schema();
        let bound = bind_src(&schema, "Sales.VipCustomer/Tier gt 1").unwrap();
        let (left, _) = binary_sides(&bound);
        assert_eq!(left.as_path().unwrap().segments(), vec!["Sales.VipCustomer", "Tier"]);
    }

    #[test]
    fn cast_to_unrelated_type_fails() {
        let schema = schema();
        let err = bind_src(&schema, "Manager/Sales.Order/Amount gt 1").unwrap_err();
        assert!(matches!(err, BindError::InvalidCast { position: 8, .. }));
    }

    #[test]
    fn derived_member_needs_cast() {
        let schema = schema();
        let err = bind_src(&schema, "Tier gt 1").unwrap_err();
        assert!(matches!(err, BindError::UnknownProperty { .. }));
    }

    #[test]
    fn collection_needs_lambda() {
        let schema = schema();
        let err = bind_src(&schema, "Orders/Amount gt 1").unwrap_err();
        assert!(matches!(err, BindError::InvalidPath { .. }));

        let ok = bind_src(&schema, "Orders/any(o: o/Amount gt 1)").unwrap();
        assert!(matches!(ok.kind, BoundKind::Lambda { .. }));
    }

    #[test]
    fn lambda_over_primitive_collection() {
        let schema = schema();
        assert!(bind_src(&schema, "Tags/any(t: t eq 'vip')").is_ok());
        assert!(bind_src(&schema, "Tags/any()").is_ok());
        assert!(bind_src(&schema, "Tags/all()").is_err());
    }

    #[test]
    fn unscoped_name_in_lambda_resolves_against_it() {
        let schema = schema();
        let err = bind_src(&schema, "Orders/any(o: x/Amount gt 1)").unwrap_err();
        assert!(matches!(err, BindError::UnknownProperty { ref name, .. } if name == "x"));
    }

    #[test]
    fn count_segment_is_int64() {
        let schema = schema();
        let bound = bind_src(&schema, "Orders/$count gt 2").unwrap();
        let (left, _) = binary_sides(&bound);
        assert_eq!(left.ty, EdmType::Primitive(PrimitiveKind::Int64));
    }

    #[test]
    fn enum_against_string_literal() {
        let schema = schema();
        let bound = bind_src(&schema, "Favorite eq 'Blue'").unwrap();
        let (_, right) = binary_sides(&bound);
        assert!(matches!(right.kind, BoundKind::EnumConstant { value: 1, .. }));

        let err = bind_src(&schema, "Favorite eq 'Green'").unwrap_err();
        assert!(matches!(err, BindError::UnknownProperty { .. }));
    }

    #[test]
    fn has_on_flags_enum() {
        let schema = schema();
        assert!(bind_src(&schema, "Rights has Sales.Access'Write'").is_ok());
        assert!(bind_src(&schema, "Name has 'x'").is_err());
    }

    #[test]
    fn datetime_arithmetic() {
        let schema = schema();
        assert!(bind_src(&schema, "Since add duration'P1D' gt 2024-01-01T00:00:00Z").is_ok());
        assert!(bind_src(&schema, "Since sub Since gt duration'PT1H'").is_ok());
        assert!(bind_src(&schema, "Since add Since gt Since").is_err());
    }

    #[test]
    fn null_takes_the_other_side() {
        let schema = schema();
        let bound = bind_src(&schema, "Name eq null").unwrap();
        let (_, right) = binary_sides(&bound);
        assert_eq!(right.ty, EdmType::Primitive(PrimitiveKind::String));
    }

    #[test]
    fn in_list_promotes_numbers() {
        let schema = schema();
        let bound = bind_src(&schema, "Level in (1, 2.5)").unwrap();
        let BoundKind::In { operand, list } = &bound.kind else {
            panic!("expected in");
        };
        assert_eq!(operand.ty, EdmType::Primitive(PrimitiveKind::Decimal));
        assert!(list.iter().all(|i| i.ty == operand.ty));
    }

    #[test]
    fn null_operand_takes_the_list_type() {
        let schema = schema();
        let bound = bind_src(&schema, "null in (1, 2)").unwrap();
        let BoundKind::In { operand, list } = &bound.kind else {
            panic!("expected in");
        };
        assert!(operand.ty.is_scalar());
        assert!(list.iter().all(|i| i.ty == operand.ty));

        let bound = bind_src(&schema, "null in (null, Name)").unwrap();
        let BoundKind::In { operand, .. } = &bound.kind else {
            panic!("expected in");
        };
        assert_eq!(operand.ty, EdmType::Primitive(PrimitiveKind::String));
        assert!(bind_src(&schema, "null in (null)").is_ok());
    }

    #[test]
    fn non_boolean_filter_is_rejected() {
        let schema = schema();
        let err = bind_src(&schema, "Level add 1").unwrap_err();
        assert!(matches!(err, BindError::NonBooleanFilter { position: 0, .. }));
    }

    #[test]
    fn logical_operators_need_booleans() {
        let schema = schema();
        let err = bind_src(&schema, "Name and Id eq 1").unwrap_err();
        assert!(matches!(err, BindError::TypeMismatch { ref operator, .. } if operator == "and"));
    }

    #[test]
    fn cancelled_token_stops_binding() {
        let schema = schema();
        let tokens = tokenize("Id eq 1").unwrap();
        let tree = parse_filter(&tokens).unwrap();
        let root = schema.find_type("Customer").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = bind(&tree, &schema, root, &cancel).unwrap_err();
        assert_eq!(err, BindError::Cancelled);
    }

    #[test]
    fn case_insensitive_properties_resolve_to_canonical_name() {
        let schema = schema();
        let tokens = tokenize("name eq 'x'").unwrap();
        let tree = parse_filter(&tokens).unwrap();
        let root = schema.find_type("Customer").unwrap();
        let cancel = CancellationToken::new();
        let bound = Binder::new(&schema, root, &cancel)
            .case_insensitive_properties(true)
            .bind_filter(&tree)
            .unwrap();
        let (left, _) = binary_sides(&bound);
        assert_eq!(left.as_path().unwrap().to_string(), "Name");
    }
}
