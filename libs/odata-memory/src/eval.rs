//! Expression evaluation with three-valued logic.
//!
//! `Scalar::Null` doubles as *unknown*: comparisons and arithmetic on null
//! yield null, `and`/`or` follow Kleene logic, and a filter keeps an instance
//! only when its predicate is exactly `true`. Paths that cross a missing or
//! null member evaluate to null instead of failing.

use std::cmp::Ordering;

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};
use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Utc};
use odata_core::bind::{BuiltinFunction as F, EdmType};
use odata_core::syntax::{BinaryOperator, LambdaKind, UnaryOperator};
use odata_core::{BoundKind, BoundNode, PathStep, PropertyPath};
use serde_json::Value as Json;

use crate::error::EvalError;
use crate::value::Scalar;

/// JSON property carrying the concrete type of an instance.
pub const TYPE_ANNOTATION: &str = "@odata.type";

/// Instances bound to `$it` and to enclosing lambda variables.
#[derive(Clone)]
pub struct Scope<'a> {
    it: &'a Json,
    vars: Vec<(&'a str, &'a Json)>,
}

impl<'a> Scope<'a> {
    pub fn new(it: &'a Json) -> Self {
        Self {
            it,
            vars: Vec::new(),
        }
    }

    fn with<'b>(&self, name: &'b str, value: &'b Json) -> Scope<'b>
    where
        'a: 'b,
    {
        let mut vars: Vec<(&'b str, &'b Json)> = self.vars.clone();
        vars.push((name, value));
        Scope { it: self.it, vars }
    }

    fn lookup(&self, name: &str) -> Option<&'a Json> {
        if name == PropertyPath::IT {
            return Some(self.it);
        }
        self.vars
            .iter()
            .rev()
            .find(|(var, _)| *var == name)
            .map(|(_, value)| *value)
    }
}

/// Whether `predicate` holds for the instance in `scope`; unknown is false.
///
/// # Errors
/// `EvalError` for runtime faults such as division by zero.
pub fn matches(predicate: &BoundNode, scope: &Scope<'_>) -> Result<bool, EvalError> {
    Ok(eval(predicate, scope)? == Scalar::Bool(true))
}

/// Evaluates `node` against the instances in `scope`.
///
/// # Errors
/// `EvalError` for runtime faults such as division by zero.
pub fn eval(node: &BoundNode, scope: &Scope<'_>) -> Result<Scalar, EvalError> {
    Ok(match &node.kind {
        BoundKind::Constant(lit) => Scalar::from_literal(lit),
        BoundKind::EnumConstant { members, value, .. } => Scalar::Enum {
            members: members.iter().cloned().collect(),
            value: Some(*value),
        },
        BoundKind::Property(path) => {
            let json = resolve(path, scope);
            json.map_or(Scalar::Null, |json| Scalar::from_json(json, &node.ty))
        }
        BoundKind::Count(source) => match eval(source, scope)? {
            Scalar::Json(Json::Array(items)) => count(items.len()),
            _ => Scalar::Null,
        },
        BoundKind::Binary { op, left, right } => binary(*op, node, left, right, scope)?,
        BoundKind::Unary { op, operand } => unary(*op, eval(operand, scope)?),
        BoundKind::Function { function, args } => {
            let args = args
                .iter()
                .map(|a| eval(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, args)
        }
        BoundKind::Convert(inner) => {
            let value = eval(inner, scope)?;
            match node.ty.primitive() {
                Some(kind) => value.coerce(kind),
                None => value,
            }
        }
        BoundKind::Cast {
            operand, accepted, ..
        } => match (eval(operand, scope)?, node.ty.primitive()) {
            (Scalar::Null, _) => Scalar::Null,
            (value, Some(kind)) => value.coerce(kind),
            (Scalar::Json(json), None) if has_type(&json, accepted) => Scalar::Json(json),
            _ => Scalar::Null,
        },
        BoundKind::IsOf {
            operand,
            target,
            accepted,
            ..
        } => match (eval(operand, scope)?, target) {
            (Scalar::Null, _) => Scalar::Bool(false),
            (value, EdmType::Primitive(kind)) => Scalar::Bool(!value.coerce(*kind).is_null()),
            (Scalar::Json(json), _) => Scalar::Bool(has_type(&json, accepted)),
            _ => Scalar::Bool(false),
        },
        BoundKind::Lambda {
            kind,
            source,
            variable,
            predicate,
        } => lambda(*kind, source, variable.as_deref(), predicate.as_deref(), scope)?,
        BoundKind::In { operand, list } => {
            let value = eval(operand, scope)?;
            let mut result = Scalar::Bool(false);
            for item in list {
                result = or(result, equals(&value, &eval(item, scope)?));
                if result == Scalar::Bool(true) {
                    break;
                }
            }
            result
        }
    })
}

/// Walks `path` from its variable; a missing member or a cast the instance
/// does not satisfy yields `None`.
pub fn resolve<'a>(path: &PropertyPath, scope: &Scope<'a>) -> Option<&'a Json> {
    let mut current = scope.lookup(&path.variable)?;
    for step in &path.steps {
        if current.is_null() {
            return None;
        }
        current = match step {
            PathStep::Property { name, .. } | PathStep::Navigation { name, .. } => {
                current.get(name)?
            }
            PathStep::Cast { accepted, .. } => {
                if !has_type(current, accepted) {
                    return None;
                }
                current
            }
        };
    }
    Some(current)
}

/// Whether the instance's `@odata.type` names one of `accepted`.
pub fn has_type(json: &Json, accepted: &[String]) -> bool {
    json.get(TYPE_ANNOTATION)
        .and_then(Json::as_str)
        .map(|t| t.trim_start_matches('#'))
        .is_some_and(|t| accepted.iter().any(|a| a == t))
}

fn lambda(
    kind: LambdaKind,
    source: &BoundNode,
    variable: Option<&str>,
    predicate: Option<&BoundNode>,
    scope: &Scope<'_>,
) -> Result<Scalar, EvalError> {
    let items = match eval(source, scope)? {
        Scalar::Json(Json::Array(items)) => items,
        _ => return Ok(Scalar::Null),
    };
    let (Some(variable), Some(predicate)) = (variable, predicate) else {
        return Ok(match kind {
            LambdaKind::Any => Scalar::Bool(!items.is_empty()),
            LambdaKind::All => Scalar::Bool(true),
        });
    };

    let mut result = Scalar::Bool(kind == LambdaKind::All);
    for item in &items {
        let inner = scope.with(variable, item);
        let value = eval(predicate, &inner)?;
        result = match kind {
            LambdaKind::Any => or(result, value),
            LambdaKind::All => and(result, value),
        };
    }
    Ok(result)
}

fn and(a: Scalar, b: Scalar) -> Scalar {
    match (a, b) {
        (Scalar::Bool(false), _) | (_, Scalar::Bool(false)) => Scalar::Bool(false),
        (Scalar::Bool(true), Scalar::Bool(true)) => Scalar::Bool(true),
        _ => Scalar::Null,
    }
}

fn or(a: Scalar, b: Scalar) -> Scalar {
    match (a, b) {
        (Scalar::Bool(true), _) | (_, Scalar::Bool(true)) => Scalar::Bool(true),
        (Scalar::Bool(false), Scalar::Bool(false)) => Scalar::Bool(false),
        _ => Scalar::Null,
    }
}

/// `eq` semantics: null equals only null.
fn equals(a: &Scalar, b: &Scalar) -> Scalar {
    match (a.is_null(), b.is_null()) {
        (true, true) => Scalar::Bool(true),
        (true, false) | (false, true) => Scalar::Bool(false),
        (false, false) => Scalar::Bool(a.compare(b) == Some(Ordering::Equal)),
    }
}

fn binary(
    op: BinaryOperator,
    node: &BoundNode,
    left: &BoundNode,
    right: &BoundNode,
    scope: &Scope<'_>,
) -> Result<Scalar, EvalError> {
    let l = eval(left, scope)?;
    match op {
        BinaryOperator::And if l == Scalar::Bool(false) => return Ok(l),
        BinaryOperator::Or if l == Scalar::Bool(true) => return Ok(l),
        _ => {}
    }
    let r = eval(right, scope)?;

    Ok(match op {
        BinaryOperator::And => and(l, r),
        BinaryOperator::Or => or(l, r),
        BinaryOperator::Eq => equals(&l, &r),
        BinaryOperator::Ne => match equals(&l, &r) {
            Scalar::Bool(b) => Scalar::Bool(!b),
            other => other,
        },
        BinaryOperator::Gt | BinaryOperator::Ge | BinaryOperator::Lt | BinaryOperator::Le => {
            match l.compare(&r) {
                Some(ord) => Scalar::Bool(match op {
                    BinaryOperator::Gt => ord.is_gt(),
                    BinaryOperator::Ge => ord.is_ge(),
                    BinaryOperator::Lt => ord.is_lt(),
                    _ => ord.is_le(),
                }),
                None => Scalar::Null,
            }
        }
        BinaryOperator::Has => has(l, r),
        BinaryOperator::Add
        | BinaryOperator::Sub
        | BinaryOperator::Mul
        | BinaryOperator::Div
        | BinaryOperator::DivBy
        | BinaryOperator::Mod => arithmetic(op, node, l, r)?,
    })
}

fn has(value: Scalar, flags: Scalar) -> Scalar {
    match (value, flags) {
        (
            Scalar::Enum {
                value: Some(v), ..
            },
            Scalar::Enum {
                value: Some(f), ..
            },
        ) if v >= 0 => Scalar::Bool((v & f) == f),
        (Scalar::Enum { members: v, .. }, Scalar::Enum { members: f, .. }) if !v.is_empty() => {
            Scalar::Bool(f.is_subset(&v))
        }
        _ => Scalar::Null,
    }
}

fn arithmetic(
    op: BinaryOperator,
    node: &BoundNode,
    l: Scalar,
    r: Scalar,
) -> Result<Scalar, EvalError> {
    let integral = node.ty.primitive().is_some_and(|k| k.is_integral());
    Ok(match (l, r) {
        (Scalar::Number(a), Scalar::Number(b)) => match op {
            BinaryOperator::Add => Scalar::Number(a + b),
            BinaryOperator::Sub => Scalar::Number(a - b),
            BinaryOperator::Mul => Scalar::Number(a * b),
            BinaryOperator::Div | BinaryOperator::DivBy | BinaryOperator::Mod if b.is_zero() => {
                return Err(EvalError::DivisionByZero);
            }
            BinaryOperator::Div if integral => {
                Scalar::Number((a / b).with_scale_round(0, RoundingMode::Down))
            }
            BinaryOperator::Mod => Scalar::Number(a % b),
            _ => Scalar::Number(a / b),
        },
        (Scalar::DateTime(t), Scalar::Duration(d)) => match op {
            BinaryOperator::Add => t.checked_add_signed(d).map_or(Scalar::Null, Scalar::DateTime),
            BinaryOperator::Sub => t.checked_sub_signed(d).map_or(Scalar::Null, Scalar::DateTime),
            _ => Scalar::Null,
        },
        (Scalar::DateTime(a), Scalar::DateTime(b)) if op == BinaryOperator::Sub => {
            Scalar::Duration(a.signed_duration_since(b))
        }
        (Scalar::Date(t), Scalar::Duration(d)) => match op {
            BinaryOperator::Add => t.checked_add_signed(d).map_or(Scalar::Null, Scalar::Date),
            BinaryOperator::Sub => t.checked_sub_signed(d).map_or(Scalar::Null, Scalar::Date),
            _ => Scalar::Null,
        },
        (Scalar::Date(a), Scalar::Date(b)) if op == BinaryOperator::Sub => {
            Scalar::Duration(a.signed_duration_since(b))
        }
        (Scalar::Duration(a), Scalar::Duration(b)) => match op {
            BinaryOperator::Add => a.checked_add(&b).map_or(Scalar::Null, Scalar::Duration),
            BinaryOperator::Sub => a.checked_sub(&b).map_or(Scalar::Null, Scalar::Duration),
            _ => Scalar::Null,
        },
        _ => Scalar::Null,
    })
}

fn unary(op: UnaryOperator, value: Scalar) -> Scalar {
    match (op, value) {
        (UnaryOperator::Not, Scalar::Bool(b)) => Scalar::Bool(!b),
        (UnaryOperator::Negate, Scalar::Number(n)) => Scalar::Number(-n),
        (UnaryOperator::Negate, Scalar::Duration(d)) => Scalar::Duration(-d),
        _ => Scalar::Null,
    }
}

fn call(function: F, args: Vec<Scalar>) -> Scalar {
    if function == F::Now {
        return Scalar::DateTime(Utc::now().fixed_offset());
    }
    if args.iter().any(Scalar::is_null) {
        return Scalar::Null;
    }
    let mut args = args.into_iter();
    let first = args.next().unwrap_or(Scalar::Null);
    let second = args.next();
    let third = args.next();

    match (function, first, second) {
        (F::Contains, Scalar::String(s), Some(Scalar::String(p))) => Scalar::Bool(s.contains(&p)),
        (F::StartsWith, Scalar::String(s), Some(Scalar::String(p))) => {
            Scalar::Bool(s.starts_with(&p))
        }
        (F::EndsWith, Scalar::String(s), Some(Scalar::String(p))) => Scalar::Bool(s.ends_with(&p)),
        (F::Length, Scalar::String(s), None) => count(s.chars().count()),
        (F::IndexOf, Scalar::String(s), Some(Scalar::String(p))) => match s.find(&p) {
            Some(byte) => count(s[..byte].chars().count()),
            None => Scalar::Number(BigDecimal::from(-1)),
        },
        (F::Substring, Scalar::String(s), Some(Scalar::Number(start))) => {
            substring(&s, &start, third.as_ref())
        }
        (F::ToLower, Scalar::String(s), None) => Scalar::String(s.to_lowercase()),
        (F::ToUpper, Scalar::String(s), None) => Scalar::String(s.to_uppercase()),
        (F::Trim, Scalar::String(s), None) => Scalar::String(s.trim().to_owned()),
        (F::Concat, Scalar::String(a), Some(Scalar::String(b))) => Scalar::String(a + &b),
        (F::Year, value, None) => date_part(&value, |d| i64::from(d.year())),
        (F::Month, value, None) => date_part(&value, |d| i64::from(d.month())),
        (F::Day, value, None) => date_part(&value, |d| i64::from(d.day())),
        (F::Hour, value, None) => time_part(&value, |t| i64::from(t.hour())),
        (F::Minute, value, None) => time_part(&value, |t| i64::from(t.minute())),
        (F::Second, value, None) => time_part(&value, |t| i64::from(t.second())),
        (F::Date, Scalar::DateTime(dt), None) => Scalar::Date(dt.date_naive()),
        (F::Time, Scalar::DateTime(dt), None) => Scalar::TimeOfDay(dt.time()),
        (F::Round, Scalar::Number(n), None) => {
            Scalar::Number(n.with_scale_round(0, RoundingMode::HalfUp))
        }
        (F::Floor, Scalar::Number(n), None) => {
            Scalar::Number(n.with_scale_round(0, RoundingMode::Floor))
        }
        (F::Ceiling, Scalar::Number(n), None) => {
            Scalar::Number(n.with_scale_round(0, RoundingMode::Ceiling))
        }
        _ => Scalar::Null,
    }
}

fn count(n: usize) -> Scalar {
    Scalar::Number(BigDecimal::from(u64::try_from(n).unwrap_or(u64::MAX)))
}

fn substring(s: &str, start: &BigDecimal, len: Option<&Scalar>) -> Scalar {
    let Some(start) = to_index(start) else {
        return Scalar::Null;
    };
    let rest = s.chars().skip(start);
    match len {
        None => Scalar::String(rest.collect()),
        Some(Scalar::Number(len)) => match to_index(len) {
            Some(len) => Scalar::String(rest.take(len).collect()),
            None => Scalar::Null,
        },
        Some(_) => Scalar::Null,
    }
}

/// Non-negative integral value as an index; negatives clamp to zero.
fn to_index(n: &BigDecimal) -> Option<usize> {
    let v = n.to_i64()?;
    Some(usize::try_from(v).unwrap_or(0))
}

fn date_part(value: &Scalar, part: impl Fn(NaiveDate) -> i64) -> Scalar {
    match value {
        Scalar::Date(d) => Scalar::Number(BigDecimal::from(part(*d))),
        Scalar::DateTime(dt) => Scalar::Number(BigDecimal::from(part(dt.date_naive()))),
        _ => Scalar::Null,
    }
}

fn time_part(value: &Scalar, part: impl Fn(NaiveTime) -> i64) -> Scalar {
    match value {
        Scalar::TimeOfDay(t) => Scalar::Number(BigDecimal::from(part(*t))),
        Scalar::DateTime(dt) => Scalar::Number(BigDecimal::from(part(dt.time()))),
        _ => Scalar::Null,
    }
}
