//! Built-in function table, overload resolution and `cast`/`isof`.

use std::fmt;

use serde::Serialize;

use super::types::widening_cost;
use super::{Binder, BoundKind, BoundNode, EdmType, convert};
use crate::error::BindError;
use crate::schema::{PrimitiveKind, TypeId, TypeKind};
use crate::syntax::{Span, SyntaxNode};

use PrimitiveKind::{Date, DateTimeOffset, Decimal, Double, Int32, TimeOfDay};

const STRING: PrimitiveKind = PrimitiveKind::String;
const BOOLEAN: PrimitiveKind = PrimitiveKind::Boolean;

/// Supported canonical functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinFunction {
    Contains,
    StartsWith,
    EndsWith,
    Length,
    IndexOf,
    Substring,
    ToLower,
    ToUpper,
    Trim,
    Concat,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Date,
    Time,
    Now,
    Round,
    Floor,
    Ceiling,
}

/// One overload: parameter kinds and result kind.
#[derive(Clone, Copy, Debug)]
struct Signature {
    params: &'static [PrimitiveKind],
    returns: PrimitiveKind,
}

const fn sig(params: &'static [PrimitiveKind], returns: PrimitiveKind) -> Signature {
    Signature { params, returns }
}

impl BuiltinFunction {
    pub const ALL: [BuiltinFunction; 22] = [
        BuiltinFunction::Contains,
        BuiltinFunction::StartsWith,
        BuiltinFunction::EndsWith,
        BuiltinFunction::Length,
        BuiltinFunction::IndexOf,
        BuiltinFunction::Substring,
        BuiltinFunction::ToLower,
        BuiltinFunction::ToUpper,
        BuiltinFunction::Trim,
        BuiltinFunction::Concat,
        BuiltinFunction::Year,
        BuiltinFunction::Month,
        BuiltinFunction::Day,
        BuiltinFunction::Hour,
        BuiltinFunction::Minute,
        BuiltinFunction::Second,
        BuiltinFunction::Date,
        BuiltinFunction::Time,
        BuiltinFunction::Now,
        BuiltinFunction::Round,
        BuiltinFunction::Floor,
        BuiltinFunction::Ceiling,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            BuiltinFunction::Contains => "contains",
            BuiltinFunction::StartsWith => "startswith",
            BuiltinFunction::EndsWith => "endswith",
            BuiltinFunction::Length => "length",
            BuiltinFunction::IndexOf => "indexof",
            BuiltinFunction::Substring => "substring",
            BuiltinFunction::ToLower => "tolower",
            BuiltinFunction::ToUpper => "toupper",
            BuiltinFunction::Trim => "trim",
            BuiltinFunction::Concat => "concat",
            BuiltinFunction::Year => "year",
            BuiltinFunction::Month => "month",
            BuiltinFunction::Day => "day",
            BuiltinFunction::Hour => "hour",
            BuiltinFunction::Minute => "minute",
            BuiltinFunction::Second => "second",
            BuiltinFunction::Date => "date",
            BuiltinFunction::Time => "time",
            BuiltinFunction::Now => "now",
            BuiltinFunction::Round => "round",
            BuiltinFunction::Floor => "floor",
            BuiltinFunction::Ceiling => "ceiling",
        }
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    fn signatures(self) -> &'static [Signature] {
        const STRING_PREDICATE: &[Signature] = &[sig(&[STRING, STRING], BOOLEAN)];
        const STRING_MAP: &[Signature] = &[sig(&[STRING], STRING)];
        const LENGTH: &[Signature] = &[sig(&[STRING], Int32)];
        const INDEX_OF: &[Signature] = &[sig(&[STRING, STRING], Int32)];
        const SUBSTRING: &[Signature] = &[
            sig(&[STRING, Int32], STRING),
            sig(&[STRING, Int32, Int32], STRING),
        ];
        const CONCAT: &[Signature] = &[sig(&[STRING, STRING], STRING)];
        const DATE_PART: &[Signature] = &[sig(&[Date], Int32), sig(&[DateTimeOffset], Int32)];
        const TIME_PART: &[Signature] =
            &[sig(&[TimeOfDay], Int32), sig(&[DateTimeOffset], Int32)];
        const DATE: &[Signature] = &[sig(&[DateTimeOffset], Date)];
        const TIME: &[Signature] = &[sig(&[DateTimeOffset], TimeOfDay)];
        const NOW: &[Signature] = &[sig(&[], DateTimeOffset)];
        const ROUNDING: &[Signature] = &[sig(&[Decimal], Decimal), sig(&[Double], Double)];

        match self {
            BuiltinFunction::Contains | BuiltinFunction::StartsWith | BuiltinFunction::EndsWith => {
                STRING_PREDICATE
            }
            BuiltinFunction::Length => LENGTH,
            BuiltinFunction::IndexOf => INDEX_OF,
            BuiltinFunction::Substring => SUBSTRING,
            BuiltinFunction::ToLower | BuiltinFunction::ToUpper | BuiltinFunction::Trim => {
                STRING_MAP
            }
            BuiltinFunction::Concat => CONCAT,
            BuiltinFunction::Year | BuiltinFunction::Month | BuiltinFunction::Day => DATE_PART,
            BuiltinFunction::Hour | BuiltinFunction::Minute | BuiltinFunction::Second => {
                TIME_PART
            }
            BuiltinFunction::Date => DATE,
            BuiltinFunction::Time => TIME,
            BuiltinFunction::Now => NOW,
            BuiltinFunction::Round | BuiltinFunction::Floor | BuiltinFunction::Ceiling => ROUNDING,
        }
    }
}

impl fmt::Display for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<_> = self.params.iter().map(|p| p.name()).collect();
        write!(f, "({}) -> {}", params.join(", "), self.returns.name())
    }
}

/// Total widening cost of passing `args` to `signature`.
fn match_cost(signature: &Signature, args: &[BoundNode]) -> Option<u32> {
    if signature.params.len() != args.len() {
        return None;
    }
    signature
        .params
        .iter()
        .zip(args)
        .try_fold(0_u32, |total, (param, arg)| {
            let cost = match &arg.ty {
                EdmType::Null => 0,
                EdmType::Primitive(kind) => widening_cost(*kind, *param)?,
                _ => return None,
            };
            Some(total + u32::from(cost))
        })
}

/// Primitive conversions `cast` accepts.
fn castable(from: &EdmType, to: PrimitiveKind) -> bool {
    match from {
        EdmType::Null => true,
        EdmType::Primitive(kind) => {
            *kind == to
                || to == STRING
                || (kind.is_numeric() && to.is_numeric())
                || (*kind == Date && to == DateTimeOffset)
        }
        EdmType::Enum(_) => to == STRING,
        EdmType::Structured(_) | EdmType::Collection(_) => false,
    }
}

impl Binder<'_> {
    pub(super) fn bind_call(
        &mut self,
        name: &str,
        args: &[SyntaxNode],
        span: Span,
    ) -> Result<BoundNode, BindError> {
        if name.eq_ignore_ascii_case("cast") {
            return self.bind_cast(name, args, span);
        }
        if name.eq_ignore_ascii_case("isof") {
            return self.bind_isof(name, args, span);
        }

        let function = BuiltinFunction::from_name(name).ok_or_else(|| BindError::UnknownFunction {
            name: name.to_owned(),
            position: span.start,
        })?;
        let args = args
            .iter()
            .map(|arg| self.bind(arg))
            .collect::<Result<Vec<_>, _>>()?;

        let mut best: Vec<(&Signature, u32)> = Vec::new();
        for signature in function.signatures() {
            let Some(cost) = match_cost(signature, &args) else {
                continue;
            };
            match best.first().map(|(_, min)| *min) {
                Some(min) if cost > min => {}
                Some(min) if cost < min => best = vec![(signature, cost)],
                _ => best.push((signature, cost)),
            }
        }

        let signature = match best.as_slice() {
            [(signature, _)] => *signature,
            [] => {
                return Err(BindError::FunctionSignatureMismatch {
                    name: function.name().to_owned(),
                    got: self.argument_types(&args),
                    detail: format!("expected {}", join(function.signatures().iter())),
                    position: span.start,
                });
            }
            many => {
                return Err(BindError::AmbiguousOverload {
                    name: function.name().to_owned(),
                    candidates: join(many.iter().map(|(s, _)| *s)),
                    position: span.start,
                });
            }
        };

        let nullable = args.iter().any(|a| a.nullable);
        let args = args
            .into_iter()
            .zip(signature.params)
            .map(|(arg, param)| convert(arg, *param))
            .collect();
        Ok(BoundNode::new(
            BoundKind::Function { function, args },
            EdmType::Primitive(signature.returns),
            nullable,
            span,
        ))
    }

    fn argument_types(&self, args: &[BoundNode]) -> String {
        let types: Vec<_> = args.iter().map(|a| self.describe(&a.ty)).collect();
        types.join(", ")
    }

    /// Splits `cast`/`isof` arguments into the operand and the type name.
    fn type_arguments<'n>(
        &mut self,
        name: &str,
        args: &'n [SyntaxNode],
        span: Span,
    ) -> Result<(BoundNode, &'n str, usize, TypeId), BindError> {
        let (operand, type_arg) = match args {
            [type_arg] => (self.it(span), type_arg),
            [operand, type_arg] => (self.bind(operand)?, type_arg),
            _ => {
                return Err(BindError::FunctionSignatureMismatch {
                    name: name.to_ascii_lowercase(),
                    got: format!("{} arguments", args.len()),
                    detail: "expected ([expression,] type name)".to_owned(),
                    position: span.start,
                });
            }
        };
        let SyntaxNode::QualifiedName {
            name: type_name,
            span: type_span,
        } = type_arg
        else {
            return Err(BindError::FunctionSignatureMismatch {
                name: name.to_ascii_lowercase(),
                got: self.describe(&operand.ty),
                detail: "the last argument must be a qualified type name".to_owned(),
                position: type_arg.span().start,
            });
        };
        let target = self
            .schema
            .find_type(type_name)
            .ok_or_else(|| BindError::UnknownType {
                name: type_name.clone(),
                position: type_span.start,
            })?;
        Ok((operand, type_name, type_span.start, target))
    }

    fn bind_cast(
        &mut self,
        name: &str,
        args: &[SyntaxNode],
        span: Span,
    ) -> Result<BoundNode, BindError> {
        let (operand, type_name, at, target) = self.type_arguments(name, args, span)?;
        let target_ty = self.schema.get(target);

        let ty = match &target_ty.kind {
            TypeKind::Complex | TypeKind::Entity => {
                // Structured casts narrow the path so members can follow.
                return self.cast_segment(operand, type_name, at, span);
            }
            TypeKind::Primitive(kind) if castable(&operand.ty, *kind) => EdmType::Primitive(*kind),
            TypeKind::Enum(_)
                if matches!(operand.ty, EdmType::Null | EdmType::Primitive(STRING))
                    || operand.ty == EdmType::Enum(target) =>
            {
                EdmType::Enum(target)
            }
            TypeKind::Primitive(_) | TypeKind::Enum(_) => {
                return Err(BindError::InvalidCast {
                    source_type: self.describe(&operand.ty),
                    target: target_ty.name.clone(),
                    position: at,
                });
            }
        };

        Ok(BoundNode::new(
            BoundKind::Cast {
                operand: operand.boxed(),
                target_name: target_ty.name.clone(),
                accepted: vec![target_ty.name.clone()],
            },
            ty,
            true,
            span,
        ))
    }

    fn bind_isof(
        &mut self,
        name: &str,
        args: &[SyntaxNode],
        span: Span,
    ) -> Result<BoundNode, BindError> {
        let (operand, _, at, target) = self.type_arguments(name, args, span)?;
        let target_ty = EdmType::of_type(self.schema, target);

        let accepted = match (operand.ty.structured_id(), &target_ty) {
            (Some(current), EdmType::Structured(_))
                if !operand.ty.is_collection()
                    && (self.schema.is_same_or_derived(target, current)
                        || self.schema.is_same_or_derived(current, target)) =>
            {
                self.accepted_names(target)
            }
            (None, EdmType::Primitive(_) | EdmType::Enum(_))
                if operand.ty.is_scalar() || operand.ty == EdmType::Null =>
            {
                vec![self.schema.type_name(target).to_owned()]
            }
            _ => {
                return Err(BindError::InvalidCast {
                    source_type: self.describe(&operand.ty),
                    target: self.schema.type_name(target).to_owned(),
                    position: at,
                });
            }
        };

        Ok(BoundNode::new(
            BoundKind::IsOf {
                operand: operand.boxed(),
                target: target_ty,
                target_name: self.schema.type_name(target).to_owned(),
                accepted,
            },
            EdmType::BOOLEAN,
            false,
            span,
        ))
    }
}

fn join<'s>(signatures: impl Iterator<Item = &'s Signature>) -> String {
    signatures
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::lexer::tokenize;
    use crate::schema::{Schema, SchemaBuilder, TypeDescription};
    use crate::syntax::parse_filter;

    fn schema() -> Schema {
        SchemaBuilder::new("NS")
            .with_type(
                TypeDescription::entity("Person")
                    .key("Id")
                    .required("Id", "Edm.Int32")
                    .property("Name", "Edm.String")
                    .property("Born", "Edm.Date")
                    .property("Seen", "Edm.DateTimeOffset")
                    .property("Score", "Edm.Double"),
            )
            .with_type(
                TypeDescription::entity("Employee")
                    .base("Person")
                    .property("OnlyOnDerived", "Edm.Int32"),
            )
            .with_type(TypeDescription::entity("Robot").property("Serial", "Edm.String"))
            .build()
            .unwrap()
    }

    fn bind_src(src: &str) -> Result<BoundNode, BindError> {
        let schema = schema();
        let tokens = tokenize(src).unwrap();
        let tree = parse_filter(&tokens).unwrap();
        let root = schema.find_type("Person").unwrap();
        let cancel = CancellationToken::new();
        Binder::new(&schema, root, &cancel).bind(&tree)
    }

    fn function_of(node: &BoundNode) -> BuiltinFunction {
        match &node.kind {
            BoundKind::Function { function, .. } => *function,
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn names_are_case_insensitive() {
        let bound = bind_src("StartsWith(Name, 'A')").unwrap();
        assert_eq!(function_of(&bound), BuiltinFunction::StartsWith);
        assert!(bound.ty.is_boolean());
    }

    #[test]
    fn unknown_function() {
        let err = bind_src("soundex(Name) eq 'A'").unwrap_err();
        assert_eq!(
            err,
            BindError::UnknownFunction {
                name: "soundex".to_owned(),
                position: 0,
            }
        );
    }

    #[test]
    fn wrong_arity_is_a_signature_mismatch() {
        let err = bind_src("contains(Name)").unwrap_err();
        assert!(matches!(err, BindError::FunctionSignatureMismatch { ref name, .. } if name == "contains"));
    }

    #[test]
    fn wrong_argument_type_is_a_signature_mismatch() {
        let err = bind_src("length(Id) gt 1").unwrap_err();
        let BindError::FunctionSignatureMismatch { got, detail, .. } = err else {
            panic!("expected signature mismatch");
        };
        assert_eq!(got, "Edm.Int32");
        assert!(detail.contains("(Edm.String) -> Edm.Int32"));
    }

    #[test]
    fn substring_has_two_overloads() {
        assert!(bind_src("substring(Name, 1) eq 'x'").is_ok());
        assert!(bind_src("substring(Name, 1, 2) eq 'x'").is_ok());
    }

    #[test]
    fn date_parts_accept_date_and_datetime() {
        assert!(bind_src("year(Born) eq 2000").is_ok());
        assert!(bind_src("year(Seen) eq 2000").is_ok());
        assert!(bind_src("hour(Born) eq 1").is_err());
    }

    #[test]
    fn integer_argument_prefers_decimal_rounding() {
        let bound = bind_src("round(Id)").unwrap();
        assert_eq!(bound.ty, EdmType::Primitive(Decimal));
        let BoundKind::Function { args, .. } = &bound.kind else {
            panic!("expected function");
        };
        assert!(matches!(args[0].kind, BoundKind::Convert(_)));

        let bound = bind_src("floor(Score)").unwrap();
        assert_eq!(bound.ty, EdmType::Primitive(Double));
    }

    #[test]
    fn null_argument_is_ambiguous_between_overloads() {
        let err = bind_src("round(null)").unwrap_err();
        assert!(matches!(err, BindError::AmbiguousOverload { ref name, .. } if name == "round"));
    }

    #[test]
    fn now_takes_no_arguments() {
        let bound = bind_src("now()").unwrap();
        assert_eq!(bound.ty, EdmType::Primitive(DateTimeOffset));
        assert!(!bound.nullable);
    }

    #[test]
    fn single_argument_cast_narrows_it() {
        let bound = bind_src("cast(NS.Employee)/OnlyOnDerived eq 1").unwrap();
        let BoundKind::Binary { left, .. } = &bound.kind else {
            panic!("expected binary");
        };
        assert_eq!(
            left.as_path().unwrap().segments(),
            vec!["NS.Employee", "OnlyOnDerived"]
        );
    }

    #[test]
    fn cast_to_unrelated_type_is_invalid() {
        let err = bind_src("cast(NS.Robot)/Serial eq 'x'").unwrap_err();
        assert!(matches!(err, BindError::InvalidCast { position: 5, .. }));
    }

    #[test]
    fn primitive_cast() {
        let bound = bind_src("cast(Id, Edm.String) eq '1'").unwrap();
        let BoundKind::Binary { left, .. } = &bound.kind else {
            panic!("expected binary");
        };
        assert_eq!(left.ty, EdmType::Primitive(STRING));
        assert!(bind_src("cast(Name, Edm.Guid) eq null").is_err());
    }

    #[test]
    fn cast_type_must_exist() {
        let err = bind_src("cast(NS.Nobody)/Id eq 1").unwrap_err();
        assert!(matches!(err, BindError::UnknownType { ref name, .. } if name == "NS.Nobody"));
    }

    #[test]
    fn isof_lists_accepted_types() {
        let bound = bind_src("isof(NS.Person)").unwrap();
        let BoundKind::IsOf { accepted, .. } = &bound.kind else {
            panic!("expected isof");
        };
        assert_eq!(accepted, &vec!["NS.Person".to_owned(), "NS.Employee".to_owned()]);
        assert!(bind_src("isof(NS.Robot)").is_err());
    }
}
