use bigdecimal::BigDecimal;

use crate::schema::{PrimitiveKind, Schema, TypeId, TypeKind, TypeRef};
use crate::syntax::Literal;

/// Static type of a bound expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EdmType {
    /// Type of the `null` literal before it is unified with the other operand.
    Null,
    Primitive(PrimitiveKind),
    Enum(TypeId),
    /// Complex or entity type.
    Structured(TypeId),
    Collection(Box<EdmType>),
}

impl EdmType {
    pub const BOOLEAN: EdmType = EdmType::Primitive(PrimitiveKind::Boolean);

    /// Element type of a schema type (never a collection).
    #[must_use]
    pub fn of_type(schema: &Schema, id: TypeId) -> EdmType {
        match &schema.get(id).kind {
            TypeKind::Primitive(p) => EdmType::Primitive(*p),
            TypeKind::Enum(_) => EdmType::Enum(id),
            TypeKind::Complex | TypeKind::Entity => EdmType::Structured(id),
        }
    }

    #[must_use]
    pub fn of_ref(schema: &Schema, ty: TypeRef) -> EdmType {
        let element = Self::of_type(schema, ty.id);
        if ty.collection {
            EdmType::Collection(Box::new(element))
        } else {
            element
        }
    }

    #[must_use]
    pub fn of_literal(lit: &Literal) -> EdmType {
        let kind = match lit {
            Literal::Null | Literal::Enum { .. } => return EdmType::Null,
            Literal::Boolean(_) => PrimitiveKind::Boolean,
            Literal::Int32(_) => PrimitiveKind::Int32,
            Literal::Int64(_) => PrimitiveKind::Int64,
            Literal::Decimal(_) => PrimitiveKind::Decimal,
            Literal::Double(_) => PrimitiveKind::Double,
            Literal::String(_) => PrimitiveKind::String,
            Literal::Guid(_) => PrimitiveKind::Guid,
            Literal::Date(_) => PrimitiveKind::Date,
            Literal::TimeOfDay(_) => PrimitiveKind::TimeOfDay,
            Literal::DateTimeOffset(_) => PrimitiveKind::DateTimeOffset,
            Literal::Duration(_) => PrimitiveKind::Duration,
        };
        EdmType::Primitive(kind)
    }

    #[must_use]
    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            EdmType::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.primitive().is_some_and(PrimitiveKind::is_numeric)
    }

    #[must_use]
    pub fn is_boolean(&self) -> bool {
        *self == EdmType::BOOLEAN
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(self, EdmType::Collection(_))
    }

    /// Primitive and enum values can be compared and sorted.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, EdmType::Primitive(_) | EdmType::Enum(_))
    }

    #[must_use]
    pub fn element(&self) -> Option<&EdmType> {
        match self {
            EdmType::Collection(e) => Some(e),
            _ => None,
        }
    }

    /// Structured type id of a single value or of a collection's elements.
    #[must_use]
    pub fn structured_id(&self) -> Option<TypeId> {
        match self {
            EdmType::Structured(id) => Some(*id),
            EdmType::Collection(e) => e.structured_id(),
            _ => None,
        }
    }

    /// Qualified type name for diagnostics.
    #[must_use]
    pub fn describe(&self, schema: &Schema) -> String {
        match self {
            EdmType::Null => "null".to_owned(),
            EdmType::Primitive(p) => p.name().to_owned(),
            EdmType::Enum(id) | EdmType::Structured(id) => schema.type_name(*id).to_owned(),
            EdmType::Collection(e) => format!("Collection({})", e.describe(schema)),
        }
    }
}

/// Widest numeric type of two operands.
///
/// Integers widen by size, then to `Decimal`; any floating operand makes the
/// result floating (`Double` unless both are `Single`).
#[must_use]
pub fn common_numeric(a: PrimitiveKind, b: PrimitiveKind) -> Option<PrimitiveKind> {
    let (ra, rb) = (a.numeric_rank()?, b.numeric_rank()?);
    let floating = |k: PrimitiveKind| matches!(k, PrimitiveKind::Single | PrimitiveKind::Double);
    Some(match (floating(a), floating(b)) {
        (true, true) if a == b => a,
        (true, _) | (_, true) => PrimitiveKind::Double,
        _ if ra >= rb => a,
        _ => b,
    })
}

/// Implicit conversion cost from `from` to `to`, `None` if not allowed.
pub(crate) fn widening_cost(from: PrimitiveKind, to: PrimitiveKind) -> Option<u8> {
    if from == to {
        return Some(0);
    }
    let (rf, rt) = (from.numeric_rank()?, to.numeric_rank()?);
    (rf < rt).then(|| rt - rf)
}

/// Re-types a numeric literal; `None` when the value does not fit.
pub(crate) fn convert_literal(lit: &Literal, to: PrimitiveKind) -> Option<Literal> {
    let as_decimal = |lit: &Literal| -> Option<BigDecimal> {
        match lit {
            Literal::Int32(v) => Some(BigDecimal::from(*v)),
            Literal::Int64(v) => Some(BigDecimal::from(*v)),
            Literal::Decimal(d) => Some(d.clone()),
            _ => None,
        }
    };
    match (lit, to) {
        (Literal::Int32(v), PrimitiveKind::Int64) => Some(Literal::Int64(i64::from(*v))),
        (Literal::Int32(v), PrimitiveKind::Double | PrimitiveKind::Single) => {
            Some(Literal::Double(f64::from(*v)))
        }
        #[allow(clippy::cast_precision_loss)]
        (Literal::Int64(v), PrimitiveKind::Double | PrimitiveKind::Single) => {
            Some(Literal::Double(*v as f64))
        }
        (Literal::Decimal(d), PrimitiveKind::Double | PrimitiveKind::Single) => {
            d.to_string().parse().ok().map(Literal::Double)
        }
        (_, PrimitiveKind::Decimal) => as_decimal(lit).map(Literal::Decimal),
        _ => None,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn integers_widen_by_size() {
        assert_eq!(
            common_numeric(PrimitiveKind::Int16, PrimitiveKind::Int64),
            Some(PrimitiveKind::Int64)
        );
        assert_eq!(
            common_numeric(PrimitiveKind::Int32, PrimitiveKind::Decimal),
            Some(PrimitiveKind::Decimal)
        );
    }

    #[test]
    fn floating_operand_wins() {
        assert_eq!(
            common_numeric(PrimitiveKind::Decimal, PrimitiveKind::Single),
            Some(PrimitiveKind::Double)
        );
        assert_eq!(
            common_numeric(PrimitiveKind::Single, PrimitiveKind::Single),
            Some(PrimitiveKind::Single)
        );
        assert_eq!(
            common_numeric(PrimitiveKind::Int32, PrimitiveKind::Double),
            Some(PrimitiveKind::Double)
        );
    }

    #[test]
    fn non_numeric_has_no_common_type() {
        assert_eq!(
            common_numeric(PrimitiveKind::String, PrimitiveKind::Int32),
            None
        );
    }

    #[test]
    fn widening_only_goes_up() {
        assert_eq!(widening_cost(PrimitiveKind::Int32, PrimitiveKind::Decimal), Some(2));
        assert_eq!(widening_cost(PrimitiveKind::Double, PrimitiveKind::Decimal), None);
        assert_eq!(widening_cost(PrimitiveKind::String, PrimitiveKind::String), Some(0));
    }

    #[test]
    fn integer_literal_becomes_decimal() {
        assert_eq!(
            convert_literal(&Literal::Int32(5), PrimitiveKind::Decimal),
            Some(Literal::Decimal(BigDecimal::from(5)))
        );
    }
}
