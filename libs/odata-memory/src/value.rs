//! Typed values seen while evaluating a plan against JSON instances.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::str::FromStr;

use bigdecimal::{BigDecimal, FromPrimitive};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta};
use odata_core::bind::EdmType;
use odata_core::schema::PrimitiveKind;
use odata_core::syntax::{Literal, parse_iso_duration};
use serde_json::Value as Json;
use uuid::Uuid;

/// Evaluation result. `Null` doubles as the unknown truth value.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(BigDecimal),
    String(String),
    Guid(Uuid),
    Date(NaiveDate),
    TimeOfDay(NaiveTime),
    DateTime(DateTime<FixedOffset>),
    Duration(TimeDelta),
    /// Member names for string-encoded values, the numeric value for
    /// number-encoded ones.
    Enum {
        members: BTreeSet<String>,
        value: Option<i64>,
    },
    /// Structured instance or collection, kept as JSON.
    Json(Json),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn from_literal(lit: &Literal) -> Scalar {
        match lit {
            Literal::Null => Scalar::Null,
            Literal::Boolean(b) => Scalar::Bool(*b),
            Literal::Int32(v) => Scalar::Number(BigDecimal::from(*v)),
            Literal::Int64(v) => Scalar::Number(BigDecimal::from(*v)),
            Literal::Decimal(v) => Scalar::Number(v.clone()),
            Literal::Double(v) => BigDecimal::from_f64(*v).map_or(Scalar::Null, Scalar::Number),
            Literal::String(s) => Scalar::String(s.clone()),
            Literal::Guid(u) => Scalar::Guid(*u),
            Literal::Date(d) => Scalar::Date(*d),
            Literal::TimeOfDay(t) => Scalar::TimeOfDay(*t),
            Literal::DateTimeOffset(dt) => Scalar::DateTime(*dt),
            Literal::Duration(d) => Scalar::Duration(*d),
            Literal::Enum { value, .. } => Scalar::Enum {
                members: split_members(value),
                value: None,
            },
        }
    }

    /// Reads `json` as a value of the bound type. Values that do not match
    /// the type read as null.
    pub fn from_json(json: &Json, ty: &EdmType) -> Scalar {
        match (json, ty) {
            (Json::Null, _) => Scalar::Null,
            (_, EdmType::Primitive(kind)) => primitive(json, *kind),
            (Json::String(s), EdmType::Enum(_)) => Scalar::Enum {
                members: split_members(s),
                value: None,
            },
            (Json::Number(n), EdmType::Enum(_)) => Scalar::Enum {
                members: BTreeSet::new(),
                value: n.as_i64(),
            },
            (_, EdmType::Enum(_)) => Scalar::Null,
            _ => Scalar::Json(json.clone()),
        }
    }

    /// Converts to `kind`, or null when the value has no such form.
    pub fn coerce(self, kind: PrimitiveKind) -> Scalar {
        match (self, kind) {
            (Scalar::Number(n), k) if k.is_numeric() => Scalar::Number(n),
            (Scalar::Number(n), PrimitiveKind::String) => Scalar::String(n.to_string()),
            (Scalar::Bool(b), PrimitiveKind::Boolean) => Scalar::Bool(b),
            (Scalar::Bool(b), PrimitiveKind::String) => Scalar::String(b.to_string()),
            (Scalar::String(s), k) => primitive(&Json::String(s), k),
            (Scalar::Guid(u), PrimitiveKind::Guid) => Scalar::Guid(u),
            (Scalar::Guid(u), PrimitiveKind::String) => Scalar::String(u.to_string()),
            (Scalar::Date(d), PrimitiveKind::Date) => Scalar::Date(d),
            (Scalar::Date(d), PrimitiveKind::String) => Scalar::String(d.to_string()),
            (Scalar::TimeOfDay(t), PrimitiveKind::TimeOfDay) => Scalar::TimeOfDay(t),
            (Scalar::DateTime(dt), PrimitiveKind::DateTimeOffset) => Scalar::DateTime(dt),
            (Scalar::DateTime(dt), PrimitiveKind::String) => Scalar::String(dt.to_rfc3339()),
            (Scalar::Duration(d), PrimitiveKind::Duration) => Scalar::Duration(d),
            (Scalar::Enum { members, .. }, PrimitiveKind::String) if !members.is_empty() => {
                Scalar::String(members.into_iter().collect::<Vec<_>>().join(","))
            }
            _ => Scalar::Null,
        }
    }

    /// Ordering of two non-null values of the same kind.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            (Scalar::Number(a), Scalar::Number(b)) => Some(a.cmp(b)),
            (Scalar::String(a), Scalar::String(b)) => Some(a.cmp(b)),
            (Scalar::Guid(a), Scalar::Guid(b)) => Some(a.cmp(b)),
            (Scalar::Date(a), Scalar::Date(b)) => Some(a.cmp(b)),
            (Scalar::TimeOfDay(a), Scalar::TimeOfDay(b)) => Some(a.cmp(b)),
            (Scalar::DateTime(a), Scalar::DateTime(b)) => Some(a.cmp(b)),
            (Scalar::Duration(a), Scalar::Duration(b)) => Some(a.cmp(b)),
            (
                Scalar::Enum { value: Some(a), .. },
                Scalar::Enum { value: Some(b), .. },
            ) => Some(a.cmp(b)),
            (
                Scalar::Enum { members: a, .. },
                Scalar::Enum { members: b, .. },
            ) if a == b => Some(Ordering::Equal),
            (Scalar::Json(a), Scalar::Json(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Sort order used by `$orderby`: null sorts before every value.
    pub fn sort_cmp(&self, other: &Scalar) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }
}

fn split_members(text: &str) -> BTreeSet<String> {
    text.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_owned)
        .collect()
}

fn primitive(json: &Json, kind: PrimitiveKind) -> Scalar {
    let parsed = match (json, kind) {
        (Json::Bool(b), PrimitiveKind::Boolean) => Some(Scalar::Bool(*b)),
        (Json::Number(n), k) if k.is_numeric() => {
            BigDecimal::from_str(&n.to_string()).ok().map(Scalar::Number)
        }
        (Json::String(s), k) if k.is_numeric() => BigDecimal::from_str(s).ok().map(Scalar::Number),
        (Json::String(s), PrimitiveKind::String) => Some(Scalar::String(s.clone())),
        (Json::String(s), PrimitiveKind::Boolean) => s.parse().ok().map(Scalar::Bool),
        (Json::String(s), PrimitiveKind::Guid) => Uuid::parse_str(s).ok().map(Scalar::Guid),
        (Json::String(s), PrimitiveKind::Date) => NaiveDate::from_str(s).ok().map(Scalar::Date),
        (Json::String(s), PrimitiveKind::TimeOfDay) => {
            NaiveTime::from_str(s).ok().map(Scalar::TimeOfDay)
        }
        (Json::String(s), PrimitiveKind::DateTimeOffset) => {
            DateTime::parse_from_rfc3339(s).ok().map(Scalar::DateTime)
        }
        (Json::String(s), PrimitiveKind::Duration) => parse_iso_duration(s).map(Scalar::Duration),
        _ => None,
    };
    parsed.unwrap_or(Scalar::Null)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_numbers_read_as_decimals() {
        let v = Scalar::from_json(&json!(10.1), &EdmType::Primitive(PrimitiveKind::Decimal));
        assert_eq!(v, Scalar::Number(BigDecimal::from_str("10.1").unwrap()));
    }

    #[test]
    fn mismatched_json_reads_as_null() {
        let v = Scalar::from_json(&json!("abc"), &EdmType::Primitive(PrimitiveKind::Int32));
        assert!(v.is_null());
    }

    #[test]
    fn datetimes_compare_across_offsets() {
        let ty = EdmType::Primitive(PrimitiveKind::DateTimeOffset);
        let utc = Scalar::from_json(&json!("2024-05-01T10:00:00Z"), &ty);
        let cet = Scalar::from_json(&json!("2024-05-01T12:00:00+02:00"), &ty);
        assert_eq!(utc.compare(&cet), Some(Ordering::Equal));
    }

    #[test]
    fn nulls_sort_first() {
        let one = Scalar::Number(BigDecimal::from(1));
        assert_eq!(Scalar::Null.sort_cmp(&one), Ordering::Less);
        assert_eq!(one.sort_cmp(&Scalar::Null), Ordering::Greater);
    }

    #[test]
    fn enum_members_compare_as_sets() {
        let a = Scalar::Enum {
            members: split_members("Write, Read"),
            value: None,
        };
        let b = Scalar::from_literal(&Literal::Enum {
            type_name: "NS.Access".to_owned(),
            value: "Read,Write".to_owned(),
        });
        assert_eq!(a.compare(&b), Some(Ordering::Equal));
    }
}
