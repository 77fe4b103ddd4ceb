use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Typed literal value as written in a query option.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Decimal(BigDecimal),
    Double(f64),
    String(String),
    Guid(Uuid),
    Date(NaiveDate),
    TimeOfDay(NaiveTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Duration(TimeDelta),
    /// `Namespace.EnumType'Member1,Member2'`
    Enum { type_name: String, value: String },
}

impl Literal {
    /// Short name of the literal's kind, for diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::Boolean(_) => "Edm.Boolean",
            Literal::Int32(_) => "Edm.Int32",
            Literal::Int64(_) => "Edm.Int64",
            Literal::Decimal(_) => "Edm.Decimal",
            Literal::Double(_) => "Edm.Double",
            Literal::String(_) => "Edm.String",
            Literal::Guid(_) => "Edm.Guid",
            Literal::Date(_) => "Edm.Date",
            Literal::TimeOfDay(_) => "Edm.TimeOfDay",
            Literal::DateTimeOffset(_) => "Edm.DateTimeOffset",
            Literal::Duration(_) => "Edm.Duration",
            Literal::Enum { .. } => "enum",
        }
    }

    /// Integer literal typed as `Edm.Int32` when it fits, `Edm.Int64` otherwise.
    pub(crate) fn integer(text: &str) -> Option<Literal> {
        let v = text.parse::<i64>().ok()?;
        Some(match i32::try_from(v) {
            Ok(small) => Literal::Int32(small),
            Err(_) => Literal::Int64(v),
        })
    }

    pub(crate) fn decimal(text: &str) -> Option<Literal> {
        BigDecimal::from_str(text).ok().map(Literal::Decimal)
    }

    pub(crate) fn double(text: &str) -> Option<Literal> {
        text.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Literal::Double)
    }

    /// Unquote a `'...'` literal, collapsing doubled quotes.
    pub(crate) fn string(text: &str) -> Option<Literal> {
        let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
        Some(Literal::String(inner.replace("''", "'")))
    }

    pub(crate) fn guid(text: &str) -> Option<Literal> {
        Uuid::parse_str(text).ok().map(Literal::Guid)
    }

    pub(crate) fn date(text: &str) -> Option<Literal> {
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .map(Literal::Date)
    }

    pub(crate) fn time_of_day(text: &str) -> Option<Literal> {
        ["%H:%M:%S%.f", "%H:%M"]
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(text, fmt).ok())
            .map(Literal::TimeOfDay)
    }

    pub(crate) fn date_time_offset(text: &str) -> Option<Literal> {
        let normalized = match text.strip_suffix('Z') {
            Some(t) => format!("{t}+00:00"),
            None => text.to_owned(),
        };
        DateTime::parse_from_rfc3339(&normalized)
            .or_else(|_| DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M%:z"))
            .ok()
            .map(Literal::DateTimeOffset)
    }

    /// `duration'P1DT2H'`
    pub(crate) fn duration(text: &str) -> Option<Literal> {
        let body = text
            .strip_prefix("duration'")
            .and_then(|t| t.strip_suffix('\''))?;
        parse_iso_duration(body).map(Literal::Duration)
    }

    /// `Namespace.Type'Value'`
    pub(crate) fn enumeration(text: &str) -> Option<Literal> {
        let quote = text.find('\'')?;
        let (type_name, rest) = text.split_at(quote);
        let value = rest.strip_prefix('\'')?.strip_suffix('\'')?;
        if value.is_empty() {
            return None;
        }
        Some(Literal::Enum {
            type_name: type_name.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// ISO 8601 day-time duration: `[-]PnDTnHnMn.nS`.
pub fn parse_iso_duration(text: &str) -> Option<TimeDelta> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, text),
    };
    let rest = rest.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    let mut total = TimeDelta::zero();
    if !date_part.is_empty() {
        let days = date_part.strip_suffix('D')?.parse::<i64>().ok()?;
        total = total.checked_add(&TimeDelta::try_days(days)?)?;
    }

    if let Some(time) = time_part {
        if time.is_empty() {
            return None;
        }
        let mut number = String::new();
        for ch in time.chars() {
            match ch {
                '0'..='9' | '.' => number.push(ch),
                'H' => {
                    total = total.checked_add(&TimeDelta::try_hours(number.parse().ok()?)?)?;
                    number.clear();
                }
                'M' => {
                    total = total.checked_add(&TimeDelta::try_minutes(number.parse().ok()?)?)?;
                    number.clear();
                }
                'S' => {
                    let secs = number.parse::<f64>().ok()?;
                    if !secs.is_finite() || secs < 0.0 {
                        return None;
                    }
                    let millis = (secs * 1000.0).round();
                    #[allow(clippy::cast_possible_truncation)]
                    let millis = millis as i64;
                    total = total.checked_add(&TimeDelta::try_milliseconds(millis)?)?;
                    number.clear();
                }
                _ => return None,
            }
        }
        if !number.is_empty() {
            return None;
        }
    } else if date_part.is_empty() {
        return None;
    }

    Some(if negative { -total } else { total })
}

fn format_iso_duration(d: TimeDelta, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (sign, d) = if d < TimeDelta::zero() {
        ("-", -d)
    } else {
        ("", d)
    };
    let days = d.num_days();
    let rem = d - TimeDelta::days(days);
    let hours = rem.num_hours();
    let rem = rem - TimeDelta::hours(hours);
    let minutes = rem.num_minutes();
    let rem = rem - TimeDelta::minutes(minutes);
    let seconds = rem.num_seconds();
    let millis = (rem - TimeDelta::seconds(seconds)).num_milliseconds();

    write!(f, "{sign}P{days}DT{hours}H{minutes}M")?;
    if millis == 0 {
        write!(f, "{seconds}S")
    } else {
        write!(f, "{seconds}.{millis:03}S")
    }
}

impl fmt::Display for Literal {
    /// Renders the literal in URL-literal form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Boolean(b) => write!(f, "{b}"),
            Literal::Int32(v) => write!(f, "{v}"),
            Literal::Int64(v) => write!(f, "{v}"),
            Literal::Decimal(v) => write!(f, "{v}"),
            Literal::Double(v) => write!(f, "{v:e}"),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Guid(u) => write!(f, "{u}"),
            Literal::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Literal::TimeOfDay(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Literal::DateTimeOffset(dt) => f.write_str(&dt.to_rfc3339()),
            Literal::Duration(d) => {
                f.write_str("duration'")?;
                format_iso_duration(*d, f)?;
                f.write_str("'")
            }
            Literal::Enum { type_name, value } => write!(f, "{type_name}'{value}'"),
        }
    }
}

impl Serialize for Literal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn integer_width_follows_value() {
        assert_eq!(Literal::integer("42"), Some(Literal::Int32(42)));
        assert_eq!(
            Literal::integer("4294967296"),
            Some(Literal::Int64(4_294_967_296))
        );
        assert_eq!(Literal::integer("99999999999999999999"), None);
        assert_eq!(
            Literal::integer("-9223372036854775808"),
            Some(Literal::Int64(i64::MIN))
        );
        assert_eq!(Literal::integer("-2147483648"), Some(Literal::Int32(i32::MIN)));
    }

    #[test]
    fn string_unescapes_doubled_quotes() {
        assert_eq!(
            Literal::string("'O''Neil'"),
            Some(Literal::String("O'Neil".to_owned()))
        );
        assert_eq!(Literal::String("O'Neil".to_owned()).to_string(), "'O''Neil'");
    }

    #[test]
    fn parses_day_time_durations() {
        let d = parse_iso_duration("P1DT2H30M").unwrap();
        assert_eq!(d.num_minutes(), 24 * 60 + 150);

        let neg = parse_iso_duration("-PT1.5S").unwrap();
        assert_eq!(neg.num_milliseconds(), -1500);

        assert!(parse_iso_duration("P").is_none());
        assert!(parse_iso_duration("PT").is_none());
        assert!(parse_iso_duration("P1Y").is_none());
    }

    #[test]
    fn duration_display_round_trips() {
        let lit = Literal::duration("duration'P2DT3H4M5S'").unwrap();
        assert_eq!(lit.to_string(), "duration'P2DT3H4M5S'");
    }

    #[test]
    fn date_time_offset_accepts_short_forms() {
        assert!(Literal::date_time_offset("2024-03-01T10:15:00Z").is_some());
        assert!(Literal::date_time_offset("2024-03-01T10:15:00.250+02:00").is_some());
        assert!(Literal::date_time_offset("2024-03-01T10:15Z").is_some());
        assert!(Literal::date_time_offset("2024-13-01T10:15:00Z").is_none());
    }

    #[test]
    fn enum_literal_splits_type_and_value() {
        assert_eq!(
            Literal::enumeration("Sales.Color'Red,Blue'"),
            Some(Literal::Enum {
                type_name: "Sales.Color".to_owned(),
                value: "Red,Blue".to_owned(),
            })
        );
        assert_eq!(Literal::enumeration("Sales.Color''"), None);
    }
}
