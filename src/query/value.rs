//! Normalization of caller-supplied filter values before they are bound as
//! query parameters.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::{Error, Result};

/// Bound in place of a missing upper endpoint of a range clause.
pub const OPEN_UPPER_BOUND: &str = "*";
/// Bound in place of a missing lower endpoint of a range clause.
pub const OPEN_LOWER_BOUND: &str = "NULL";

const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f0000";
const PARSE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A candidate value for a query condition.
///
/// Conversions exist for the primitive types, chrono dates, `Option`s,
/// vectors and `serde_json::Value`. Only null, booleans, numbers, strings and
/// dates can be bound; arrays are accepted by the set-style conditions, which
/// flatten them first.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    DateTime(DateTime<Utc>),
    NaiveDateTime(NaiveDateTime),
    Array(Vec<FilterValue>),
    Object(Map<String, Value>),
    /// A value with no JSON representation, e.g. a NaN float.
    Unsupported(String),
}

impl FilterValue {
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::from(serde_json::to_value(value)?))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FilterValue::Null)
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FilterValue::Null,
            Value::Bool(b) => FilterValue::Bool(b),
            Value::Number(n) => FilterValue::Number(n),
            Value::String(s) => FilterValue::String(s),
            Value::Array(items) => FilterValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => FilterValue::Object(map),
        }
    }
}

impl From<&Value> for FilterValue {
    fn from(value: &Value) -> Self {
        Self::from(value.clone())
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

macro_rules! integer_filter_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FilterValue {
                fn from(value: $ty) -> Self {
                    FilterValue::Number(Number::from(value))
                }
            }
        )*
    };
}

integer_filter_value!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        match Number::from_f64(value) {
            Some(n) => FilterValue::Number(n),
            None => FilterValue::Unsupported(format!("non-finite number {value}")),
        }
    }
}

impl From<f32> for FilterValue {
    fn from(value: f32) -> Self {
        Self::from(f64::from(value))
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<&String> for FilterValue {
    fn from(value: &String) -> Self {
        FilterValue::String(value.clone())
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::DateTime(value)
    }
}

impl From<NaiveDateTime> for FilterValue {
    fn from(value: NaiveDateTime) -> Self {
        FilterValue::NaiveDateTime(value)
    }
}

impl From<NaiveDate> for FilterValue {
    fn from(value: NaiveDate) -> Self {
        FilterValue::NaiveDateTime(value.and_time(NaiveTime::MIN))
    }
}

impl<T> From<Option<T>> for FilterValue
where
    T: Into<FilterValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FilterValue::Null)
    }
}

impl<T> From<Vec<T>> for FilterValue
where
    T: Into<FilterValue>,
{
    fn from(values: Vec<T>) -> Self {
        FilterValue::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T> From<&[T]> for FilterValue
where
    T: Clone + Into<FilterValue>,
{
    fn from(values: &[T]) -> Self {
        FilterValue::Array(values.iter().cloned().map(Into::into).collect())
    }
}

/// Renders a UTC timestamp in the server's canonical form, e.g.
/// `2024-03-01T10:15:00.1230000Z`.
pub fn canonical_utc(value: &DateTime<Utc>) -> String {
    format!("{}Z", value.format(CANONICAL_DATE_FORMAT))
}

/// Renders a timestamp without zone information in canonical form.
pub fn canonical_local(value: &NaiveDateTime) -> String {
    value.format(CANONICAL_DATE_FORMAT).to_string()
}

/// Parses a canonical date string. The flag reports whether it carried the
/// UTC designator.
pub(crate) fn parse_canonical(input: &str) -> Option<(NaiveDateTime, bool)> {
    let (body, utc) = match input.strip_suffix('Z') {
        Some(body) => (body, true),
        None => (input, false),
    };
    NaiveDateTime::parse_from_str(body, PARSE_DATE_FORMAT)
        .ok()
        .map(|parsed| (parsed, utc))
}

/// Validates a scalar value and converts it to its bound JSON form.
pub(crate) fn transform(value: FilterValue) -> Result<Value> {
    match value {
        FilterValue::Null => Ok(Value::Null),
        FilterValue::Bool(b) => Ok(Value::Bool(b)),
        FilterValue::Number(n) => Ok(Value::Number(n)),
        FilterValue::String(s) => Ok(Value::String(s)),
        FilterValue::DateTime(d) => Ok(Value::String(canonical_utc(&d))),
        FilterValue::NaiveDateTime(d) => Ok(Value::String(canonical_local(&d))),
        FilterValue::Array(_) | FilterValue::Object(_) | FilterValue::Unsupported(_) => {
            Err(Error::invalid_value())
        }
    }
}

/// Like [`transform`], binding `sentinel` when the value is null.
pub(crate) fn transform_or(value: FilterValue, sentinel: &str) -> Result<Value> {
    if value.is_null() {
        Ok(Value::String(sentinel.to_string()))
    } else {
        transform(value)
    }
}

/// Unpacks nested arrays at any depth into one flat list.
pub(crate) fn flatten<I>(values: I) -> Vec<FilterValue>
where
    I: IntoIterator<Item = FilterValue>,
{
    fn push_flat(out: &mut Vec<FilterValue>, value: FilterValue) {
        match value {
            FilterValue::Array(items) => {
                for item in items {
                    push_flat(out, item);
                }
            }
            other => out.push(other),
        }
    }

    let mut out = Vec::new();
    for value in values {
        push_flat(&mut out, value);
    }
    out
}

/// Flattens then transforms every element; fails without partial output.
pub(crate) fn transform_all<I>(values: I) -> Result<Vec<Value>>
where
    I: IntoIterator<Item = FilterValue>,
{
    flatten(values).into_iter().map(transform).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn primitives_pass_through() {
        assert_eq!(transform(FilterValue::from(true)).unwrap(), json!(true));
        assert_eq!(transform(FilterValue::from(42)).unwrap(), json!(42));
        assert_eq!(transform(FilterValue::from("")).unwrap(), json!(""));
        assert_eq!(transform(FilterValue::from(None::<i32>)).unwrap(), Value::Null);
    }

    #[test]
    fn dates_render_canonically() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(
            transform(FilterValue::from(date)).unwrap(),
            json!("2024-03-01T10:15:00.0000000Z")
        );

        let naive = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        assert_eq!(
            transform(FilterValue::from(naive)).unwrap(),
            json!("2020-01-02T00:00:00.0000000")
        );
    }

    #[test]
    fn canonical_dates_parse_back() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        let (parsed, utc) = parse_canonical(&canonical_utc(&date)).unwrap();
        assert!(utc);
        assert_eq!(parsed, date.naive_utc());
    }

    #[test]
    fn objects_and_arrays_are_rejected() {
        let err = transform(FilterValue::from(json!({"a": 1}))).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(transform(FilterValue::from(vec![1, 2])).is_err());
        assert!(transform(FilterValue::from(f64::NAN)).is_err());
    }

    #[test]
    fn flatten_unpacks_any_depth() {
        let nested = vec![
            FilterValue::from(vec![FilterValue::from(1), FilterValue::from(vec![2])]),
            FilterValue::from(3),
        ];
        assert_eq!(transform_all(nested).unwrap(), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn open_bounds_use_sentinels() {
        assert_eq!(
            transform_or(FilterValue::Null, OPEN_LOWER_BOUND).unwrap(),
            json!("NULL")
        );
        assert_eq!(transform_or(FilterValue::from(5), OPEN_UPPER_BOUND).unwrap(), json!(5));
    }
}
