use std::fmt::Write as _;

use serde_json::Value;

use super::value::{FilterValue, transform};
use crate::{Error, Result};

/// Connector inserted between two where clauses when none is given explicitly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueryOperator {
    #[default]
    And,
    Or,
}

/// How the terms of a full-text search combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchOperator {
    #[default]
    Or,
    And,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderingType {
    #[default]
    String,
    Long,
    Double,
    AlphaNumeric,
}

impl OrderingType {
    fn suffix(self) -> Option<&'static str> {
        match self {
            OrderingType::String => None,
            OrderingType::Long => Some("long"),
            OrderingType::Double => Some("double"),
            OrderingType::AlphaNumeric => Some("alphaNumeric"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpatialRelation {
    #[default]
    Within,
    Contains,
    Disjoint,
    Intersects,
}

impl SpatialRelation {
    fn as_str(self) -> &'static str {
        match self {
            SpatialRelation::Within => "within",
            SpatialRelation::Contains => "contains",
            SpatialRelation::Disjoint => "disjoint",
            SpatialRelation::Intersects => "intersects",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpatialUnits {
    #[default]
    Kilometers,
    Miles,
}

impl SpatialUnits {
    fn as_str(self) -> &'static str {
        match self {
            SpatialUnits::Kilometers => "Kilometers",
            SpatialUnits::Miles => "Miles",
        }
    }
}

/// A spatial predicate described as data. Its numeric and shape values are
/// registered as parameters through the callback handed to
/// [`QueryBuilder::spatial_criteria`](super::builder::QueryBuilder::spatial_criteria).
#[derive(Clone, Debug, PartialEq)]
pub enum SpatialCriteria {
    Circle {
        radius: f64,
        latitude: f64,
        longitude: f64,
        units: Option<SpatialUnits>,
        relation: SpatialRelation,
        distance_error_pct: Option<f64>,
    },
    Wkt {
        shape: String,
        relation: SpatialRelation,
        distance_error_pct: Option<f64>,
    },
}

impl SpatialCriteria {
    pub fn within_radius(radius: f64, latitude: f64, longitude: f64) -> Self {
        SpatialCriteria::Circle {
            radius,
            latitude,
            longitude,
            units: None,
            relation: SpatialRelation::Within,
            distance_error_pct: None,
        }
    }

    pub fn relates_to_shape(shape: impl Into<String>, relation: SpatialRelation) -> Self {
        SpatialCriteria::Wkt {
            shape: shape.into(),
            relation,
            distance_error_pct: None,
        }
    }

    pub fn with_units(mut self, units: SpatialUnits) -> Self {
        if let SpatialCriteria::Circle { units: slot, .. } = &mut self {
            *slot = Some(units);
        }
        self
    }

    pub fn with_distance_error_pct(mut self, pct: f64) -> Self {
        match &mut self {
            SpatialCriteria::Circle {
                distance_error_pct, ..
            }
            | SpatialCriteria::Wkt {
                distance_error_pct, ..
            } => *distance_error_pct = Some(pct),
        }
        self
    }

    /// Validates every value up front, so a failure binds nothing.
    pub(crate) fn to_operator(
        &self,
        add_param: &mut dyn FnMut(Value) -> String,
    ) -> Result<WhereOperator> {
        match self {
            SpatialCriteria::Circle {
                radius,
                latitude,
                longitude,
                units,
                relation,
                distance_error_pct,
            } => {
                check_distance_error_pct(*distance_error_pct)?;
                let radius = transform(FilterValue::from(*radius))?;
                let latitude = transform(FilterValue::from(*latitude))?;
                let longitude = transform(FilterValue::from(*longitude))?;
                Ok(WhereOperator::Spatial {
                    shape: ShapeToken::Circle {
                        radius: add_param(radius),
                        latitude: add_param(latitude),
                        longitude: add_param(longitude),
                        units: *units,
                    },
                    relation: *relation,
                    distance_error_pct: *distance_error_pct,
                })
            }
            SpatialCriteria::Wkt {
                shape,
                relation,
                distance_error_pct,
            } => {
                check_distance_error_pct(*distance_error_pct)?;
                Ok(WhereOperator::Spatial {
                    shape: ShapeToken::Wkt {
                        shape: add_param(Value::from(shape.clone())),
                    },
                    relation: *relation,
                    distance_error_pct: *distance_error_pct,
                })
            }
        }
    }
}

/// The error percentage is rendered into the query text, so it must be a
/// plain non-negative number.
pub(crate) fn check_distance_error_pct(pct: Option<f64>) -> Result<()> {
    match pct {
        Some(pct) if !pct.is_finite() || pct < 0.0 => Err(Error::InvalidArgument(
            "distance error percentage must be a non-negative number".into(),
        )),
        _ => Ok(()),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ShapeToken {
    Circle {
        radius: String,
        latitude: String,
        longitude: String,
        units: Option<SpatialUnits>,
    },
    Wkt {
        shape: String,
    },
}

impl ShapeToken {
    fn render(&self, out: &mut String) {
        match self {
            ShapeToken::Circle {
                radius,
                latitude,
                longitude,
                units,
            } => {
                let _ = write!(out, "spatial.circle(${radius}, ${latitude}, ${longitude}");
                if let Some(units) = units {
                    let _ = write!(out, ", '{}'", units.as_str());
                }
                out.push(')');
            }
            ShapeToken::Wkt { shape } => {
                let _ = write!(out, "spatial.wkt(${shape})");
            }
        }
    }
}

/// Operator and parameter names of one where clause. Every `String` here is
/// a parameter name, never a value.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum WhereOperator {
    Equals { value: String },
    NotEquals { value: String },
    GreaterThan { value: String },
    GreaterThanOrEqual { value: String },
    LessThan { value: String },
    LessThanOrEqual { value: String },
    In { values: String },
    AllIn { values: String },
    StartsWith { value: String },
    EndsWith { value: String },
    Between { from: String, to: String },
    Exists,
    True,
    Search {
        terms: String,
        operator: SearchOperator,
    },
    Spatial {
        shape: ShapeToken,
        relation: SpatialRelation,
        distance_error_pct: Option<f64>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WhereToken {
    pub(crate) field: String,
    pub(crate) operator: WhereOperator,
    pub(crate) exact: bool,
    pub(crate) boost: Option<f64>,
    pub(crate) fuzzy: Option<f64>,
    pub(crate) proximity: Option<u32>,
}

impl WhereToken {
    pub(crate) fn new(field: impl Into<String>, operator: WhereOperator, exact: bool) -> Self {
        Self {
            field: field.into(),
            operator,
            exact,
            boost: None,
            fuzzy: None,
            proximity: None,
        }
    }

    pub(crate) fn always_true() -> Self {
        Self::new(String::new(), WhereOperator::True, false)
    }

    fn supports_exact(&self) -> bool {
        !matches!(
            self.operator,
            WhereOperator::Exists
                | WhereOperator::True
                | WhereOperator::Search { .. }
                | WhereOperator::Spatial { .. }
        )
    }

    pub(crate) fn render(&self, out: &mut String, id_property: &str) {
        let field = field_expr(&self.field, id_property);
        let mut body = String::new();
        match &self.operator {
            WhereOperator::Equals { value } => {
                let _ = write!(body, "{field} = ${value}");
            }
            WhereOperator::NotEquals { value } => {
                let _ = write!(body, "{field} != ${value}");
            }
            WhereOperator::GreaterThan { value } => {
                let _ = write!(body, "{field} > ${value}");
            }
            WhereOperator::GreaterThanOrEqual { value } => {
                let _ = write!(body, "{field} >= ${value}");
            }
            WhereOperator::LessThan { value } => {
                let _ = write!(body, "{field} < ${value}");
            }
            WhereOperator::LessThanOrEqual { value } => {
                let _ = write!(body, "{field} <= ${value}");
            }
            WhereOperator::In { values } => {
                let _ = write!(body, "{field} IN (${values})");
            }
            WhereOperator::AllIn { values } => {
                let _ = write!(body, "{field} ALL IN (${values})");
            }
            WhereOperator::StartsWith { value } => {
                let _ = write!(body, "startsWith({field}, ${value})");
            }
            WhereOperator::EndsWith { value } => {
                let _ = write!(body, "endsWith({field}, ${value})");
            }
            WhereOperator::Between { from, to } => {
                let _ = write!(body, "{field} BETWEEN ${from} AND ${to}");
            }
            WhereOperator::Exists => {
                let _ = write!(body, "exists({field})");
            }
            WhereOperator::True => body.push_str("true"),
            WhereOperator::Search { terms, operator } => {
                let _ = write!(body, "search({field}, ${terms}");
                if *operator == SearchOperator::And {
                    body.push_str(", and");
                }
                body.push(')');
            }
            WhereOperator::Spatial {
                shape,
                relation,
                distance_error_pct,
            } => {
                let _ = write!(body, "spatial.{}({field}, ", relation.as_str());
                shape.render(&mut body);
                if let Some(pct) = distance_error_pct {
                    let _ = write!(body, ", {pct}");
                }
                body.push(')');
            }
        }

        if self.exact && self.supports_exact() {
            body = format!("exact({body})");
        }
        if let Some(fuzzy) = self.fuzzy {
            body = format!("fuzzy({body}, {fuzzy})");
        }
        if let Some(proximity) = self.proximity {
            body = format!("proximity({body}, {proximity})");
        }
        if let Some(boost) = self.boost {
            body = format!("boost({body}, {boost})");
        }
        out.push_str(&body);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum WhereElement {
    Clause(WhereToken),
    And,
    Or,
    Not,
    OpenSubclause,
    CloseSubclause,
    Intersect,
}

impl WhereElement {
    pub(crate) fn is_operator(&self) -> bool {
        matches!(self, WhereElement::And | WhereElement::Or | WhereElement::Not)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum OrderingKind {
    Field {
        field: String,
        ordering: OrderingType,
    },
    Score,
    Random {
        seed: Option<String>,
    },
    Custom {
        field: String,
        sorter: String,
    },
    Distance {
        field: String,
        latitude: String,
        longitude: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct OrderingToken {
    pub(crate) kind: OrderingKind,
    pub(crate) descending: bool,
}

impl OrderingToken {
    pub(crate) fn render(&self, out: &mut String, id_property: &str) {
        match &self.kind {
            OrderingKind::Field { field, ordering } => {
                out.push_str(&field_expr(field, id_property));
                if let Some(suffix) = ordering.suffix() {
                    let _ = write!(out, " AS {suffix}");
                }
            }
            OrderingKind::Score => out.push_str("score()"),
            OrderingKind::Random { seed } => match seed {
                Some(seed) => {
                    let _ = write!(out, "random(${seed})");
                }
                None => out.push_str("random()"),
            },
            OrderingKind::Custom { field, sorter } => {
                let _ = write!(out, "custom({}, ${sorter})", field_expr(field, id_property));
            }
            OrderingKind::Distance {
                field,
                latitude,
                longitude,
            } => {
                let _ = write!(
                    out,
                    "spatial.distance({}, spatial.point(${latitude}, ${longitude}))",
                    field_expr(field, id_property)
                );
            }
        }
        if self.descending {
            out.push_str(" DESC");
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SelectToken {
    Field {
        field: String,
        alias: Option<String>,
    },
    GroupByKey {
        field: Option<String>,
        alias: Option<String>,
    },
    GroupBySum {
        field: String,
        alias: Option<String>,
    },
    GroupByCount {
        alias: Option<String>,
    },
}

impl SelectToken {
    pub(crate) fn render(&self, out: &mut String, id_property: &str) {
        let alias = match self {
            SelectToken::Field { field, alias } => {
                out.push_str(&field_expr(field, id_property));
                alias.as_deref().filter(|alias| *alias != field.as_str())
            }
            SelectToken::GroupByKey { field, alias } => {
                match field {
                    Some(field) => out.push_str(&escape_field(field)),
                    None => out.push_str("key()"),
                }
                alias.as_deref().filter(|alias| Some(*alias) != field.as_deref())
            }
            SelectToken::GroupBySum { field, alias } => {
                let _ = write!(out, "sum({})", escape_field(field));
                alias.as_deref()
            }
            SelectToken::GroupByCount { alias } => {
                out.push_str("count()");
                alias.as_deref()
            }
        };
        if let Some(alias) = alias {
            let _ = write!(out, " AS {}", escape_field(alias));
        }
    }
}

fn field_expr(field: &str, id_property: &str) -> String {
    if field == id_property {
        "id()".to_string()
    } else {
        escape_field(field)
    }
}

/// Leaves plain paths (`Name`, `Address.City`, `Lines[].Product`,
/// `@metadata`) untouched and quotes anything else.
pub(crate) fn escape_field(field: &str) -> String {
    let mut chars = field.chars();
    let plain = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '@' => field
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '@' | '[' | ']')),
        _ => false,
    };
    if plain { field.to_string() } else { quote(field) }
}

pub(crate) fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields_are_untouched() {
        assert_eq!(escape_field("Name"), "Name");
        assert_eq!(escape_field("Lines[].Product"), "Lines[].Product");
        assert_eq!(escape_field("@metadata.@collection"), "@metadata.@collection");
    }

    #[test]
    fn odd_fields_are_quoted() {
        assert_eq!(escape_field("First Name"), "'First Name'");
        assert_eq!(escape_field("x' OR '1'='1"), "'x\\' OR \\'1\\'=\\'1'");
        assert_eq!(escape_field(""), "''");
        assert_eq!(escape_field("1abc"), "'1abc'");
    }

    #[test]
    fn modifiers_wrap_the_clause() {
        let mut token = WhereToken::new(
            "Name",
            WhereOperator::Equals {
                value: "p0".into(),
            },
            true,
        );
        token.boost = Some(10.0);
        let mut out = String::new();
        token.render(&mut out, "id");
        assert_eq!(out, "boost(exact(Name = $p0), 10)");
    }

    #[test]
    fn identity_field_renders_as_id_function() {
        let token = WhereToken::new("id", WhereOperator::Equals { value: "p0".into() }, false);
        let mut out = String::new();
        token.render(&mut out, "id");
        assert_eq!(out, "id() = $p0");
    }
}
