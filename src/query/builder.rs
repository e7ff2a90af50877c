use std::fmt;

use serde_json::Value;

use super::tokens::{
    OrderingKind, OrderingToken, OrderingType, QueryOperator, SearchOperator, SelectToken,
    ShapeToken, SpatialCriteria, SpatialRelation, SpatialUnits, WhereElement, WhereOperator,
    WhereToken, check_distance_error_pct, escape_field, quote,
};
use crate::{Error, Result};

/// Where the query reads from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuerySource {
    Collection(String),
    Index(String),
}

impl QuerySource {
    pub const ALL_DOCUMENTS: &'static str = "@all_docs";

    pub fn all_documents() -> Self {
        QuerySource::Collection(Self::ALL_DOCUMENTS.to_string())
    }

    pub fn name(&self) -> &str {
        match self {
            QuerySource::Collection(name) | QuerySource::Index(name) => name,
        }
    }
}

/// Accumulates clause tokens and renders them into one query string.
///
/// The builder only ever receives field names, parameter names and
/// structural flags. Values are bound by the caller in a
/// [`QueryParameters`](super::parameters::QueryParameters) table and referenced
/// here by name.
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    source: QuerySource,
    id_property: String,
    raw_query: Option<String>,
    where_tokens: Vec<WhereElement>,
    order_by: Vec<OrderingToken>,
    group_by: Vec<String>,
    select: Vec<SelectToken>,
    includes: Vec<String>,
    default_operator: QueryOperator,
    negate: bool,
    depth: usize,
    distinct: bool,
    dynamic_map_reduce: bool,
}

impl QueryBuilder {
    pub fn new(source: QuerySource, id_property: impl Into<String>) -> Self {
        Self {
            source,
            id_property: id_property.into(),
            raw_query: None,
            where_tokens: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            select: Vec::new(),
            includes: Vec::new(),
            default_operator: QueryOperator::default(),
            negate: false,
            depth: 0,
            distinct: false,
            dynamic_map_reduce: false,
        }
    }

    pub fn source(&self) -> &QuerySource {
        &self.source
    }

    pub fn id_property(&self) -> &str {
        &self.id_property
    }

    pub fn is_dynamic_map_reduce(&self) -> bool {
        self.dynamic_map_reduce
    }

    pub fn subclause_depth(&self) -> usize {
        self.depth
    }

    pub fn is_raw(&self) -> bool {
        self.raw_query.is_some()
    }

    /// Projected field names, in the order they were selected.
    pub fn projection_fields(&self) -> Vec<&str> {
        self.select
            .iter()
            .filter_map(|token| match token {
                SelectToken::Field { field, alias } => Some(alias.as_deref().unwrap_or(field)),
                SelectToken::GroupByKey { field, alias } => alias.as_deref().or(field.as_deref()),
                SelectToken::GroupBySum { field, alias } => Some(alias.as_deref().unwrap_or(field)),
                SelectToken::GroupByCount { alias } => Some(alias.as_deref().unwrap_or("count")),
            })
            .collect()
    }

    pub fn from_collection(&mut self, name: impl Into<String>) -> &mut Self {
        self.source = QuerySource::Collection(name.into());
        self
    }

    pub fn from_index(&mut self, name: impl Into<String>) -> &mut Self {
        self.source = QuerySource::Index(name.into());
        self
    }

    pub fn raw_query(&mut self, text: impl Into<String>) -> &mut Self {
        self.raw_query = Some(text.into());
        self
    }

    pub fn select_fields(&mut self, fields: &[&str]) -> &mut Self {
        for field in fields {
            self.select.push(SelectToken::Field {
                field: field.to_string(),
                alias: None,
            });
        }
        self
    }

    pub fn select_field(&mut self, field: &str, alias: &str) -> &mut Self {
        self.select.push(SelectToken::Field {
            field: field.to_string(),
            alias: Some(alias.to_string()),
        });
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.distinct = true;
        self
    }

    pub fn include(&mut self, path: impl Into<String>) -> &mut Self {
        self.includes.push(path.into());
        self
    }

    pub fn using_default_operator(&mut self, operator: QueryOperator) -> Result<&mut Self> {
        if !self.where_tokens.is_empty() {
            return Err(Error::InvalidOperation(
                "default operator can only be set before any where clause is added".into(),
            ));
        }
        self.default_operator = operator;
        Ok(self)
    }

    pub fn and_also(&mut self) -> Result<&mut Self> {
        self.push_connector(WhereElement::And)
    }

    pub fn or_else(&mut self) -> Result<&mut Self> {
        self.push_connector(WhereElement::Or)
    }

    fn push_connector(&mut self, connector: WhereElement) -> Result<&mut Self> {
        let Some(last) = self.where_tokens.last() else {
            return Ok(self);
        };
        if last.is_operator() {
            return Err(Error::InvalidOperation(
                "cannot add a connector: previous token was already an operator".into(),
            ));
        }
        if matches!(last, WhereElement::OpenSubclause | WhereElement::Intersect) {
            return Err(Error::InvalidOperation(
                "cannot add a connector before the first clause of a group".into(),
            ));
        }
        self.where_tokens.push(connector);
        Ok(self)
    }

    pub fn open_subclause(&mut self) -> &mut Self {
        self.append_operator_if_needed();
        self.negate_if_needed();
        self.where_tokens.push(WhereElement::OpenSubclause);
        self.depth += 1;
        self
    }

    pub fn close_subclause(&mut self) -> Result<&mut Self> {
        if self.depth == 0 {
            return Err(Error::InvalidOperation(
                "close_subclause called without a matching open_subclause".into(),
            ));
        }
        self.depth -= 1;
        self.where_tokens.push(WhereElement::CloseSubclause);
        Ok(self)
    }

    pub fn negate_next(&mut self) -> &mut Self {
        self.negate = !self.negate;
        self
    }

    pub fn intersect(&mut self) -> Result<&mut Self> {
        if !matches!(
            self.where_tokens.last(),
            Some(WhereElement::Clause(_)) | Some(WhereElement::CloseSubclause)
        ) {
            return Err(Error::InvalidOperation(
                "intersect can only follow a where clause or a closed subclause".into(),
            ));
        }
        self.where_tokens.push(WhereElement::Intersect);
        Ok(self)
    }

    fn append_operator_if_needed(&mut self) {
        if matches!(
            self.where_tokens.last(),
            Some(WhereElement::Clause(_)) | Some(WhereElement::CloseSubclause)
        ) {
            self.where_tokens.push(match self.default_operator {
                QueryOperator::And => WhereElement::And,
                QueryOperator::Or => WhereElement::Or,
            });
        }
    }

    fn negate_if_needed(&mut self) {
        if !self.negate {
            return;
        }
        self.negate = false;
        if matches!(
            self.where_tokens.last(),
            None | Some(WhereElement::OpenSubclause) | Some(WhereElement::Intersect)
        ) {
            self.where_tokens
                .push(WhereElement::Clause(WhereToken::always_true()));
            self.where_tokens.push(WhereElement::And);
        }
        self.where_tokens.push(WhereElement::Not);
    }

    fn push_clause(&mut self, token: WhereToken) -> &mut Self {
        self.append_operator_if_needed();
        self.negate_if_needed();
        self.where_tokens.push(WhereElement::Clause(token));
        self
    }

    fn last_clause_mut(&mut self, modifier: &str) -> Result<&mut WhereToken> {
        match self.where_tokens.last_mut() {
            Some(WhereElement::Clause(token)) => Ok(token),
            _ => Err(Error::InvalidOperation(format!(
                "{modifier} must directly follow a where clause"
            ))),
        }
    }

    pub fn where_equals(&mut self, field: &str, param: &str, exact: bool) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::Equals {
                value: param.into(),
            },
            exact,
        ))
    }

    pub fn where_not_equals(&mut self, field: &str, param: &str, exact: bool) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::NotEquals {
                value: param.into(),
            },
            exact,
        ))
    }

    pub fn where_greater_than(&mut self, field: &str, param: &str, exact: bool) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::GreaterThan {
                value: param.into(),
            },
            exact,
        ))
    }

    pub fn where_greater_than_or_equal(
        &mut self,
        field: &str,
        param: &str,
        exact: bool,
    ) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::GreaterThanOrEqual {
                value: param.into(),
            },
            exact,
        ))
    }

    pub fn where_less_than(&mut self, field: &str, param: &str, exact: bool) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::LessThan {
                value: param.into(),
            },
            exact,
        ))
    }

    pub fn where_less_than_or_equal(&mut self, field: &str, param: &str, exact: bool) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::LessThanOrEqual {
                value: param.into(),
            },
            exact,
        ))
    }

    pub fn where_in(&mut self, field: &str, param: &str, exact: bool) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::In {
                values: param.into(),
            },
            exact,
        ))
    }

    pub fn where_all_in(&mut self, field: &str, param: &str, exact: bool) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::AllIn {
                values: param.into(),
            },
            exact,
        ))
    }

    pub fn where_starts_with(&mut self, field: &str, param: &str, exact: bool) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::StartsWith {
                value: param.into(),
            },
            exact,
        ))
    }

    pub fn where_ends_with(&mut self, field: &str, param: &str, exact: bool) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::EndsWith {
                value: param.into(),
            },
            exact,
        ))
    }

    pub fn where_between(
        &mut self,
        field: &str,
        from_param: &str,
        to_param: &str,
        exact: bool,
    ) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::Between {
                from: from_param.into(),
                to: to_param.into(),
            },
            exact,
        ))
    }

    pub fn where_exists(&mut self, field: &str) -> &mut Self {
        self.push_clause(WhereToken::new(field, WhereOperator::Exists, false))
    }

    pub fn where_true(&mut self) -> &mut Self {
        self.push_clause(WhereToken::always_true())
    }

    pub fn search(&mut self, field: &str, terms_param: &str, operator: SearchOperator) -> &mut Self {
        self.push_clause(WhereToken::new(
            field,
            WhereOperator::Search {
                terms: terms_param.into(),
                operator,
            },
            false,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn within_radius_of(
        &mut self,
        field: &str,
        radius_param: &str,
        latitude_param: &str,
        longitude_param: &str,
        units: Option<SpatialUnits>,
        distance_error_pct: Option<f64>,
    ) -> Result<&mut Self> {
        check_distance_error_pct(distance_error_pct)?;
        Ok(self.push_clause(WhereToken::new(
            field,
            WhereOperator::Spatial {
                shape: ShapeToken::Circle {
                    radius: radius_param.into(),
                    latitude: latitude_param.into(),
                    longitude: longitude_param.into(),
                    units,
                },
                relation: SpatialRelation::Within,
                distance_error_pct,
            },
            false,
        )))
    }

    pub fn spatial(
        &mut self,
        field: &str,
        shape_param: &str,
        relation: SpatialRelation,
        distance_error_pct: Option<f64>,
    ) -> Result<&mut Self> {
        check_distance_error_pct(distance_error_pct)?;
        Ok(self.push_clause(WhereToken::new(
            field,
            WhereOperator::Spatial {
                shape: ShapeToken::Wkt {
                    shape: shape_param.into(),
                },
                relation,
                distance_error_pct,
            },
            false,
        )))
    }

    /// Adds a spatial clause described by `criteria`. Every value the
    /// criteria needs is handed to `add_param`, which must bind it and return
    /// the parameter name. Invalid criteria fail before `add_param` is called.
    pub fn spatial_criteria(
        &mut self,
        field: &str,
        criteria: &SpatialCriteria,
        add_param: &mut dyn FnMut(Value) -> String,
    ) -> Result<&mut Self> {
        let operator = criteria.to_operator(add_param)?;
        Ok(self.push_clause(WhereToken::new(field, operator, false)))
    }

    pub fn boost(&mut self, boost: f64) -> Result<&mut Self> {
        if !boost.is_finite() || boost < 0.0 {
            return Err(Error::InvalidArgument(
                "boost factor must be a non-negative number".into(),
            ));
        }
        self.last_clause_mut("boost")?.boost = Some(boost);
        Ok(self)
    }

    pub fn fuzzy(&mut self, fuzzy: f64) -> Result<&mut Self> {
        if !(0.0..=1.0).contains(&fuzzy) {
            return Err(Error::InvalidArgument(
                "fuzzy distance must be between 0.0 and 1.0".into(),
            ));
        }
        let token = self.last_clause_mut("fuzzy")?;
        if !matches!(token.operator, WhereOperator::Equals { .. }) {
            return Err(Error::InvalidOperation(
                "fuzzy can only be used right after an equality clause".into(),
            ));
        }
        token.fuzzy = Some(fuzzy);
        Ok(self)
    }

    pub fn proximity(&mut self, proximity: u32) -> Result<&mut Self> {
        let token = self.last_clause_mut("proximity")?;
        if !matches!(token.operator, WhereOperator::Search { .. }) {
            return Err(Error::InvalidOperation(
                "proximity can only be used right after a search clause".into(),
            ));
        }
        token.proximity = Some(proximity);
        Ok(self)
    }

    fn push_ordering(&mut self, kind: OrderingKind, descending: bool) -> &mut Self {
        self.order_by.push(OrderingToken { kind, descending });
        self
    }

    pub fn order_by(&mut self, field: &str, ordering: OrderingType) -> &mut Self {
        self.push_ordering(
            OrderingKind::Field {
                field: field.into(),
                ordering,
            },
            false,
        )
    }

    pub fn order_by_descending(&mut self, field: &str, ordering: OrderingType) -> &mut Self {
        self.push_ordering(
            OrderingKind::Field {
                field: field.into(),
                ordering,
            },
            true,
        )
    }

    pub fn order_by_score(&mut self) -> &mut Self {
        self.push_ordering(OrderingKind::Score, false)
    }

    pub fn order_by_score_descending(&mut self) -> &mut Self {
        self.push_ordering(OrderingKind::Score, true)
    }

    pub fn order_by_distance(
        &mut self,
        field: &str,
        latitude_param: &str,
        longitude_param: &str,
    ) -> &mut Self {
        self.push_ordering(
            OrderingKind::Distance {
                field: field.into(),
                latitude: latitude_param.into(),
                longitude: longitude_param.into(),
            },
            false,
        )
    }

    pub fn order_by_distance_descending(
        &mut self,
        field: &str,
        latitude_param: &str,
        longitude_param: &str,
    ) -> &mut Self {
        self.push_ordering(
            OrderingKind::Distance {
                field: field.into(),
                latitude: latitude_param.into(),
                longitude: longitude_param.into(),
            },
            true,
        )
    }

    pub fn random_ordering(&mut self, seed_param: Option<&str>) -> &mut Self {
        self.push_ordering(
            OrderingKind::Random {
                seed: seed_param.map(Into::into),
            },
            false,
        )
    }

    pub fn custom_sort_using(&mut self, field: &str, sorter_param: &str, descending: bool) -> &mut Self {
        self.push_ordering(
            OrderingKind::Custom {
                field: field.into(),
                sorter: sorter_param.into(),
            },
            descending,
        )
    }

    pub fn group_by(&mut self, fields: &[&str]) -> &mut Self {
        self.group_by.extend(fields.iter().map(|field| field.to_string()));
        self.dynamic_map_reduce = true;
        self
    }

    pub fn group_by_key(&mut self, field: Option<&str>, alias: Option<&str>) -> &mut Self {
        self.select.push(SelectToken::GroupByKey {
            field: field.map(Into::into),
            alias: alias.map(Into::into),
        });
        self
    }

    pub fn group_by_sum(&mut self, field: &str, alias: Option<&str>) -> &mut Self {
        self.select.push(SelectToken::GroupBySum {
            field: field.into(),
            alias: alias.map(Into::into),
        });
        self
    }

    pub fn group_by_count(&mut self, alias: Option<&str>) -> &mut Self {
        self.select.push(SelectToken::GroupByCount {
            alias: alias.map(Into::into),
        });
        self
    }

    fn has_clause_tokens(&self) -> bool {
        !self.where_tokens.is_empty()
            || !self.order_by.is_empty()
            || !self.group_by.is_empty()
            || !self.select.is_empty()
            || !self.includes.is_empty()
            || self.distinct
    }

    fn validate(&self) -> Result<()> {
        if self.depth != 0 {
            return Err(Error::InvalidOperation(format!(
                "unbalanced subclauses: {} left open",
                self.depth
            )));
        }
        if self.negate || self.where_tokens.last().is_some_and(WhereElement::is_operator) {
            return Err(Error::InvalidOperation(
                "query ends with a dangling operator".into(),
            ));
        }
        if matches!(self.where_tokens.last(), Some(WhereElement::Intersect)) {
            return Err(Error::InvalidOperation(
                "intersect must be followed by another clause".into(),
            ));
        }
        Ok(())
    }

    /// Renders the accumulated tokens. Fails on malformed usage instead of
    /// producing a mis-rendered query.
    pub fn render(&self) -> Result<String> {
        if let Some(raw) = &self.raw_query {
            if self.has_clause_tokens() {
                return Err(Error::InvalidOperation(
                    "raw query text cannot be combined with clause methods".into(),
                ));
            }
            return Ok(raw.clone());
        }
        self.validate()?;

        let mut out = String::from("FROM ");
        match &self.source {
            QuerySource::Collection(name) => out.push_str(&escape_field(name)),
            QuerySource::Index(name) => {
                out.push_str("INDEX ");
                out.push_str(&quote(name));
            }
        }

        if !self.group_by.is_empty() {
            out.push_str(" GROUP BY ");
            let fields: Vec<String> = self.group_by.iter().map(|f| escape_field(f)).collect();
            out.push_str(&fields.join(", "));
        }

        if !self.where_tokens.is_empty() {
            out.push_str(" WHERE ");
            self.render_where(&mut out);
        }

        if !self.order_by.is_empty() {
            out.push_str(" ORDER BY ");
            let mut first = true;
            for token in &self.order_by {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                token.render(&mut out, &self.id_property);
            }
        }

        if self.distinct || !self.select.is_empty() {
            out.push_str(" SELECT ");
            if self.distinct {
                out.push_str("DISTINCT ");
            }
            if self.select.is_empty() {
                out.push('*');
            }
            let mut first = true;
            for token in &self.select {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                token.render(&mut out, &self.id_property);
            }
        }

        if !self.includes.is_empty() {
            out.push_str(" INCLUDE ");
            let paths: Vec<String> = self.includes.iter().map(|p| escape_field(p)).collect();
            out.push_str(&paths.join(", "));
        }

        Ok(out)
    }

    fn render_where(&self, out: &mut String) {
        let intersect = self
            .where_tokens
            .iter()
            .any(|token| matches!(token, WhereElement::Intersect));
        if intersect {
            out.push_str("intersect(");
        }

        let mut need_space = false;
        for token in &self.where_tokens {
            match token {
                WhereElement::OpenSubclause => {
                    if need_space {
                        out.push(' ');
                    }
                    out.push('(');
                    need_space = false;
                }
                WhereElement::CloseSubclause => {
                    out.push(')');
                    need_space = true;
                }
                WhereElement::Intersect => {
                    out.push(',');
                    need_space = true;
                }
                other => {
                    if need_space {
                        out.push(' ');
                    }
                    match other {
                        WhereElement::And => out.push_str("AND"),
                        WhereElement::Or => out.push_str("OR"),
                        WhereElement::Not => out.push_str("NOT"),
                        WhereElement::Clause(clause) => clause.render(out, &self.id_property),
                        _ => {}
                    }
                    need_space = true;
                }
            }
        }

        if intersect {
            out.push(')');
        }
    }
}

impl fmt::Display for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Ok(text) => f.write_str(&text),
            Err(err) => write!(f, "<invalid query: {err}>"),
        }
    }
}
