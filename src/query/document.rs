//! The typed, value-accepting query surface.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{
    QueryBase, QueryBuilder, QueryExecution, QueryOperator, QueryOptions, SearchOperator,
    SpatialCriteria, SpatialRelation, SpatialUnits, identity_for,
    tokens::{OrderingType, check_distance_error_pct},
    value::{FilterValue, OPEN_LOWER_BOUND, OPEN_UPPER_BOUND, transform, transform_all, transform_or},
};
use crate::{
    Result, commands::RequestExecutor, context::SessionContext, documents::DocumentSession,
};

/// A single-value condition.
#[derive(Clone, Debug, PartialEq)]
pub struct WhereParams {
    pub field_name: String,
    pub value: FilterValue,
    pub exact: bool,
}

impl WhereParams {
    pub fn new(field_name: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self {
            field_name: field_name.into(),
            value: value.into(),
            exact: false,
        }
    }

    /// Case-sensitive comparison.
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }
}

/// A range; a null bound is open.
#[derive(Clone, Debug, PartialEq)]
pub struct BetweenParams {
    pub field_name: String,
    pub from: FilterValue,
    pub to: FilterValue,
    pub exact: bool,
}

impl BetweenParams {
    pub fn new(
        field_name: impl Into<String>,
        from: impl Into<FilterValue>,
        to: impl Into<FilterValue>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            from: from.into(),
            to: to.into(),
            exact: false,
        }
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }
}

/// A set of candidate values. Nested arrays are flattened.
#[derive(Clone, Debug, PartialEq)]
pub struct InParams {
    pub field_name: String,
    pub values: Vec<FilterValue>,
    pub exact: bool,
}

impl InParams {
    pub fn new<I, V>(field_name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        Self {
            field_name: field_name.into(),
            values: values.into_iter().map(Into::into).collect(),
            exact: false,
        }
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchParams {
    pub field_name: String,
    pub terms: String,
    pub operator: SearchOperator,
}

impl SearchParams {
    pub fn new(field_name: impl Into<String>, terms: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            terms: terms.into(),
            operator: SearchOperator::default(),
        }
    }

    pub fn operator(mut self, operator: SearchOperator) -> Self {
        self.operator = operator;
        self
    }
}

/// A spatial predicate given either as a literal WKT shape or as criteria.
#[derive(Clone, Debug, PartialEq)]
pub enum SpatialArgument {
    Shape {
        shape_wkt: String,
        relation: SpatialRelation,
        distance_error_pct: Option<f64>,
    },
    Criteria(SpatialCriteria),
}

impl From<SpatialCriteria> for SpatialArgument {
    fn from(criteria: SpatialCriteria) -> Self {
        SpatialArgument::Criteria(criteria)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpatialParams {
    pub field_name: String,
    pub argument: SpatialArgument,
}

impl SpatialParams {
    pub fn new(field_name: impl Into<String>, argument: impl Into<SpatialArgument>) -> Self {
        Self {
            field_name: field_name.into(),
            argument: argument.into(),
        }
    }
}

type ValueClause = for<'a> fn(&'a mut QueryBuilder, &str, &str, bool) -> &'a mut QueryBuilder;

/// Typed query over documents deserialized as `T`.
///
/// Every literal handed to a filter method is validated and bound as a
/// parameter; the rendered text only ever references parameter names.
#[derive(Debug)]
pub struct DocumentQuery<T> {
    base: QueryBase<T>,
}

impl<T> DocumentQuery<T> {
    /// Creates a query bound to `session`'s conventions and notifications,
    /// executed through `executor`.
    pub fn create(
        session: &DocumentSession,
        executor: Arc<dyn RequestExecutor>,
        options: QueryOptions,
    ) -> Self {
        let context = session.context().clone().with_executor(executor);
        let mut query = Self::with_context(context, &options);
        session.register_listeners(query.base.listeners_mut());
        query
    }

    pub(crate) fn with_context(context: SessionContext, options: &QueryOptions) -> Self {
        let (source, shape) = options.resolve(&context.conventions);
        let id_property = identity_for(&context.conventions, &shape).to_string();
        let builder = QueryBuilder::new(source, id_property);
        Self {
            base: QueryBase::new(
                context,
                builder,
                shape,
                options.with_statistics,
                options.index_query_options,
            ),
        }
    }

    fn bind(&mut self, value: Value) -> String {
        self.base.parameters.add(value)
    }

    fn value_clause(&mut self, params: WhereParams, clause: ValueClause) -> Result<&mut Self> {
        let value = transform(params.value)?;
        let name = self.bind(value);
        clause(&mut self.base.builder, &params.field_name, &name, params.exact);
        Ok(self)
    }

    fn range_clause(
        &mut self,
        params: WhereParams,
        sentinel: &str,
        clause: ValueClause,
    ) -> Result<&mut Self> {
        let value = transform_or(params.value, sentinel)?;
        let name = self.bind(value);
        clause(&mut self.base.builder, &params.field_name, &name, params.exact);
        Ok(self)
    }

    fn set_clause(&mut self, params: InParams, clause: ValueClause) -> Result<&mut Self> {
        let values = transform_all(params.values)?;
        if values.is_empty() {
            return Ok(self);
        }
        let name = self.bind(Value::Array(values));
        clause(&mut self.base.builder, &params.field_name, &name, params.exact);
        Ok(self)
    }

    pub fn where_equals(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_equals_with(WhereParams::new(field, value))
    }

    pub fn where_equals_exact(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_equals_with(WhereParams::new(field, value).exact())
    }

    pub fn where_equals_with(&mut self, params: WhereParams) -> Result<&mut Self> {
        self.value_clause(params, QueryBuilder::where_equals)
    }

    pub fn where_not_equals(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_not_equals_with(WhereParams::new(field, value))
    }

    pub fn where_not_equals_exact(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_not_equals_with(WhereParams::new(field, value).exact())
    }

    pub fn where_not_equals_with(&mut self, params: WhereParams) -> Result<&mut Self> {
        self.value_clause(params, QueryBuilder::where_not_equals)
    }

    pub fn where_greater_than(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_greater_than_with(WhereParams::new(field, value))
    }

    pub fn where_greater_than_exact(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_greater_than_with(WhereParams::new(field, value).exact())
    }

    pub fn where_greater_than_with(&mut self, params: WhereParams) -> Result<&mut Self> {
        self.range_clause(params, OPEN_LOWER_BOUND, QueryBuilder::where_greater_than)
    }

    pub fn where_greater_than_or_equal(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_greater_than_or_equal_with(WhereParams::new(field, value))
    }

    pub fn where_greater_than_or_equal_exact(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_greater_than_or_equal_with(WhereParams::new(field, value).exact())
    }

    pub fn where_greater_than_or_equal_with(&mut self, params: WhereParams) -> Result<&mut Self> {
        self.range_clause(
            params,
            OPEN_LOWER_BOUND,
            QueryBuilder::where_greater_than_or_equal,
        )
    }

    pub fn where_less_than(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_less_than_with(WhereParams::new(field, value))
    }

    pub fn where_less_than_exact(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_less_than_with(WhereParams::new(field, value).exact())
    }

    pub fn where_less_than_with(&mut self, params: WhereParams) -> Result<&mut Self> {
        self.range_clause(params, OPEN_UPPER_BOUND, QueryBuilder::where_less_than)
    }

    pub fn where_less_than_or_equal(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_less_than_or_equal_with(WhereParams::new(field, value))
    }

    pub fn where_less_than_or_equal_exact(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_less_than_or_equal_with(WhereParams::new(field, value).exact())
    }

    pub fn where_less_than_or_equal_with(&mut self, params: WhereParams) -> Result<&mut Self> {
        self.range_clause(
            params,
            OPEN_UPPER_BOUND,
            QueryBuilder::where_less_than_or_equal,
        )
    }

    pub fn where_starts_with(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_starts_with_with(WhereParams::new(field, value))
    }

    pub fn where_starts_with_exact(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_starts_with_with(WhereParams::new(field, value).exact())
    }

    pub fn where_starts_with_with(&mut self, params: WhereParams) -> Result<&mut Self> {
        self.value_clause(params, QueryBuilder::where_starts_with)
    }

    pub fn where_ends_with(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_ends_with_with(WhereParams::new(field, value))
    }

    pub fn where_ends_with_exact(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_ends_with_with(WhereParams::new(field, value).exact())
    }

    pub fn where_ends_with_with(&mut self, params: WhereParams) -> Result<&mut Self> {
        self.value_clause(params, QueryBuilder::where_ends_with)
    }

    /// `field BETWEEN from AND to`. A null `from` binds `NULL`, a null `to`
    /// binds `*`.
    pub fn where_between(
        &mut self,
        field: &str,
        from: impl Into<FilterValue>,
        to: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_between_with(BetweenParams::new(field, from, to))
    }

    pub fn where_between_exact(
        &mut self,
        field: &str,
        from: impl Into<FilterValue>,
        to: impl Into<FilterValue>,
    ) -> Result<&mut Self> {
        self.where_between_with(BetweenParams::new(field, from, to).exact())
    }

    pub fn where_between_with(&mut self, params: BetweenParams) -> Result<&mut Self> {
        let from = transform_or(params.from, OPEN_LOWER_BOUND)?;
        let to = transform_or(params.to, OPEN_UPPER_BOUND)?;
        let from = self.bind(from);
        let to = self.bind(to);
        self.base
            .builder
            .where_between(&params.field_name, &from, &to, params.exact);
        Ok(self)
    }

    pub fn where_in<I, V>(&mut self, field: &str, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.where_in_with(InParams::new(field, values))
    }

    pub fn where_in_exact<I, V>(&mut self, field: &str, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.where_in_with(InParams::new(field, values).exact())
    }

    pub fn where_in_with(&mut self, params: InParams) -> Result<&mut Self> {
        self.set_clause(params, QueryBuilder::where_in)
    }

    /// Matches when the field holds any of `values`.
    pub fn contains_any<I, V>(&mut self, field: &str, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.contains_any_with(InParams::new(field, values))
    }

    pub fn contains_any_exact<I, V>(&mut self, field: &str, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.contains_any_with(InParams::new(field, values).exact())
    }

    pub fn contains_any_with(&mut self, params: InParams) -> Result<&mut Self> {
        self.set_clause(params, QueryBuilder::where_in)
    }

    /// Matches when the field holds every one of `values`.
    pub fn contains_all<I, V>(&mut self, field: &str, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.contains_all_with(InParams::new(field, values))
    }

    pub fn contains_all_exact<I, V>(&mut self, field: &str, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.contains_all_with(InParams::new(field, values).exact())
    }

    pub fn contains_all_with(&mut self, params: InParams) -> Result<&mut Self> {
        self.set_clause(params, QueryBuilder::where_all_in)
    }

    pub fn where_exists(&mut self, field: &str) -> &mut Self {
        self.base.builder.where_exists(field);
        self
    }

    pub fn where_true(&mut self) -> &mut Self {
        self.base.builder.where_true();
        self
    }

    /// Full-text search, matching any of the terms.
    pub fn search(&mut self, field: &str, terms: &str) -> &mut Self {
        self.search_with(SearchParams::new(field, terms))
    }

    pub fn search_with_operator(
        &mut self,
        field: &str,
        terms: &str,
        operator: SearchOperator,
    ) -> &mut Self {
        self.search_with(SearchParams::new(field, terms).operator(operator))
    }

    pub fn search_with(&mut self, params: SearchParams) -> &mut Self {
        let name = self.bind(Value::String(params.terms));
        self.base
            .builder
            .search(&params.field_name, &name, params.operator);
        self
    }

    /// Coordinates must be finite; a failure binds nothing.
    pub fn within_radius_of(
        &mut self,
        field: &str,
        radius: f64,
        latitude: f64,
        longitude: f64,
        units: Option<SpatialUnits>,
        distance_error_pct: Option<f64>,
    ) -> Result<&mut Self> {
        check_distance_error_pct(distance_error_pct)?;
        let radius = transform(FilterValue::from(radius))?;
        let latitude = transform(FilterValue::from(latitude))?;
        let longitude = transform(FilterValue::from(longitude))?;
        let radius = self.bind(radius);
        let latitude = self.bind(latitude);
        let longitude = self.bind(longitude);
        self.base.builder.within_radius_of(
            field,
            &radius,
            &latitude,
            &longitude,
            units,
            distance_error_pct,
        )?;
        Ok(self)
    }

    pub fn spatial(
        &mut self,
        field: &str,
        argument: impl Into<SpatialArgument>,
    ) -> Result<&mut Self> {
        self.spatial_with(SpatialParams::new(field, argument))
    }

    pub fn spatial_with(&mut self, params: SpatialParams) -> Result<&mut Self> {
        match params.argument {
            SpatialArgument::Shape {
                shape_wkt,
                relation,
                distance_error_pct,
            } => {
                check_distance_error_pct(distance_error_pct)?;
                let shape = self.bind(Value::String(shape_wkt));
                self.base
                    .builder
                    .spatial(&params.field_name, &shape, relation, distance_error_pct)?;
            }
            SpatialArgument::Criteria(criteria) => {
                let QueryBase {
                    builder,
                    parameters,
                    ..
                } = &mut self.base;
                builder.spatial_criteria(&params.field_name, &criteria, &mut |value| {
                    parameters.add(value)
                })?;
            }
        }
        Ok(self)
    }

    pub fn order_by(&mut self, field: &str) -> &mut Self {
        self.order_by_type(field, OrderingType::default())
    }

    /// Orders with an explicit comparison hint, e.g. numeric.
    pub fn order_by_type(&mut self, field: &str, ordering: OrderingType) -> &mut Self {
        self.base.builder.order_by(field, ordering);
        self
    }

    pub fn order_by_descending(&mut self, field: &str) -> &mut Self {
        self.order_by_descending_type(field, OrderingType::default())
    }

    pub fn order_by_descending_type(&mut self, field: &str, ordering: OrderingType) -> &mut Self {
        self.base.builder.order_by_descending(field, ordering);
        self
    }

    pub fn order_by_score(&mut self) -> &mut Self {
        self.base.builder.order_by_score();
        self
    }

    pub fn order_by_score_descending(&mut self) -> &mut Self {
        self.base.builder.order_by_score_descending();
        self
    }

    pub fn order_by_distance(
        &mut self,
        field: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<&mut Self> {
        let (latitude, longitude) = self.bind_point(latitude, longitude)?;
        self.base
            .builder
            .order_by_distance(field, &latitude, &longitude);
        Ok(self)
    }

    pub fn order_by_distance_descending(
        &mut self,
        field: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<&mut Self> {
        let (latitude, longitude) = self.bind_point(latitude, longitude)?;
        self.base
            .builder
            .order_by_distance_descending(field, &latitude, &longitude);
        Ok(self)
    }

    fn bind_point(&mut self, latitude: f64, longitude: f64) -> Result<(String, String)> {
        let latitude = transform(FilterValue::from(latitude))?;
        let longitude = transform(FilterValue::from(longitude))?;
        Ok((self.bind(latitude), self.bind(longitude)))
    }

    pub fn random_ordering(&mut self) -> &mut Self {
        self.base.builder.random_ordering(None);
        self
    }

    /// Random order that repeats for the same seed.
    pub fn random_ordering_with_seed(&mut self, seed: &str) -> &mut Self {
        let seed = self.bind(Value::String(seed.to_string()));
        self.base.builder.random_ordering(Some(&seed));
        self
    }

    /// Orders by a server-side sorter registered under `sorter`.
    pub fn custom_sort_using(&mut self, field: &str, sorter: &str, descending: bool) -> &mut Self {
        let sorter = self.bind(Value::String(sorter.to_string()));
        self.base
            .builder
            .custom_sort_using(field, &sorter, descending);
        self
    }

    pub fn include(&mut self, path: &str) -> &mut Self {
        self.base.builder.include(path);
        self
    }

    pub fn select_fields(&mut self, fields: &[&str]) -> &mut Self {
        self.base.builder.select_fields(fields);
        self
    }

    pub fn select_field(&mut self, field: &str, alias: &str) -> &mut Self {
        self.base.builder.select_field(field, alias);
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.base.builder.distinct();
        self
    }

    pub fn using_default_operator(&mut self, operator: QueryOperator) -> Result<&mut Self> {
        self.base.builder.using_default_operator(operator)?;
        Ok(self)
    }

    pub fn and_also(&mut self) -> Result<&mut Self> {
        self.base.builder.and_also()?;
        Ok(self)
    }

    pub fn or_else(&mut self) -> Result<&mut Self> {
        self.base.builder.or_else()?;
        Ok(self)
    }

    pub fn open_subclause(&mut self) -> &mut Self {
        self.base.builder.open_subclause();
        self
    }

    pub fn close_subclause(&mut self) -> Result<&mut Self> {
        self.base.builder.close_subclause()?;
        Ok(self)
    }

    /// Negates the next clause. Calling it twice cancels out.
    pub fn not(&mut self) -> &mut Self {
        self.base.builder.negate_next();
        self
    }

    pub fn intersect(&mut self) -> Result<&mut Self> {
        self.base.builder.intersect()?;
        Ok(self)
    }

    pub fn boost(&mut self, boost: f64) -> Result<&mut Self> {
        self.base.builder.boost(boost)?;
        Ok(self)
    }

    pub fn fuzzy(&mut self, fuzzy: f64) -> Result<&mut Self> {
        self.base.builder.fuzzy(fuzzy)?;
        Ok(self)
    }

    pub fn proximity(&mut self, proximity: u32) -> Result<&mut Self> {
        self.base.builder.proximity(proximity)?;
        Ok(self)
    }

    pub fn group_by(&mut self, fields: &[&str]) -> &mut Self {
        self.base.builder.group_by(fields);
        self
    }

    pub fn group_by_key(&mut self, field: Option<&str>, alias: Option<&str>) -> &mut Self {
        self.base.builder.group_by_key(field, alias);
        self
    }

    pub fn group_by_sum(&mut self, field: &str, alias: Option<&str>) -> &mut Self {
        self.base.builder.group_by_sum(field, alias);
        self
    }

    pub fn group_by_count(&mut self, alias: Option<&str>) -> &mut Self {
        self.base.builder.group_by_count(alias);
        self
    }
}

impl<T> QueryExecution<T> for DocumentQuery<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn query_base(&self) -> &QueryBase<T> {
        &self.base
    }

    fn query_base_mut(&mut self) -> &mut QueryBase<T> {
        &mut self.base
    }
}
