//! Fluent query construction, execution and result shaping.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::conventions::DocumentConventions;
use crate::conversion::{DocumentShape, NestedTypes};

pub mod base;
pub mod builder;
pub mod document;
pub mod parameters;
pub mod raw;
pub mod tokens;
pub mod value;

pub use base::{QueryBase, QueryCallback, QueryExecution, QueryListeners};
pub use builder::{QueryBuilder, QuerySource};
pub use document::{
    BetweenParams, DocumentQuery, InParams, SearchParams, SpatialArgument, SpatialParams,
    WhereParams,
};
pub use parameters::QueryParameters;
pub use raw::RawDocumentQuery;
pub use tokens::{
    OrderingType, QueryOperator, SearchOperator, SpatialCriteria, SpatialRelation, SpatialUnits,
};
pub use value::FilterValue;

/// Page size sent when the caller did not limit the query.
pub const UNBOUNDED_PAGE_SIZE: u32 = i32::MAX as u32;

/// Server-side switches that travel with a query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IndexQueryOptions {
    pub skip_duplicate_checking: bool,
    pub disable_caching: bool,
    pub show_timings: bool,
    pub explain_scores: bool,
}

/// The immutable descriptor submitted to the server: query text, bound
/// parameters, paging and freshness options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexQuery {
    pub query: String,
    #[serde(default)]
    pub query_parameters: QueryParameters,
    #[serde(default)]
    pub start: u32,
    #[serde(default = "unbounded_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub wait_for_non_stale_results: bool,
    #[serde(default)]
    pub wait_for_non_stale_results_as_of_now: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutoff_etag: Option<i64>,
    #[serde(default, with = "timespan", skip_serializing_if = "Option::is_none")]
    pub wait_for_non_stale_results_timeout: Option<Duration>,
    #[serde(flatten)]
    pub options: IndexQueryOptions,
}

fn unbounded_page_size() -> u32 {
    UNBOUNDED_PAGE_SIZE
}

impl IndexQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            query_parameters: QueryParameters::new(),
            start: 0,
            page_size: UNBOUNDED_PAGE_SIZE,
            wait_for_non_stale_results: false,
            wait_for_non_stale_results_as_of_now: false,
            cutoff_etag: None,
            wait_for_non_stale_results_timeout: None,
            options: IndexQueryOptions::default(),
        }
    }
}

/// `hh:mm:ss[.fffffff]` durations, the form the server uses for timeouts.
mod timespan {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_str(&format(*duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(text) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        parse(&text)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid timespan `{text}`")))
    }

    pub(super) fn format(duration: Duration) -> String {
        let secs = duration.as_secs();
        let ticks = duration.subsec_nanos() / 100;
        let base = format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60);
        if ticks == 0 {
            base
        } else {
            format!("{base}.{ticks:07}")
        }
    }

    pub(super) fn parse(text: &str) -> Option<Duration> {
        let mut parts = text.split(':');
        let hours: u64 = parts.next()?.parse().ok()?;
        let minutes: u64 = parts.next()?.parse().ok()?;
        let seconds = parts.next()?;
        if parts.next().is_some() || minutes >= 60 {
            return None;
        }
        let (whole, fraction) = seconds.split_once('.').unwrap_or((seconds, ""));
        let whole: u64 = whole.parse().ok()?;
        if whole >= 60 || fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let nanos = if fraction.is_empty() {
            0
        } else {
            format!("{fraction:0<9}").parse::<u32>().ok()?
        };
        Some(Duration::new(hours * 3600 + minutes * 60 + whole, nanos))
    }
}

/// The envelope a query execution returns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct QueryResponse {
    pub results: Vec<Value>,
    #[serde(deserialize_with = "includes_from_any")]
    pub includes: Vec<Value>,
    pub total_results: i64,
    pub is_stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_results: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_in_ms: Option<i64>,
}

/// Includes arrive either as a list or keyed by document id.
fn includes_from_any<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(by_id) => by_id.into_iter().map(|(_, doc)| doc).collect(),
        other => vec![other],
    })
}

/// Options handed to the query factory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    pub collection: Option<String>,
    pub index_name: Option<String>,
    pub document_type: Option<String>,
    pub nested_types: NestedTypes,
    pub with_statistics: bool,
    pub index_query_options: IndexQueryOptions,
}

impl QueryOptions {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn index(name: impl Into<String>) -> Self {
        Self {
            index_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn document_type(mut self, name: impl Into<String>) -> Self {
        self.document_type = Some(name.into());
        self
    }

    pub fn nested_type(mut self, path: impl Into<String>, ty: impl Into<String>) -> Self {
        self.nested_types.insert(path.into(), ty.into());
        self
    }

    pub fn with_statistics(mut self) -> Self {
        self.with_statistics = true;
        self
    }

    pub fn index_query_options(mut self, options: IndexQueryOptions) -> Self {
        self.index_query_options = options;
        self
    }

    /// Picks the query source and the conversion shape. An index wins over a
    /// collection; without either the collection is derived from the
    /// document type, and without that the query spans all documents.
    pub(crate) fn resolve(&self, conventions: &DocumentConventions) -> (QuerySource, DocumentShape) {
        let source = if let Some(index) = &self.index_name {
            QuerySource::Index(index.clone())
        } else if let Some(collection) = &self.collection {
            QuerySource::Collection(collection.clone())
        } else if let Some(ty) = &self.document_type {
            QuerySource::Collection(conventions.collection_name(ty))
        } else {
            QuerySource::all_documents()
        };
        let document_type = self.document_type.clone().or_else(|| {
            self.collection
                .as_deref()
                .map(|collection| conventions.document_type(collection))
        });
        (
            source,
            DocumentShape::new(document_type, self.nested_types.clone()),
        )
    }
}

/// Converted results together with the envelope they came from.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResultsWithStatistics<T> {
    pub results: Vec<T>,
    pub response: QueryResponse,
}

/// What `all` returns: plain results, or results plus the envelope when
/// statistics were requested.
#[derive(Clone, Debug, PartialEq)]
pub enum DocumentResults<T> {
    Documents(Vec<T>),
    WithStatistics(QueryResultsWithStatistics<T>),
}

impl<T> DocumentResults<T> {
    pub fn results(&self) -> &[T] {
        match self {
            DocumentResults::Documents(results) => results,
            DocumentResults::WithStatistics(with_stats) => &with_stats.results,
        }
    }

    pub fn into_results(self) -> Vec<T> {
        match self {
            DocumentResults::Documents(results) => results,
            DocumentResults::WithStatistics(with_stats) => with_stats.results,
        }
    }

    pub fn response(&self) -> Option<&QueryResponse> {
        match self {
            DocumentResults::Documents(_) => None,
            DocumentResults::WithStatistics(with_stats) => Some(&with_stats.response),
        }
    }

    pub fn len(&self) -> usize {
        self.results().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results().is_empty()
    }
}

/// Per-type identity overrides keyed by the resolved document type.
pub(crate) fn identity_for<'a>(
    conventions: &'a DocumentConventions,
    shape: &DocumentShape,
) -> &'a str {
    conventions.id_property_name(shape.document_type.as_deref())
}
