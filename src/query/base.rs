use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::instrument;

use super::{
    DocumentResults, IndexQuery, IndexQueryOptions, QueryBuilder, QueryParameters, QueryResponse,
    QueryResultsWithStatistics, UNBOUNDED_PAGE_SIZE,
};
use crate::{
    Error, Result,
    commands::QueryCommand,
    context::SessionContext,
    conversion::{ConversionResult, DocumentShape, convert_to_document},
    metrics,
};

/// Receives the outcome of a terminal call. It sees exactly what the call
/// returns.
pub type QueryCallback<V> = Box<dyn FnOnce(std::result::Result<&V, &Error>) + Send>;

type QueriedListener = Box<dyn Fn() + Send + Sync>;
type FetchedListener<T> = Box<dyn Fn(&ConversionResult<T>) + Send + Sync>;
type IncludesListener = Box<dyn Fn(&[Value]) + Send + Sync>;

/// Observers notified while a query executes, in registration order.
pub struct QueryListeners<T> {
    documents_queried: Vec<QueriedListener>,
    document_fetched: Vec<FetchedListener<T>>,
    includes_fetched: Vec<IncludesListener>,
}

impl<T> Default for QueryListeners<T> {
    fn default() -> Self {
        Self {
            documents_queried: Vec::new(),
            document_fetched: Vec::new(),
            includes_fetched: Vec::new(),
        }
    }
}

impl<T> fmt::Debug for QueryListeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryListeners")
            .field("documents_queried", &self.documents_queried.len())
            .field("document_fetched", &self.document_fetched.len())
            .field("includes_fetched", &self.includes_fetched.len())
            .finish()
    }
}

impl<T> QueryListeners<T> {
    /// Called before every execution.
    pub fn on_documents_queried<F>(&mut self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.documents_queried.push(Box::new(listener));
    }

    /// Called once per converted document that is not a projection.
    pub fn on_document_fetched<F>(&mut self, listener: F)
    where
        F: Fn(&ConversionResult<T>) + Send + Sync + 'static,
    {
        self.document_fetched.push(Box::new(listener));
    }

    /// Called at most once per execution, with the raw include batch.
    pub fn on_includes_fetched<F>(&mut self, listener: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.includes_fetched.push(Box::new(listener));
    }

    fn emit_documents_queried(&self) {
        for listener in &self.documents_queried {
            listener();
        }
    }

    fn emit_document_fetched(&self, result: &ConversionResult<T>) {
        for listener in &self.document_fetched {
            listener(result);
        }
    }

    fn emit_includes_fetched(&self, includes: &[Value]) {
        for listener in &self.includes_fetched {
            listener(includes);
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct WaitOptions {
    enabled: bool,
    as_of_now: bool,
    cutoff_etag: Option<i64>,
    timeout: Option<Duration>,
}

/// The state every query surface shares: builder, parameter table, paging,
/// freshness options and the collaborators used at execution time.
pub struct QueryBase<T> {
    pub(crate) builder: QueryBuilder,
    pub(crate) parameters: QueryParameters,
    take: Option<u32>,
    skip: Option<u32>,
    with_statistics: bool,
    wait: WaitOptions,
    index_query_options: IndexQueryOptions,
    shape: DocumentShape,
    context: SessionContext,
    listeners: QueryListeners<T>,
}

impl<T> fmt::Debug for QueryBase<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBase")
            .field("builder", &self.builder)
            .field("parameters", &self.parameters)
            .field("take", &self.take)
            .field("skip", &self.skip)
            .field("with_statistics", &self.with_statistics)
            .field("shape", &self.shape)
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl<T> QueryBase<T> {
    pub(crate) fn new(
        context: SessionContext,
        builder: QueryBuilder,
        shape: DocumentShape,
        with_statistics: bool,
        index_query_options: IndexQueryOptions,
    ) -> Self {
        Self {
            builder,
            parameters: QueryParameters::new(),
            take: None,
            skip: None,
            with_statistics,
            wait: WaitOptions::default(),
            index_query_options,
            shape,
            context,
            listeners: QueryListeners::default(),
        }
    }

    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    pub fn parameters(&self) -> &QueryParameters {
        &self.parameters
    }

    pub fn shape(&self) -> &DocumentShape {
        &self.shape
    }

    pub fn take_count(&self) -> Option<u32> {
        self.take
    }

    pub fn skip_count(&self) -> Option<u32> {
        self.skip
    }

    pub fn is_statistics_enabled(&self) -> bool {
        self.with_statistics
    }

    pub fn listeners_mut(&mut self) -> &mut QueryListeners<T> {
        &mut self.listeners
    }

    pub fn take(&mut self, count: Option<u32>) -> &mut Self {
        self.take = count;
        self
    }

    pub fn skip(&mut self, count: Option<u32>) -> &mut Self {
        self.skip = count;
        self
    }

    pub fn statistics(&mut self, enabled: bool) -> &mut Self {
        self.with_statistics = enabled;
        self
    }

    /// `None` waits up to the conventions' default timeout.
    pub fn wait_for_non_stale_results(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.wait = WaitOptions {
            enabled: true,
            as_of_now: false,
            cutoff_etag: None,
            timeout: Some(self.resolve_timeout(timeout)),
        };
        self
    }

    /// Waits until the index has caught up with `cutoff_etag`.
    pub fn wait_for_non_stale_results_as_of(
        &mut self,
        cutoff_etag: i64,
        timeout: Option<Duration>,
    ) -> &mut Self {
        self.wait = WaitOptions {
            enabled: true,
            as_of_now: false,
            cutoff_etag: Some(cutoff_etag),
            timeout: Some(self.resolve_timeout(timeout)),
        };
        self
    }

    pub fn wait_for_non_stale_results_as_of_now(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.wait = WaitOptions {
            enabled: true,
            as_of_now: true,
            cutoff_etag: None,
            timeout: Some(self.resolve_timeout(timeout)),
        };
        self
    }

    fn resolve_timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or_else(|| self.context.conventions.default_wait_timeout())
    }

    /// Snapshot of what would be sent right now. Pure: the query stays
    /// usable afterwards.
    pub fn index_query(&self) -> Result<IndexQuery> {
        Ok(IndexQuery {
            query: self.builder.render()?,
            query_parameters: self.parameters.clone(),
            start: self.skip.unwrap_or(0),
            page_size: self.take.unwrap_or(UNBOUNDED_PAGE_SIZE),
            wait_for_non_stale_results: self.wait.enabled,
            wait_for_non_stale_results_as_of_now: self.wait.as_of_now,
            cutoff_etag: self.wait.cutoff_etag,
            wait_for_non_stale_results_timeout: self.wait.timeout,
            options: self.index_query_options,
        })
    }

    #[instrument(skip_all, fields(source = %self.builder.source().name(), database = %self.context.database))]
    pub(crate) async fn execute_query(&self) -> Result<QueryResponse> {
        self.listeners.emit_documents_queried();
        let query = self.index_query()?;
        let mut command =
            QueryCommand::for_query(&self.context.database, &query, &self.context.conventions)?;
        tracing::debug!(
            query = %query.query,
            parameters = query.query_parameters.len(),
            start = query.start,
            page_size = query.page_size,
            "issuing query"
        );

        let start = Instant::now();
        let outcome = self.context.executor.execute(&mut command).await;
        let elapsed = start.elapsed();
        metrics::record_query_executed(elapsed);
        let response = match outcome {
            Ok(response) => response.unwrap_or_default(),
            Err(err) => {
                metrics::record_query_failure();
                return Err(err);
            }
        };
        if elapsed > self.context.conventions.slow_query_threshold() {
            tracing::warn!(target: "tidequery::slow_query", elapsed_ms = elapsed.as_millis() as u64, query = %query.query, "slow document query");
        }

        if response.is_stale {
            metrics::record_stale_result();
            tracing::warn!(
                query = %query.query,
                timeout = ?query.wait_for_non_stale_results_timeout,
                "index is still stale"
            );
            return Err(Error::IndexStale {
                query: query.query,
                timeout: query.wait_for_non_stale_results_timeout,
            });
        }
        Ok(response)
    }
}

impl<T> QueryBase<T>
where
    T: DeserializeOwned,
{
    /// Converts the envelope's results, notifying listeners for each fetched
    /// document and once for the include batch.
    pub(crate) fn convert_response_to_documents(
        &self,
        response: QueryResponse,
    ) -> Result<DocumentResults<T>> {
        let converter = self.context.converter.as_ref();
        let raw_results = converter.try_fetch_results(&response);
        if raw_results.is_empty() {
            return Ok(self.shape_output(Vec::new(), response));
        }

        let converted = raw_results
            .iter()
            .map(|raw| convert_to_document::<T>(converter, raw, &self.shape))
            .collect::<Result<Vec<_>>>()?;

        let mut fetched = 0;
        for result in &converted {
            if !result.metadata.projection {
                self.listeners.emit_document_fetched(result);
                fetched += 1;
            }
        }
        metrics::record_documents_fetched(fetched);

        let includes = converter.try_fetch_includes(&response);
        if !includes.is_empty() {
            self.listeners.emit_includes_fetched(includes);
            metrics::record_includes_fetched(includes.len() as u64);
        }

        let documents = converted.into_iter().map(|result| result.document).collect();
        Ok(self.shape_output(documents, response))
    }

    fn shape_output(&self, results: Vec<T>, response: QueryResponse) -> DocumentResults<T> {
        if self.with_statistics {
            DocumentResults::WithStatistics(QueryResultsWithStatistics { results, response })
        } else {
            DocumentResults::Documents(results)
        }
    }

    /// Runs the query with the current paging.
    pub async fn all(&self) -> Result<DocumentResults<T>> {
        let response = self.execute_query().await?;
        self.convert_response_to_documents(response)
    }

    /// The only result. Fails when the query matches none or more than one.
    pub async fn single(&mut self) -> Result<T> {
        let guard = ScopedPaging::new(self, Some(2), Some(0), false);
        let mut results = guard.all().await?.into_results();
        if results.len() > 1 {
            return Err(Error::InvalidOperation(
                "expected a single result, but the query returned more than one".into(),
            ));
        }
        results.pop().ok_or_else(|| {
            Error::InvalidOperation("expected a single result, but the query returned none".into())
        })
    }

    pub async fn first(&mut self) -> Result<Option<T>> {
        let guard = ScopedPaging::new(self, Some(1), Some(0), false);
        Ok(guard.all().await?.into_results().into_iter().next())
    }

    /// Total number of matches; fetches no documents.
    pub async fn count(&mut self) -> Result<i64> {
        let statistics = self.with_statistics;
        let guard = ScopedPaging::new(self, Some(0), Some(0), statistics);
        let response = guard.execute_query().await?;
        Ok(response.total_results)
    }

    pub async fn all_with(
        &self,
        callback: QueryCallback<DocumentResults<T>>,
    ) -> Result<DocumentResults<T>> {
        let outcome = self.all().await;
        callback(outcome.as_ref());
        outcome
    }

    pub async fn single_with(&mut self, callback: QueryCallback<T>) -> Result<T> {
        let outcome = self.single().await;
        callback(outcome.as_ref());
        outcome
    }

    pub async fn first_with(&mut self, callback: QueryCallback<Option<T>>) -> Result<Option<T>> {
        let outcome = self.first().await;
        callback(outcome.as_ref());
        outcome
    }

    pub async fn count_with(&mut self, callback: QueryCallback<i64>) -> Result<i64> {
        let outcome = self.count().await;
        callback(outcome.as_ref());
        outcome
    }
}

/// Overrides paging for one terminal call and puts the caller's settings
/// back when dropped, whether the call finished, failed or was cancelled.
struct ScopedPaging<'a, T> {
    query: &'a mut QueryBase<T>,
    saved: (Option<u32>, Option<u32>, bool),
}

impl<'a, T> ScopedPaging<'a, T> {
    fn new(
        query: &'a mut QueryBase<T>,
        take: Option<u32>,
        skip: Option<u32>,
        statistics: bool,
    ) -> Self {
        let saved = (query.take, query.skip, query.with_statistics);
        query.take = take;
        query.skip = skip;
        query.with_statistics = statistics;
        Self { query, saved }
    }
}

impl<T> Deref for ScopedPaging<'_, T> {
    type Target = QueryBase<T>;

    fn deref(&self) -> &Self::Target {
        self.query
    }
}

impl<T> DerefMut for ScopedPaging<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.query
    }
}

impl<T> Drop for ScopedPaging<'_, T> {
    fn drop(&mut self) {
        let (take, skip, statistics) = self.saved;
        self.query.take = take;
        self.query.skip = skip;
        self.query.with_statistics = statistics;
    }
}

/// Paging, freshness and terminal calls shared by every query surface.
#[async_trait]
pub trait QueryExecution<T>: Send + Sync
where
    T: DeserializeOwned + Send + 'static,
{
    fn query_base(&self) -> &QueryBase<T>;
    fn query_base_mut(&mut self) -> &mut QueryBase<T>;

    /// `None` restores the unbounded default.
    fn take(&mut self, count: Option<u32>) -> &mut Self {
        self.query_base_mut().take(count);
        self
    }

    fn skip(&mut self, count: Option<u32>) -> &mut Self {
        self.query_base_mut().skip(count);
        self
    }

    fn statistics(&mut self, enabled: bool) -> &mut Self {
        self.query_base_mut().statistics(enabled);
        self
    }

    fn wait_for_non_stale_results(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.query_base_mut().wait_for_non_stale_results(timeout);
        self
    }

    fn wait_for_non_stale_results_as_of(
        &mut self,
        cutoff_etag: i64,
        timeout: Option<Duration>,
    ) -> &mut Self {
        self.query_base_mut()
            .wait_for_non_stale_results_as_of(cutoff_etag, timeout);
        self
    }

    fn wait_for_non_stale_results_as_of_now(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.query_base_mut()
            .wait_for_non_stale_results_as_of_now(timeout);
        self
    }

    fn on_documents_queried<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.query_base_mut()
            .listeners_mut()
            .on_documents_queried(listener);
        self
    }

    fn on_document_fetched<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&ConversionResult<T>) + Send + Sync + 'static,
    {
        self.query_base_mut()
            .listeners_mut()
            .on_document_fetched(listener);
        self
    }

    fn on_includes_fetched<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.query_base_mut()
            .listeners_mut()
            .on_includes_fetched(listener);
        self
    }

    fn index_query(&self) -> Result<IndexQuery> {
        self.query_base().index_query()
    }

    async fn all(&self) -> Result<DocumentResults<T>> {
        self.query_base().all().await
    }

    async fn single(&mut self) -> Result<T> {
        self.query_base_mut().single().await
    }

    async fn first(&mut self) -> Result<Option<T>> {
        self.query_base_mut().first().await
    }

    async fn count(&mut self) -> Result<i64> {
        self.query_base_mut().count().await
    }

    async fn all_with(
        &self,
        callback: QueryCallback<DocumentResults<T>>,
    ) -> Result<DocumentResults<T>> {
        self.query_base().all_with(callback).await
    }

    async fn single_with(&mut self, callback: QueryCallback<T>) -> Result<T> {
        self.query_base_mut().single_with(callback).await
    }

    async fn first_with(&mut self, callback: QueryCallback<Option<T>>) -> Result<Option<T>> {
        self.query_base_mut().first_with(callback).await
    }

    async fn count_with(&mut self, callback: QueryCallback<i64>) -> Result<i64> {
        self.query_base_mut().count_with(callback).await
    }
}
