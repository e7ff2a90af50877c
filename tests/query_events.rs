use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::Result;
use serde_json::{Value, json};
use tidequery::{
    Store,
    metrics::metrics,
    query::{QueryExecution, QueryOptions, QueryResponse},
    testing::StubExecutor,
};

fn store(executor: &StubExecutor) -> Result<Store> {
    Ok(Store::builder("db").executor(executor.clone()).build()?)
}

#[tokio::test]
async fn projections_do_not_count_as_fetched_documents() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(QueryResponse {
        results: vec![
            json!({"Name": "Ann", "@metadata": {"@id": "users/1"}}),
            json!({"Name": "Bob", "@metadata": {"@projection": true}}),
            json!({"Name": "Cy", "@metadata": {"@id": "users/3"}}),
        ],
        total_results: 3,
        ..QueryResponse::default()
    });
    let session = store(&executor)?.session();

    let fetched = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fetched);
    let mut query = session.query::<Value>(QueryOptions::collection("Users"));
    query.on_document_fetched(move |result| {
        sink.lock().unwrap().push(result.metadata.id.clone());
    });

    let results = query.all().await?;
    assert_eq!(results.len(), 3);
    assert_eq!(
        *fetched.lock().unwrap(),
        vec![Some("users/1".to_string()), Some("users/3".to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn includes_are_announced_once_per_execution() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(QueryResponse {
        results: vec![json!({"Name": "Ann", "Company": "companies/1", "@metadata": {"@id": "users/1"}})],
        includes: vec![
            json!({"Name": "Acme", "@metadata": {"@id": "companies/1"}}),
            json!({"Name": "Initech", "@metadata": {"@id": "companies/2"}}),
        ],
        total_results: 1,
        ..QueryResponse::default()
    });
    let session = store(&executor)?.session();

    let batches = Arc::new(AtomicUsize::new(0));
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let (counter, sink) = (Arc::clone(&batches), Arc::clone(&sizes));
    let mut query = session.query::<Value>(QueryOptions::collection("Users"));
    query.include("Company").on_includes_fetched(move |includes| {
        counter.fetch_add(1, Ordering::SeqCst);
        sink.lock().unwrap().push(includes.len());
    });

    query.all().await?;
    assert_eq!(batches.load(Ordering::SeqCst), 1);
    assert_eq!(*sizes.lock().unwrap(), vec![2]);
    assert_eq!(
        executor.last_query().map(|q| q.query),
        Some("FROM Users INCLUDE Company".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn empty_results_emit_nothing_but_the_query_notice() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(QueryResponse {
        includes: vec![json!({"@metadata": {"@id": "companies/1"}})],
        ..QueryResponse::default()
    });
    let session = store(&executor)?.session();

    let queried = Arc::new(AtomicUsize::new(0));
    let other = Arc::new(AtomicUsize::new(0));
    let (q, f, i) = (Arc::clone(&queried), Arc::clone(&other), Arc::clone(&other));
    let mut query = session.query::<Value>(QueryOptions::collection("Users"));
    query
        .on_documents_queried(move || {
            q.fetch_add(1, Ordering::SeqCst);
        })
        .on_document_fetched(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .on_includes_fetched(move |_| {
            i.fetch_add(1, Ordering::SeqCst);
        });

    assert!(query.all().await?.is_empty());
    assert_eq!(queried.load(Ordering::SeqCst), 1);
    assert_eq!(other.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn metrics_count_fetched_documents() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(QueryResponse {
        results: vec![json!({"@metadata": {"@id": "users/1"}})],
        ..QueryResponse::default()
    });
    let session = store(&executor)?.session();
    let before = metrics().documents_fetched_total.load(Ordering::Relaxed);

    session
        .query::<Value>(QueryOptions::collection("Users"))
        .all()
        .await?;
    assert!(metrics().documents_fetched_total.load(Ordering::Relaxed) > before);
    Ok(())
}

#[tokio::test]
async fn failed_submissions_still_count_as_executed() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_failure(tidequery::Error::InvalidOperation("connection reset".into()));
    let session = store(&executor)?.session();
    let executed = metrics().queries_executed_total.load(Ordering::Relaxed);
    let failed = metrics().query_failures_total.load(Ordering::Relaxed);

    let outcome = session
        .query::<Value>(QueryOptions::collection("Users"))
        .all()
        .await;
    assert!(outcome.is_err());
    assert!(metrics().queries_executed_total.load(Ordering::Relaxed) > executed);
    assert!(metrics().query_failures_total.load(Ordering::Relaxed) > failed);
    Ok(())
}
