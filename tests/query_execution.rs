use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};
use tidequery::{
    Error, Store,
    commands::RawResponse,
    query::{DocumentResults, QueryExecution, QueryOptions, QueryResponse},
    testing::StubExecutor,
};

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: String,
    name: String,
}

fn user(id: &str, name: &str) -> Value {
    json!({"name": name, "@metadata": {"@id": id, "@collection": "Users"}})
}

fn envelope(results: Vec<Value>, total: i64) -> QueryResponse {
    QueryResponse {
        results,
        total_results: total,
        ..QueryResponse::default()
    }
}

fn store(executor: &StubExecutor) -> Result<Store> {
    Ok(Store::builder("db").executor(executor.clone()).build()?)
}

#[tokio::test]
async fn single_returns_the_only_result_and_restores_paging() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(envelope(vec![user("users/1", "Ann")], 1));
    let session = store(&executor)?.session();

    let mut query = session.query::<User>(QueryOptions::collection("Users"));
    query.take(Some(10)).skip(Some(5)).statistics(true);
    let found = query.single().await?;
    assert_eq!(
        found,
        User {
            id: "users/1".into(),
            name: "Ann".into()
        }
    );

    let sent = executor.last_query().expect("query submitted");
    assert_eq!(sent.page_size, 2);
    assert_eq!(sent.start, 0);

    let base = query.query_base();
    assert_eq!(base.take_count(), Some(10));
    assert_eq!(base.skip_count(), Some(5));
    assert!(base.is_statistics_enabled());
    Ok(())
}

#[tokio::test]
async fn single_rejects_zero_and_many_results() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(envelope(vec![], 0));
    executor.push_results(envelope(
        vec![user("users/1", "Ann"), user("users/2", "Bob")],
        2,
    ));
    let session = store(&executor)?.session();
    let mut query = session.query::<User>(QueryOptions::collection("Users"));
    query.take(Some(7));

    match query.single().await {
        Err(Error::InvalidOperation(message)) => assert!(message.contains("none")),
        other => panic!("unexpected outcome {other:?}"),
    }
    match query.single().await {
        Err(Error::InvalidOperation(message)) => assert!(message.contains("more than one")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(query.query_base().take_count(), Some(7));
    Ok(())
}

#[tokio::test]
async fn first_returns_none_for_empty_results() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(envelope(vec![], 0));
    executor.push_results(envelope(vec![user("users/3", "Cy")], 4));
    let session = store(&executor)?.session();
    let mut query = session.query::<User>(QueryOptions::collection("Users"));

    assert_eq!(query.first().await?, None);
    let first = query.first().await?.expect("a result");
    assert_eq!(first.id, "users/3");
    assert!(executor.submitted_queries().iter().all(|q| q.page_size == 1));
    assert_eq!(query.query_base().take_count(), None);
    Ok(())
}

#[tokio::test]
async fn count_sends_zero_page_size_and_reads_total() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(envelope(vec![], 42));
    let session = store(&executor)?.session();
    let mut query = session.query::<User>(QueryOptions::collection("Users"));
    query.where_equals("name", "Ann")?.skip(Some(3));

    assert_eq!(query.count().await?, 42);
    let sent = executor.last_query().expect("query submitted");
    assert_eq!(sent.page_size, 0);
    assert_eq!(sent.start, 0);
    assert_eq!(query.query_base().skip_count(), Some(3));
    Ok(())
}

#[tokio::test]
async fn all_with_statistics_returns_the_envelope() -> Result<()> {
    let executor = StubExecutor::new();
    let mut response = envelope(vec![user("users/1", "Ann"), user("users/2", "Bob")], 2);
    response.index_name = Some("Auto/Users".into());
    executor.push_results(response);
    let session = store(&executor)?.session();

    let query = session.query::<User>(QueryOptions::collection("Users").with_statistics());
    match query.all().await? {
        DocumentResults::WithStatistics(with_stats) => {
            assert_eq!(with_stats.results.len(), with_stats.response.results.len());
            assert_eq!(with_stats.response.total_results, 2);
            assert_eq!(with_stats.response.index_name.as_deref(), Some("Auto/Users"));
        }
        other => panic!("expected statistics, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn stale_results_fail() -> Result<()> {
    let executor = StubExecutor::new();
    let mut response = envelope(vec![user("users/1", "Ann")], 1);
    response.is_stale = true;
    executor.push_results(response);
    let session = store(&executor)?.session();
    let mut query = session.query::<User>(QueryOptions::collection("Users"));
    query.wait_for_non_stale_results(None);

    match query.all().await {
        Err(Error::IndexStale { query, timeout }) => {
            assert_eq!(query, "FROM Users");
            assert!(timeout.is_some());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn missing_body_is_an_empty_envelope() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_no_content();
    let session = store(&executor)?.session();
    let mut query = session.query::<User>(QueryOptions::collection("Users"));

    assert!(query.all().await?.is_empty());
    // Nothing left in the script: the stub answers without a body again.
    assert_eq!(query.count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn server_errors_surface_through_the_mapper() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_response(RawResponse::with_status(
        503,
        Some(json!({"Error": "database is offline"})),
    ));
    let session = store(&executor)?.session();
    let query = session.query::<User>(QueryOptions::collection("Users"));

    match query.all().await {
        Err(Error::Server { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "database is offline");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn callbacks_see_the_returned_outcome() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(envelope(vec![], 9));
    executor.push_results(envelope(vec![], 0));
    let session = store(&executor)?.session();
    let mut query = session.query::<User>(QueryOptions::collection("Users"));

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let count = query
        .count_with(Box::new(move |outcome: std::result::Result<&i64, &Error>| {
            *sink.lock().unwrap() = outcome.ok().copied();
        }))
        .await?;
    assert_eq!(*seen.lock().unwrap(), Some(count));

    let failed = Arc::new(Mutex::new(false));
    let sink = Arc::clone(&failed);
    let outcome = query
        .single_with(Box::new(move |outcome: std::result::Result<&User, &Error>| {
            *sink.lock().unwrap() = outcome.is_err();
        }))
        .await;
    assert!(outcome.is_err());
    assert!(*failed.lock().unwrap());
    Ok(())
}

#[tokio::test]
async fn queries_are_reusable() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(envelope(vec![user("users/1", "Ann")], 1));
    executor.push_results(envelope(vec![user("users/1", "Ann")], 1));
    let session = store(&executor)?.session();
    let mut query = session.query::<User>(QueryOptions::collection("Users"));
    query.where_equals("name", "Ann")?;

    query.all().await?;
    query.all().await?;
    let sent = executor.submitted_queries();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
    Ok(())
}

#[tokio::test]
async fn executor_failures_restore_paging_and_statistics() -> Result<()> {
    let executor = StubExecutor::new();
    for _ in 0..3 {
        executor.push_failure(Error::InvalidOperation("node unreachable".into()));
    }
    let session = store(&executor)?.session();
    let mut query = session.query::<User>(QueryOptions::collection("Users"));
    query.take(Some(9)).skip(Some(4)).statistics(true);

    assert!(matches!(query.single().await, Err(Error::InvalidOperation(_))));
    assert!(matches!(query.first().await, Err(Error::InvalidOperation(_))));
    assert!(matches!(query.count().await, Err(Error::InvalidOperation(_))));
    assert_eq!(executor.remaining(), 0);

    let sent = executor.submitted_queries();
    assert_eq!(
        sent.iter().map(|q| q.page_size).collect::<Vec<_>>(),
        vec![2, 1, 0]
    );

    let base = query.query_base();
    assert_eq!(base.take_count(), Some(9));
    assert_eq!(base.skip_count(), Some(4));
    assert!(base.is_statistics_enabled());
    assert_eq!(query.index_query()?.page_size, 9);
    assert_eq!(query.index_query()?.start, 4);
    Ok(())
}

#[tokio::test]
async fn callbacks_and_results_share_an_executor_failure() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_failure(Error::InvalidOperation("first attempt failed".into()));
    executor.push_failure(Error::InvalidOperation("second attempt failed".into()));
    let session = store(&executor)?.session();
    let mut query = session.query::<User>(QueryOptions::collection("Users"));
    query.take(Some(3));

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let outcome = query
        .first_with(Box::new(
            move |outcome: std::result::Result<&Option<User>, &Error>| {
                *sink.lock().unwrap() = outcome.err().map(ToString::to_string);
            },
        ))
        .await;
    let returned = outcome.expect_err("first should fail").to_string();
    assert!(returned.contains("first attempt failed"));
    assert_eq!(seen.lock().unwrap().as_deref(), Some(returned.as_str()));
    assert_eq!(query.query_base().take_count(), Some(3));

    let sink = Arc::clone(&seen);
    let outcome = query
        .all_with(Box::new(
            move |outcome: std::result::Result<&DocumentResults<User>, &Error>| {
                *sink.lock().unwrap() = outcome.err().map(ToString::to_string);
            },
        ))
        .await;
    let returned = outcome.expect_err("all should fail").to_string();
    assert!(returned.contains("second attempt failed"));
    assert_eq!(seen.lock().unwrap().as_deref(), Some(returned.as_str()));
    Ok(())
}

#[tokio::test]
async fn submitted_parameters_keep_their_binding_order() -> Result<()> {
    let executor = StubExecutor::new();
    let session = store(&executor)?.session();
    let mut query = session.query::<User>(QueryOptions::collection("Users"));
    for i in 0..12 {
        query.where_equals(&format!("Field{i}"), i)?;
    }

    query.all().await?;
    let sent = executor.last_query().expect("query submitted");
    let expected = query.index_query()?;
    assert_eq!(sent.query_parameters, expected.query_parameters);
    assert_eq!(
        sent.query_parameters.iter().map(|(name, _)| name).nth(2),
        Some("p2")
    );
    Ok(())
}
