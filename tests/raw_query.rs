use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use tidequery::{
    Store,
    query::{QueryExecution, QueryOptions, QueryResponse},
    testing::StubExecutor,
};

#[derive(Debug, Deserialize, PartialEq)]
struct CompanyTotal {
    #[serde(rename = "Company")]
    company: String,
    #[serde(rename = "Sum")]
    sum: f64,
}

#[tokio::test]
async fn raw_queries_run_with_named_parameters() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(QueryResponse {
        results: vec![
            json!({"Company": "companies/1", "Sum": 120.5, "@metadata": {"@projection": true}}),
            json!({"Company": "companies/2", "Sum": 80.0, "@metadata": {"@projection": true}}),
        ],
        total_results: 2,
        ..QueryResponse::default()
    });
    let store = Store::builder("db").executor(executor.clone()).build()?;
    let session = store.session();

    let mut query = session.raw_query::<CompanyTotal>(
        "from Orders where Total > $min group by Company select Company, sum(Total) as Sum",
        QueryOptions::default(),
    );
    query.add_parameter("min", 50);
    let totals = query.all().await?.into_results();

    assert_eq!(totals.len(), 2);
    assert_eq!(totals[0].company, "companies/1");
    assert_eq!(totals[1].sum, 80.0);

    let sent = executor.last_query().expect("query submitted");
    assert_eq!(
        sent.query,
        "from Orders where Total > $min group by Company select Company, sum(Total) as Sum"
    );
    assert_eq!(sent.query_parameters.get("min"), Some(&json!(50)));
    // Projections are not tracked by the session.
    assert_eq!(session.number_of_requests(), 1);
    assert!(!session.is_loaded("companies/1"));
    Ok(())
}

#[tokio::test]
async fn raw_queries_page_like_typed_ones() -> Result<()> {
    let executor = StubExecutor::new();
    executor.push_results(QueryResponse {
        total_results: 17,
        ..QueryResponse::default()
    });
    let store = Store::builder("db").executor(executor.clone()).build()?;
    let session = store.session();

    let mut query = session.raw_query::<serde_json::Value>("from Users", QueryOptions::default());
    query.take(Some(5)).skip(Some(10));
    assert_eq!(query.count().await?, 17);

    let sent = executor.last_query().expect("query submitted");
    assert_eq!(sent.page_size, 0);
    assert_eq!(query.index_query()?.page_size, 5);
    assert_eq!(query.index_query()?.start, 10);
    Ok(())
}
