use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::{Value, json};
use tidequery::{
    Result, Store,
    documents::DocumentSession,
    query::{DocumentQuery, DocumentResults, QueryExecution, QueryOptions, QueryResponse},
    testing::StubExecutor,
};

#[derive(Parser, Debug)]
#[command(name = "tidequery", version, about = "Tidequery CLI")]
struct Cli {
    /// Database the queries are addressed to.
    #[arg(long, env = "TIDEQUERY_DATABASE", default_value = "default")]
    database: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the query descriptor the flags describe
    Render(QueryArgs),

    /// Run the query against a response envelope stored in a JSON file
    Replay {
        #[command(flatten)]
        query: QueryArgs,

        /// File holding a `{Results, Includes, TotalResults, IsStale}` envelope
        #[arg(long)]
        response: PathBuf,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Collection to query
    #[arg(long, conflicts_with = "index")]
    collection: Option<String>,

    /// Index to query
    #[arg(long)]
    index: Option<String>,

    /// Equality filter as FIELD=VALUE; VALUE is parsed as JSON when it can be (repeatable)
    #[arg(long = "where-equals", value_parser = parse_condition, action = ArgAction::Append)]
    where_equals: Vec<(String, Value)>,

    /// Ascending sort field (repeatable)
    #[arg(long = "order-by", action = ArgAction::Append)]
    order_by: Vec<String>,

    /// Descending sort field (repeatable)
    #[arg(long = "order-by-desc", action = ArgAction::Append)]
    order_by_desc: Vec<String>,

    #[arg(long)]
    take: Option<u32>,

    #[arg(long)]
    skip: Option<u32>,
}

fn parse_condition(input: &str) -> std::result::Result<(String, Value), String> {
    let (field, raw) = input
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got `{input}`"))?;
    if field.trim().is_empty() {
        return Err("field name must not be empty".into());
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.trim().to_string(), value))
}

impl QueryArgs {
    fn options(&self) -> QueryOptions {
        match (&self.index, &self.collection) {
            (Some(index), _) => QueryOptions::index(index),
            (None, Some(collection)) => QueryOptions::collection(collection),
            (None, None) => QueryOptions::default(),
        }
    }

    fn build(&self, session: &DocumentSession) -> Result<DocumentQuery<Value>> {
        let mut query = session.query::<Value>(self.options());
        for (field, value) in &self.where_equals {
            query.where_equals(field, value)?;
        }
        for field in &self.order_by {
            query.order_by(field);
        }
        for field in &self.order_by_desc {
            query.order_by_descending(field);
        }
        query.take(self.take).skip(self.skip);
        Ok(query)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render(args) => {
            let store = Store::builder(&cli.database)
                .executor(StubExecutor::new())
                .build()?;
            let query = args.build(&store.session())?;
            println!("{}", serde_json::to_string_pretty(&query.index_query()?)?);
        }
        Commands::Replay { query, response } => {
            let text = tokio::fs::read_to_string(&response).await?;
            let envelope: QueryResponse = serde_json::from_str(&text)?;
            let executor = StubExecutor::new();
            executor.push_results(envelope);
            let store = Store::builder(&cli.database).executor(executor).build()?;
            let session = store.session();
            let mut built = query.build(&session)?;
            built.statistics(true);
            print_results(&built.all().await?)?;
        }
    }

    Ok(())
}

fn print_results(results: &DocumentResults<Value>) -> Result<()> {
    let mut report = json!({ "results": results.results() });
    if let Some(response) = results.response() {
        report["statistics"] = json!({
            "totalResults": response.total_results,
            "isStale": response.is_stale,
            "indexName": response.index_name,
            "includes": response.includes.len(),
        });
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
