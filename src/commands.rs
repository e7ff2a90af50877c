//! The unit of work handed to the execution layer.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    Error, Result,
    conventions::DocumentConventions,
    query::{IndexQuery, QueryResponse},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// A cluster node a command can be dispatched to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerNode {
    pub url: String,
    pub database: String,
    pub cluster_tag: Option<String>,
}

impl ServerNode {
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            cluster_tag: None,
        }
    }

    pub fn with_cluster_tag(mut self, tag: impl Into<String>) -> Self {
        self.cluster_tag = Some(tag.into());
        self
    }
}

/// What the transport layer got back for a command.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl RawResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: Some(body),
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_status(status: u16, body: Option<Value>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }
}

/// Transport-level projection of a command.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

/// Turns a failed response into the error surfaced to the caller.
pub trait ErrorMapper: Send + Sync {
    fn map_error(&self, response: &RawResponse) -> Option<Error>;
}

/// Maps any 4xx/5xx status to [`Error::Server`], taking the message from the
/// body's `Message` or `Error` field when present.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusErrorMapper;

impl ErrorMapper for StatusErrorMapper {
    fn map_error(&self, response: &RawResponse) -> Option<Error> {
        if response.status < 400 {
            return None;
        }
        let message = response
            .body
            .as_ref()
            .and_then(|body| {
                body.get("Message")
                    .or_else(|| body.get("Error"))
                    .and_then(Value::as_str)
            })
            .unwrap_or("request failed")
            .to_string();
        Some(Error::Server {
            status: response.status,
            message,
        })
    }
}

/// A request plus its failover bookkeeping. `R` is the typed body the
/// response unwraps into.
pub struct Command<R> {
    endpoint: String,
    method: HttpMethod,
    params: BTreeMap<String, String>,
    payload: Option<Value>,
    headers: BTreeMap<String, String>,
    failed_nodes: HashSet<ServerNode>,
    last_response: Option<RawResponse>,
    error_mapper: Arc<dyn ErrorMapper>,
    _marker: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for Command<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("endpoint", &self.endpoint)
            .field("method", &self.method)
            .field("params", &self.params)
            .field("failed_nodes", &self.failed_nodes.len())
            .finish()
    }
}

impl<R> Command<R>
where
    R: DeserializeOwned,
{
    pub fn new(endpoint: impl Into<String>, error_mapper: Arc<dyn ErrorMapper>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: HttpMethod::default(),
            params: BTreeMap::new(),
            payload: None,
            headers: BTreeMap::new(),
            failed_nodes: HashSet::new(),
            last_response: None,
            error_mapper,
            _marker: PhantomData,
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn add_failed_node(&mut self, node: ServerNode) {
        self.failed_nodes.insert(node);
    }

    pub fn was_failed_with_node(&self, node: &ServerNode) -> bool {
        self.failed_nodes.contains(node)
    }

    pub fn was_failed(&self) -> bool {
        !self.failed_nodes.is_empty()
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &ServerNode> {
        self.failed_nodes.iter()
    }

    pub fn last_response(&self) -> Option<&RawResponse> {
        self.last_response.as_ref()
    }

    pub fn to_request_options(&self) -> RequestOptions {
        RequestOptions {
            method: self.method,
            uri: self.endpoint.clone(),
            query: (!self.params.is_empty()).then(|| self.params.clone()),
            body: self.payload.clone().filter(|body| !body.is_null()),
            headers: self.headers.clone(),
        }
    }

    /// Stores the response, validates it and unwraps the body. A response
    /// without a body yields `None`.
    pub fn set_response(&mut self, response: RawResponse) -> Result<Option<R>> {
        let failure = self.error_mapper.map_error(&response);
        let body = response.body.clone();
        self.last_response = Some(response);
        if let Some(err) = failure {
            return Err(err);
        }
        match body {
            None | Some(Value::Null) => Ok(None),
            Some(body) => Ok(Some(serde_json::from_value(body)?)),
        }
    }
}

pub type QueryCommand = Command<QueryResponse>;

impl Command<QueryResponse> {
    /// `POST /databases/{database}/queries?queryHash=...` carrying the query
    /// descriptor as its body.
    pub fn for_query(
        database: &str,
        query: &IndexQuery,
        conventions: &DocumentConventions,
    ) -> Result<Self> {
        let payload = serde_json::to_value(query)?;
        let hash = query_hash(query)?;
        Ok(
            Command::new(format!("/databases/{database}/queries"), conventions.error_mapper())
                .with_method(HttpMethod::Post)
                .with_param("queryHash", hash)
                .with_payload(payload),
        )
    }
}

/// Stable hash of the query text and its parameters, used by the server to
/// key cached results.
pub(crate) fn query_hash(query: &IndexQuery) -> Result<String> {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let params = serde_json::to_string(&query.query_parameters)?;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in query.query.as_bytes().iter().chain(params.as_bytes()) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    Ok(format!("{hash:016x}"))
}

/// The execution layer: dispatches a query command to some node and returns
/// the unwrapped envelope. `None` means the server had no content.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, command: &mut QueryCommand) -> Result<Option<QueryResponse>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command() -> Command<Value> {
        Command::new("/databases/db/docs", Arc::new(StatusErrorMapper))
    }

    #[test]
    fn defaults_to_get_without_query_or_body() {
        let options = command().to_request_options();
        assert_eq!(options.method, HttpMethod::Get);
        assert_eq!(options.uri, "/databases/db/docs");
        assert!(options.query.is_none());
        assert!(options.body.is_none());
        let json = serde_json::to_value(&options).unwrap();
        assert!(json.get("query").is_none());
        assert!(json.get("body").is_none());
    }

    #[test]
    fn includes_params_and_body_when_present() {
        let options = command()
            .with_method(HttpMethod::Post)
            .with_param("id", "users/1")
            .with_payload(json!({"a": 1}))
            .to_request_options();
        assert_eq!(options.query.unwrap()["id"], "users/1");
        assert_eq!(options.body, Some(json!({"a": 1})));
    }

    #[test]
    fn failed_nodes_are_tracked() {
        let mut cmd = command();
        let node = ServerNode::new("http://a:8080", "db");
        assert!(!cmd.was_failed());
        cmd.add_failed_node(node.clone());
        assert!(cmd.was_failed());
        assert!(cmd.was_failed_with_node(&node));
        assert!(!cmd.was_failed_with_node(&ServerNode::new("http://b:8080", "db")));
    }

    #[test]
    fn set_response_unwraps_and_stores() {
        let mut cmd = command();
        let body = cmd.set_response(RawResponse::ok(json!({"x": 1}))).unwrap();
        assert_eq!(body, Some(json!({"x": 1})));
        assert_eq!(cmd.last_response().unwrap().status, 200);

        assert_eq!(cmd.set_response(RawResponse::no_content()).unwrap(), None);
    }

    #[test]
    fn set_response_surfaces_mapped_errors() {
        let mut cmd = command();
        let err = cmd
            .set_response(RawResponse::with_status(
                500,
                Some(json!({"Message": "index corrupted"})),
            ))
            .unwrap_err();
        match err {
            Error::Server { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "index corrupted");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(cmd.last_response().unwrap().status, 500);
    }
}
