use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    Result,
    context::SessionContext,
    query::{DocumentQuery, QueryListeners, QueryOptions, RawDocumentQuery},
};

#[derive(Default)]
struct SessionState {
    requests: AtomicUsize,
    tracked: RwLock<HashMap<String, Value>>,
    included: RwLock<HashMap<String, Value>>,
}

fn metadata_id(raw: &Value) -> Option<&str> {
    raw.get("@metadata")?.get("@id")?.as_str()
}

/// Unit of work that hands out queries and remembers what they returned.
///
/// Every query created here reports back to the session: fetched documents
/// are tracked by id, include batches are kept for later lookups and each
/// execution counts as one request.
#[derive(Clone)]
pub struct DocumentSession {
    context: SessionContext,
    state: Arc<SessionState>,
}

impl std::fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("context", &self.context)
            .field("requests", &self.number_of_requests())
            .finish()
    }
}

impl DocumentSession {
    pub(crate) fn new(context: SessionContext) -> Self {
        Self {
            context,
            state: Arc::new(SessionState::default()),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Typed query through the session's own execution layer.
    pub fn query<T>(&self, options: QueryOptions) -> DocumentQuery<T> {
        DocumentQuery::create(self, Arc::clone(&self.context.executor), options)
    }

    pub fn raw_query<T>(&self, query: impl Into<String>, options: QueryOptions) -> RawDocumentQuery<T> {
        RawDocumentQuery::create(self, Arc::clone(&self.context.executor), query, options)
    }

    pub fn number_of_requests(&self) -> usize {
        self.state.requests.load(Ordering::Relaxed)
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.state
            .tracked
            .read()
            .map(|tracked| tracked.contains_key(id))
            .unwrap_or(false)
    }

    /// The raw form of a document a query in this session returned.
    pub fn tracked_document(&self, id: &str) -> Option<Value> {
        self.state.tracked.read().ok()?.get(id).cloned()
    }

    /// Deserializes a tracked document.
    pub fn load_tracked<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        let Some(mut raw) = self.tracked_document(id) else {
            return Ok(None);
        };
        if let Value::Object(body) = &mut raw {
            body.remove("@metadata");
        }
        Ok(Some(serde_json::from_value(raw)?))
    }

    /// A side-loaded document from an include batch.
    pub fn included_document(&self, id: &str) -> Option<Value> {
        self.state.included.read().ok()?.get(id).cloned()
    }

    /// Forgets tracked and included documents. The request count is kept.
    pub fn clear(&self) {
        if let Ok(mut tracked) = self.state.tracked.write() {
            tracked.clear();
        }
        if let Ok(mut included) = self.state.included.write() {
            included.clear();
        }
    }

    pub(crate) fn register_listeners<T>(&self, listeners: &mut QueryListeners<T>) {
        let state = Arc::clone(&self.state);
        listeners.on_documents_queried(move || {
            state.requests.fetch_add(1, Ordering::Relaxed);
        });

        let state = Arc::clone(&self.state);
        listeners.on_document_fetched(move |result| {
            let Some(id) = result.metadata.id.clone() else {
                return;
            };
            if let Ok(mut tracked) = state.tracked.write() {
                tracked.insert(id, result.raw.clone());
            }
        });

        let state = Arc::clone(&self.state);
        listeners.on_includes_fetched(move |includes| {
            if let Ok(mut included) = state.included.write() {
                for raw in includes {
                    if let Some(id) = metadata_id(raw) {
                        included.insert(id.to_string(), raw.clone());
                    }
                }
            }
        });
    }
}
