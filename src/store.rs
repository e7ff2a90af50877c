use std::sync::Arc;

use crate::{
    Error, Result,
    commands::RequestExecutor,
    context::SessionContext,
    conventions::DocumentConventions,
    conversion::{EntityConverter, JsonEntityConverter},
    documents::DocumentSession,
};

/// Entry point: one database, one execution layer, shared conventions.
#[derive(Clone, Debug)]
pub struct Store {
    context: SessionContext,
}

impl Store {
    pub fn builder(database: impl Into<String>) -> StoreBuilder {
        StoreBuilder::new(database)
    }

    pub fn database(&self) -> &str {
        self.context.database()
    }

    pub fn conventions(&self) -> &DocumentConventions {
        self.context.conventions()
    }

    /// Opens a fresh session. Sessions share the store's collaborators but
    /// track documents independently.
    pub fn session(&self) -> DocumentSession {
        DocumentSession::new(self.context.clone())
    }
}

pub struct StoreBuilder {
    database: String,
    conventions: DocumentConventions,
    executor: Option<Arc<dyn RequestExecutor>>,
    converter: Option<Arc<dyn EntityConverter>>,
}

impl StoreBuilder {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            conventions: DocumentConventions::default(),
            executor: None,
            converter: None,
        }
    }

    pub fn conventions(mut self, conventions: DocumentConventions) -> Self {
        self.conventions = conventions;
        self
    }

    pub fn executor<E>(mut self, executor: E) -> Self
    where
        E: RequestExecutor + 'static,
    {
        self.executor = Some(Arc::new(executor));
        self
    }

    pub fn shared_executor(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replaces the default [`JsonEntityConverter`].
    pub fn converter<C>(mut self, converter: C) -> Self
    where
        C: EntityConverter + 'static,
    {
        self.converter = Some(Arc::new(converter));
        self
    }

    pub fn build(self) -> Result<Store> {
        if self.database.trim().is_empty() {
            return Err(Error::InvalidArgument("database name must not be empty".into()));
        }
        let executor = self.executor.ok_or_else(|| {
            Error::InvalidOperation("a request executor is required to build a store".into())
        })?;
        let conventions = Arc::new(self.conventions);
        let converter = self
            .converter
            .unwrap_or_else(|| Arc::new(JsonEntityConverter::new(Arc::clone(&conventions))));
        tracing::debug!(database = %self.database, "store configured");
        Ok(Store {
            context: SessionContext::new(self.database, conventions, executor, converter),
        })
    }
}
