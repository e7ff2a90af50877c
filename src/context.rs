use std::fmt;
use std::sync::Arc;

use crate::{
    commands::RequestExecutor, conventions::DocumentConventions, conversion::EntityConverter,
};

/// Collaborators every query created by a session shares.
#[derive(Clone)]
pub struct SessionContext {
    pub(crate) database: String,
    pub(crate) conventions: Arc<DocumentConventions>,
    pub(crate) executor: Arc<dyn RequestExecutor>,
    pub(crate) converter: Arc<dyn EntityConverter>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("database", &self.database)
            .field("conventions", &self.conventions)
            .finish()
    }
}

impl SessionContext {
    pub fn new(
        database: impl Into<String>,
        conventions: Arc<DocumentConventions>,
        executor: Arc<dyn RequestExecutor>,
        converter: Arc<dyn EntityConverter>,
    ) -> Self {
        Self {
            database: database.into(),
            conventions,
            executor,
            converter,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn conventions(&self) -> &DocumentConventions {
        &self.conventions
    }

    /// Same context, different execution layer.
    pub fn with_executor(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        self.executor = executor;
        self
    }
}
