use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{QueryBase, QueryBuilder, QueryExecution, QueryOptions, identity_for};
use crate::{commands::RequestExecutor, context::SessionContext, documents::DocumentSession};

/// A query whose text the caller wrote. Parameters are bound by name and
/// passed through untouched.
#[derive(Debug)]
pub struct RawDocumentQuery<T> {
    base: QueryBase<T>,
}

impl<T> RawDocumentQuery<T> {
    pub fn create(
        session: &DocumentSession,
        executor: Arc<dyn RequestExecutor>,
        query: impl Into<String>,
        options: QueryOptions,
    ) -> Self {
        let context = session.context().clone().with_executor(executor);
        let mut raw = Self::with_context(context, query, &options);
        session.register_listeners(raw.base.listeners_mut());
        raw
    }

    pub(crate) fn with_context(
        context: SessionContext,
        query: impl Into<String>,
        options: &QueryOptions,
    ) -> Self {
        let (source, shape) = options.resolve(&context.conventions);
        let id_property = identity_for(&context.conventions, &shape).to_string();
        let mut builder = QueryBuilder::new(source, id_property);
        builder.raw_query(query);
        Self {
            base: QueryBase::new(
                context,
                builder,
                shape,
                options.with_statistics,
                options.index_query_options,
            ),
        }
    }

    /// Binds `$name` for the query text. A later call with the same name
    /// replaces the value.
    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.base.parameters.insert(name, value.into());
        self
    }
}

impl<T> QueryExecution<T> for RawDocumentQuery<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn query_base(&self) -> &QueryBase<T> {
        &self.base
    }

    fn query_base_mut(&mut self) -> &mut QueryBase<T> {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conventions::DocumentConventions, conversion::JsonEntityConverter, testing::StubExecutor,
    };
    use serde_json::json;

    fn raw(text: &str) -> RawDocumentQuery<Value> {
        let conventions = Arc::new(DocumentConventions::default());
        let context = SessionContext::new(
            "db",
            Arc::clone(&conventions),
            Arc::new(StubExecutor::new()),
            Arc::new(JsonEntityConverter::new(conventions)),
        );
        RawDocumentQuery::with_context(context, text, &QueryOptions::default())
    }

    #[test]
    fn text_is_sent_verbatim() {
        let mut query = raw("from Users where Tags in ($tags) limit 5");
        query
            .add_parameter("tags", json!(["a", [1, 2]]))
            .add_parameter("unused", json!({"kept": true}));
        let index_query = query.index_query().unwrap();
        assert_eq!(index_query.query, "from Users where Tags in ($tags) limit 5");
        assert_eq!(index_query.query_parameters.get("tags"), Some(&json!(["a", [1, 2]])));
        assert_eq!(
            index_query.query_parameters.get("unused"),
            Some(&json!({"kept": true}))
        );
    }

    #[test]
    fn rebinding_replaces_the_value() {
        let mut query = raw("from Users where Name = $name");
        query.add_parameter("name", "Ann").add_parameter("name", "Bob");
        let index_query = query.index_query().unwrap();
        assert_eq!(index_query.query_parameters.len(), 1);
        assert_eq!(index_query.query_parameters.get("name"), Some(&json!("Bob")));
    }
}
