//! tidequery: fluent, injection-safe queries for a document database client.

pub mod commands;
pub mod context;
pub mod conventions;
pub mod conversion;
pub mod documents;
mod error;
pub mod metrics;
pub mod query;
pub mod store;
pub mod testing;

pub use error::{Error, Result, WithContext};
pub use store::{Store, StoreBuilder};

pub mod prelude {
    pub use crate::{
        Result, Store,
        conventions::DocumentConventions,
        documents::DocumentSession,
        query::{
            DocumentResults, FilterValue, OrderingType, QueryExecution, QueryOptions,
            SearchOperator, SpatialCriteria, SpatialRelation, SpatialUnits,
        },
    };
}
