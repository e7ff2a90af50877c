use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::commands::{ErrorMapper, StatusErrorMapper};

/// Maps between document type names and collection names.
pub trait NamingConvention: Send + Sync {
    fn collection_name(&self, document_type: &str) -> String;
    fn document_type(&self, collection: &str) -> String;
}

/// Regular English plural rules only: `Company` ⇄ `Companies`,
/// `Address` ⇄ `Addresses`, `User` ⇄ `Users`. Irregular nouns need a custom
/// [`NamingConvention`].
#[derive(Clone, Copy, Debug, Default)]
pub struct EnglishNaming;

const SIBILANT_SUFFIXES: [&str; 5] = ["s", "x", "z", "ch", "sh"];

impl NamingConvention for EnglishNaming {
    fn collection_name(&self, document_type: &str) -> String {
        let lower = document_type.to_ascii_lowercase();
        if let Some(stem) = document_type.strip_suffix('y') {
            let before = stem.chars().last();
            if before.is_some_and(|ch| !"aeiouAEIOU".contains(ch)) {
                return format!("{stem}ies");
            }
        }
        if SIBILANT_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
            return format!("{document_type}es");
        }
        format!("{document_type}s")
    }

    fn document_type(&self, collection: &str) -> String {
        let lower = collection.to_ascii_lowercase();
        if lower.ends_with("ies") && collection.len() > 3 {
            return format!("{}y", &collection[..collection.len() - 3]);
        }
        if let Some(stem) = lower.strip_suffix("es") {
            if ["ss", "x", "z", "ch", "sh"]
                .iter()
                .any(|suffix| stem.ends_with(suffix))
            {
                return collection[..collection.len() - 2].to_string();
            }
        }
        if lower.ends_with('s') && !lower.ends_with("ss") {
            return collection[..collection.len() - 1].to_string();
        }
        collection.to_string()
    }
}

/// Client-wide settings consulted when queries are built, executed and
/// converted.
#[derive(Clone)]
pub struct DocumentConventions {
    identity_property: String,
    identity_overrides: HashMap<String, String>,
    default_wait_timeout: Duration,
    slow_query_threshold: Duration,
    naming: Arc<dyn NamingConvention>,
    error_mapper: Arc<dyn ErrorMapper>,
}

impl Default for DocumentConventions {
    fn default() -> Self {
        Self {
            identity_property: "id".into(),
            identity_overrides: HashMap::new(),
            default_wait_timeout: Duration::from_secs(15),
            slow_query_threshold: Duration::from_millis(500),
            naming: Arc::new(EnglishNaming),
            error_mapper: Arc::new(StatusErrorMapper),
        }
    }
}

impl fmt::Debug for DocumentConventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentConventions")
            .field("identity_property", &self.identity_property)
            .field("identity_overrides", &self.identity_overrides)
            .field("default_wait_timeout", &self.default_wait_timeout)
            .field("slow_query_threshold", &self.slow_query_threshold)
            .finish()
    }
}

impl DocumentConventions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity_property(mut self, property: impl Into<String>) -> Self {
        self.identity_property = property.into();
        self
    }

    /// Identity property for one document type, overriding the default.
    pub fn with_identity_override(
        mut self,
        document_type: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        self.identity_overrides
            .insert(document_type.into(), property.into());
        self
    }

    pub fn with_default_wait_timeout(mut self, timeout: Duration) -> Self {
        self.default_wait_timeout = timeout;
        self
    }

    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    pub fn with_naming<N>(mut self, naming: N) -> Self
    where
        N: NamingConvention + 'static,
    {
        self.naming = Arc::new(naming);
        self
    }

    pub fn with_error_mapper<M>(mut self, mapper: M) -> Self
    where
        M: ErrorMapper + 'static,
    {
        self.error_mapper = Arc::new(mapper);
        self
    }

    pub fn id_property_name(&self, document_type: Option<&str>) -> &str {
        document_type
            .and_then(|ty| self.identity_overrides.get(ty))
            .map(String::as_str)
            .unwrap_or(&self.identity_property)
    }

    pub fn collection_name(&self, document_type: &str) -> String {
        self.naming.collection_name(document_type)
    }

    pub fn document_type(&self, collection: &str) -> String {
        self.naming.document_type(collection)
    }

    pub fn default_wait_timeout(&self) -> Duration {
        self.default_wait_timeout
    }

    pub fn slow_query_threshold(&self) -> Duration {
        self.slow_query_threshold
    }

    pub fn error_mapper(&self) -> Arc<dyn ErrorMapper> {
        Arc::clone(&self.error_mapper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_plurals() {
        let naming = EnglishNaming;
        assert_eq!(naming.collection_name("User"), "Users");
        assert_eq!(naming.collection_name("Company"), "Companies");
        assert_eq!(naming.collection_name("Address"), "Addresses");
        assert_eq!(naming.collection_name("Day"), "Days");
        assert_eq!(naming.collection_name("Match"), "Matches");
    }

    #[test]
    fn english_singulars() {
        let naming = EnglishNaming;
        assert_eq!(naming.document_type("Users"), "User");
        assert_eq!(naming.document_type("Companies"), "Company");
        assert_eq!(naming.document_type("Addresses"), "Address");
        assert_eq!(naming.document_type("Matches"), "Match");
        assert_eq!(naming.document_type("Glass"), "Glass");
        assert_eq!(naming.document_type("Houses"), "House");
    }

    #[test]
    fn identity_overrides_win() {
        let conventions = DocumentConventions::new().with_identity_override("Order", "OrderId");
        assert_eq!(conventions.id_property_name(Some("Order")), "OrderId");
        assert_eq!(conventions.id_property_name(Some("User")), "id");
        assert_eq!(conventions.id_property_name(None), "id");
    }

    struct Fixed;

    impl NamingConvention for Fixed {
        fn collection_name(&self, _: &str) -> String {
            "People".into()
        }
        fn document_type(&self, _: &str) -> String {
            "Person".into()
        }
    }

    #[test]
    fn naming_is_pluggable() {
        let conventions = DocumentConventions::new().with_naming(Fixed);
        assert_eq!(conventions.collection_name("Person"), "People");
        assert_eq!(conventions.document_type("People"), "Person");
    }
}
