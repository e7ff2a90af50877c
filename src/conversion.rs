//! Turning raw result documents into typed entities.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{
    Error, Result, conventions::DocumentConventions, query::QueryResponse,
    query::value::parse_canonical,
};

/// Nested field path (dot separated) to declared type name. `"date"` marks a
/// canonical date string that should be handed to chrono.
pub type NestedTypes = HashMap<String, String>;

pub const DATE_TYPE: &str = "date";

const METADATA: &str = "@metadata";

/// The target shape a raw document is converted into.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentShape {
    pub document_type: Option<String>,
    pub nested_types: NestedTypes,
}

impl DocumentShape {
    pub fn new(document_type: Option<String>, nested_types: NestedTypes) -> Self {
        Self {
            document_type,
            nested_types,
        }
    }
}

/// What conversion learned about a document from its `@metadata` block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversionMetadata {
    pub id: Option<String>,
    pub collection: Option<String>,
    pub change_vector: Option<String>,
    pub document_type: Option<String>,
    pub projection: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConversionResult<T> {
    pub document: T,
    pub raw: Value,
    pub metadata: ConversionMetadata,
}

/// Prepares raw documents for deserialization. Implementations decide how
/// metadata is read and which fields need rewriting.
pub trait EntityConverter: Send + Sync {
    /// Returns the document body ready for `serde` plus its metadata.
    fn prepare(&self, raw: &Value, shape: &DocumentShape) -> Result<(Value, ConversionMetadata)>;

    fn try_fetch_results<'a>(&self, response: &'a QueryResponse) -> &'a [Value] {
        &response.results
    }

    fn try_fetch_includes<'a>(&self, response: &'a QueryResponse) -> &'a [Value] {
        &response.includes
    }

    fn check_is_projection(&self, raw: &Value) -> bool {
        raw.get(METADATA)
            .and_then(|metadata| metadata.get("@projection"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

pub fn convert_to_document<T>(
    converter: &dyn EntityConverter,
    raw: &Value,
    shape: &DocumentShape,
) -> Result<ConversionResult<T>>
where
    T: DeserializeOwned,
{
    let (body, metadata) = converter.prepare(raw, shape)?;
    let document = serde_json::from_value(body).map_err(|err| Error::Conversion {
        context: match &metadata.id {
            Some(id) => format!("document {id}: {err}"),
            None => err.to_string(),
        },
    })?;
    Ok(ConversionResult {
        document,
        raw: raw.clone(),
        metadata,
    })
}

/// Default converter for plain JSON documents.
///
/// Strips `@metadata`, fills the identity property from `@metadata.@id` when
/// the body lacks it, and rewrites canonical date strings at paths declared as
/// dates (by the shape or by `@metadata.@nested-object-types`).
#[derive(Clone, Debug)]
pub struct JsonEntityConverter {
    conventions: Arc<DocumentConventions>,
}

impl JsonEntityConverter {
    pub fn new(conventions: Arc<DocumentConventions>) -> Self {
        Self { conventions }
    }
}

impl EntityConverter for JsonEntityConverter {
    fn prepare(&self, raw: &Value, shape: &DocumentShape) -> Result<(Value, ConversionMetadata)> {
        let Value::Object(object) = raw else {
            return Err(Error::Conversion {
                context: format!("expected a JSON object, got {}", kind(raw)),
            });
        };
        let mut body = object.clone();
        let metadata = body.remove(METADATA);
        let meta = metadata.as_ref().and_then(Value::as_object);
        let text = |key: &str| {
            meta.and_then(|m| m.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let collection = text("@collection");
        let document_type = shape.document_type.clone().or_else(|| {
            collection
                .as_deref()
                .map(|name| self.conventions.document_type(name))
        });
        let info = ConversionMetadata {
            id: text("@id"),
            collection,
            change_vector: text("@change-vector"),
            projection: self.check_is_projection(raw),
            document_type,
        };

        let id_property = self
            .conventions
            .id_property_name(info.document_type.as_deref());
        if let Some(id) = &info.id {
            if !body.contains_key(id_property) {
                body.insert(id_property.to_string(), Value::String(id.clone()));
            }
        }

        let mut nested: NestedTypes = meta
            .and_then(|m| m.get("@nested-object-types"))
            .and_then(Value::as_object)
            .map(|types| {
                types
                    .iter()
                    .filter_map(|(path, ty)| Some((path.clone(), ty.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        nested.extend(shape.nested_types.clone());

        for (path, ty) in &nested {
            if ty.eq_ignore_ascii_case(DATE_TYPE) {
                let segments: Vec<&str> = path.split('.').collect();
                rewrite_dates(&mut body, &segments);
            }
        }

        Ok((Value::Object(body), info))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn rewrite_dates(object: &mut Map<String, Value>, path: &[&str]) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    let Some(value) = object.get_mut(*head) else {
        return;
    };
    rewrite_value(value, rest);
}

fn rewrite_value(value: &mut Value, rest: &[&str]) {
    match value {
        Value::Array(items) => {
            for item in items {
                rewrite_value(item, rest);
            }
        }
        Value::Object(inner) if !rest.is_empty() => rewrite_dates(inner, rest),
        Value::String(text) if rest.is_empty() => {
            if let Some((naive, utc)) = parse_canonical(text) {
                *text = if utc {
                    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true)
                } else {
                    naive.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
                };
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: String,
        name: String,
    }

    #[derive(Debug, Deserialize)]
    struct Event {
        at: DateTime<Utc>,
        local: Option<NaiveDateTime>,
    }

    fn converter() -> JsonEntityConverter {
        JsonEntityConverter::new(Arc::new(DocumentConventions::default()))
    }

    #[test]
    fn metadata_is_read_and_stripped() {
        let raw = json!({
            "name": "Ann",
            "@metadata": {
                "@id": "users/1",
                "@collection": "Users",
                "@change-vector": "A:1"
            }
        });
        let result: ConversionResult<User> =
            convert_to_document(&converter(), &raw, &DocumentShape::default()).unwrap();
        assert_eq!(result.document.id, "users/1");
        assert_eq!(result.document.name, "Ann");
        assert_eq!(result.metadata.collection.as_deref(), Some("Users"));
        assert_eq!(result.metadata.document_type.as_deref(), Some("User"));
        assert_eq!(result.metadata.change_vector.as_deref(), Some("A:1"));
        assert!(!result.metadata.projection);
        assert_eq!(result.raw, raw);
    }

    #[test]
    fn existing_id_is_not_overwritten() {
        let raw = json!({"id": "mine", "name": "Ann", "@metadata": {"@id": "users/1"}});
        let result: ConversionResult<User> =
            convert_to_document(&converter(), &raw, &DocumentShape::default()).unwrap();
        assert_eq!(result.document.id, "mine");
    }

    #[test]
    fn projections_are_detected() {
        let raw = json!({"name": "Ann", "@metadata": {"@projection": true}});
        assert!(converter().check_is_projection(&raw));
        assert!(!converter().check_is_projection(&json!({"name": "Ann"})));
    }

    #[test]
    fn declared_dates_are_rewritten() {
        let raw = json!({
            "at": "2024-03-01T10:20:30.1230000Z",
            "local": "2024-03-01T10:20:30.0000000",
        });
        let mut nested = NestedTypes::new();
        nested.insert("at".into(), "date".into());
        nested.insert("local".into(), "date".into());
        let shape = DocumentShape::new(Some("Event".into()), nested);
        let result: ConversionResult<Event> =
            convert_to_document(&converter(), &raw, &shape).unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_milli_opt(10, 20, 30, 123))
            .unwrap();
        assert_eq!(result.document.at.naive_utc(), expected);
        assert_eq!(
            result.document.local,
            NaiveDate::from_ymd_opt(2024, 3, 1).and_then(|d| d.and_hms_opt(10, 20, 30))
        );
    }

    #[test]
    fn metadata_nested_types_apply_to_nested_paths() {
        let raw = json!({
            "trip": {"legs": [{"at": "2024-03-01T10:20:30.0000000Z"}]},
            "@metadata": {"@nested-object-types": {"trip.legs.at": "date"}}
        });
        let (body, _) = converter().prepare(&raw, &DocumentShape::default()).unwrap();
        assert_eq!(body["trip"]["legs"][0]["at"], json!("2024-03-01T10:20:30Z"));
    }

    #[test]
    fn non_objects_fail_conversion() {
        let err = convert_to_document::<User>(&converter(), &json!([1]), &DocumentShape::default())
            .unwrap_err();
        assert!(matches!(err, Error::Conversion { .. }));
    }
}
