use std::fmt;

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// Parameter bindings for one query, kept in insertion order.
///
/// Generated names follow `p0`, `p1`, ... and never collide with a name that
/// was registered explicitly.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryParameters {
    entries: Vec<(String, Value)>,
    next_index: usize,
}

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` under a freshly generated name and returns the name.
    pub fn add(&mut self, value: Value) -> String {
        let name = loop {
            let candidate = format!("p{}", self.next_index);
            self.next_index += 1;
            if !self.contains(&candidate) {
                break candidate;
            }
        };
        self.entries.push((name.clone(), value));
        name
    }

    /// Binds `value` under a caller-chosen name, replacing an earlier binding
    /// with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn to_json_object(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl Serialize for QueryParameters {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for QueryParameters {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(ParametersVisitor)
    }
}

struct ParametersVisitor;

impl<'de> Visitor<'de> for ParametersVisitor {
    type Value = QueryParameters;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of query parameter names to values")
    }

    fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut params = QueryParameters::new();
        while let Some((name, value)) = access.next_entry::<String, Value>()? {
            if let Some(index) = generated_index(&name) {
                params.next_index = params.next_index.max(index + 1);
            }
            params.insert(name, value);
        }
        Ok(params)
    }
}

/// The numeric suffix of a `pN` name.
fn generated_index(name: &str) -> Option<usize> {
    let digits = name.strip_prefix('p')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_run_sequentially() {
        let mut params = QueryParameters::new();
        assert_eq!(params.add(json!("a")), "p0");
        assert_eq!(params.add(json!(1)), "p1");
        assert_eq!(params.get("p1"), Some(&json!(1)));
    }

    #[test]
    fn generated_names_skip_explicit_ones() {
        let mut params = QueryParameters::new();
        params.insert("p0", json!("mine"));
        assert_eq!(params.add(json!("generated")), "p1");
        assert_eq!(params.get("p0"), Some(&json!("mine")));
    }

    #[test]
    fn serializes_in_insertion_order() {
        let mut params = QueryParameters::new();
        params.insert("zeta", json!(1));
        params.insert("alpha", json!(2));
        assert_eq!(
            serde_json::to_string(&params).unwrap(),
            r#"{"zeta":1,"alpha":2}"#
        );
    }

    #[test]
    fn deserializing_keeps_arrival_order_and_numbering() {
        let mut params = QueryParameters::new();
        for i in 0..12 {
            params.add(json!(i));
        }
        let text = serde_json::to_string(&params).unwrap();
        let back: QueryParameters = serde_json::from_str(&text).unwrap();
        assert_eq!(back, params);
        assert_eq!(
            back.iter().map(|(name, _)| name).take(3).collect::<Vec<_>>(),
            vec!["p0", "p1", "p2"]
        );

        let mut back = back;
        assert_eq!(back.add(json!("next")), "p12");
    }

    #[test]
    fn deserializing_named_parameters_leaves_numbering_alone() {
        let back: QueryParameters =
            serde_json::from_str(r#"{"zeta":1,"alpha":2,"page":3}"#).unwrap();
        assert_eq!(
            back.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            vec!["zeta", "alpha", "page"]
        );
        let mut back = back;
        assert_eq!(back.add(json!(0)), "p0");
    }
}
