use indexmap::IndexMap;
use serde_json::Value;

/// Structured query object, serialized by [`encode_query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(IndexMap<String, Value>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl From<serde_json::Map<String, Value>> for QueryParams {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        QueryParams(map.into_iter().collect())
    }
}

/// Serializes a query object as `k=v&k=v`.
///
/// Array values repeat the key once per element. `null` values are skipped.
/// Nested objects are sent as their JSON text.
pub fn encode_query(query: &QueryParams) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in query.iter() {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = scalar_text(item) {
                        serializer.append_pair(key, &text);
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    serializer.append_pair(key, &text);
                }
            }
        }
    }
    serializer.finish()
}

/// Appends the encoded query to `path`, keeping any query string the path
/// already carries.
pub fn append_query(path: &str, query: Option<&QueryParams>) -> String {
    let encoded = match query {
        Some(query) if !query.is_empty() => encode_query(query),
        _ => return path.to_string(),
    };
    if encoded.is_empty() {
        return path.to_string();
    }
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}", path, separator, encoded)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested => Some(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arrays_repeat_the_key() {
        let query = QueryParams::new()
            .with("tag", json!(["a", "b"]))
            .with("limit", 10)
            .with("skip", Value::Null);
        assert_eq!(encode_query(&query), "tag=a&tag=b&limit=10");
    }

    #[test]
    fn test_values_are_percent_encoded() {
        let query = QueryParams::new().with("q", "a b&c");
        assert_eq!(encode_query(&query), "q=a+b%26c");
    }

    #[test]
    fn test_nested_objects_are_json() {
        let query = QueryParams::new().with("filter", json!({"age": 3}));
        assert_eq!(encode_query(&query), "filter=%7B%22age%22%3A3%7D");
    }

    #[test]
    fn test_append_query() {
        let query = QueryParams::new().with("page", 2);
        assert_eq!(append_query("/users", Some(&query)), "/users?page=2");
        assert_eq!(append_query("/users?x=1", Some(&query)), "/users?x=1&page=2");
        assert_eq!(append_query("/users", None), "/users");
        assert_eq!(append_query("/users", Some(&QueryParams::new())), "/users");
    }
}
