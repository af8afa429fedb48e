use super::form::{flatten_payload, MultipartForm};
use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::{Number, Value};

/// Binary or file-like leaf value. Any payload containing one is sent as
/// multipart.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl Blob {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Blob {
            file_name: None,
            content_type: None,
            data: data.into(),
        }
    }

    pub fn file(file_name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Blob {
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
            data: data.into(),
        }
    }
}

/// Structured request body. Mirrors JSON with an extra [`Blob`] leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<Payload>),
    Map(IndexMap<String, Payload>),
    Blob(Blob),
}

impl Payload {
    pub fn map() -> Self {
        Payload::Map(IndexMap::new())
    }

    /// Inserts into a map payload; any other variant is left unchanged.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Payload>) -> Self {
        if let Payload::Map(entries) = &mut self {
            entries.insert(key.into(), value.into());
        }
        self
    }

    pub fn contains_blob(&self) -> bool {
        match self {
            Payload::Blob(_) => true,
            Payload::List(items) => items.iter().any(Payload::contains_blob),
            Payload::Map(entries) => entries.values().any(Payload::contains_blob),
            _ => false,
        }
    }

    /// JSON view of the payload. `None` when a blob is present.
    pub fn to_json(&self) -> Option<Value> {
        Some(match self {
            Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Number(n) => Value::Number(n.clone()),
            Payload::String(s) => Value::String(s.clone()),
            Payload::List(items) => Value::Array(items.iter().map(Payload::to_json).collect::<Option<_>>()?),
            Payload::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                    .collect::<Option<_>>()?,
            ),
            Payload::Blob(_) => return None,
        })
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => Payload::Number(n),
            Value::String(s) => Payload::String(s),
            Value::Array(items) => Payload::List(items.into_iter().map(Payload::from).collect()),
            Value::Object(entries) => {
                Payload::Map(entries.into_iter().map(|(k, v)| (k, Payload::from(v))).collect())
            }
        }
    }
}

impl From<Blob> for Payload {
    fn from(blob: Blob) -> Self {
        Payload::Blob(blob)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::String(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::String(s)
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Number(n.into())
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

/// A body ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedBody {
    Json(Bytes),
    Text(String),
    Multipart(MultipartForm),
}

impl EncodedBody {
    pub fn content_type(&self) -> String {
        match self {
            EncodedBody::Json(_) => mime::APPLICATION_JSON.to_string(),
            EncodedBody::Text(_) => mime::TEXT_PLAIN_UTF_8.to_string(),
            EncodedBody::Multipart(form) => form.content_type(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            EncodedBody::Json(bytes) => bytes.clone(),
            EncodedBody::Text(text) => Bytes::from(text.clone()),
            EncodedBody::Multipart(form) => form.to_bytes(),
        }
    }
}

/// Picks the wire encoding from the payload's shape: multipart when any leaf
/// is a blob, JSON for maps, lists and null, plain text for scalars.
pub fn encode_body(payload: &Payload) -> EncodedBody {
    if payload.contains_blob() {
        return EncodedBody::Multipart(MultipartForm::new(flatten_payload(payload)));
    }
    match payload {
        Payload::String(s) => EncodedBody::Text(s.clone()),
        Payload::Bool(b) => EncodedBody::Text(b.to_string()),
        Payload::Number(n) => EncodedBody::Text(n.to_string()),
        structured => {
            let json = structured.to_json().unwrap_or(Value::Null);
            EncodedBody::Json(Bytes::from(json.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_objects_are_json() {
        let payload = Payload::from(json!({"name": "ada", "tags": [1, 2]}));
        let body = encode_body(&payload);
        assert_eq!(body.content_type(), "application/json");
        let decoded: Value = serde_json::from_slice(&body.to_bytes()).unwrap();
        assert_eq!(decoded, json!({"name": "ada", "tags": [1, 2]}));
    }

    #[test]
    fn test_scalars_are_text() {
        assert_eq!(encode_body(&Payload::from("hello")), EncodedBody::Text("hello".to_string()));
        assert_eq!(encode_body(&Payload::from(42i64)), EncodedBody::Text("42".to_string()));
        assert!(encode_body(&Payload::from("x")).content_type().starts_with("text/plain"));
    }

    #[test]
    fn test_nested_blob_selects_multipart() {
        let payload = Payload::map()
            .with("name", "ada")
            .with("profile", Payload::map().with("avatar", Blob::file("a.png", "image/png", vec![1u8, 2, 3])));
        assert!(payload.contains_blob());
        assert!(payload.to_json().is_none());

        match encode_body(&payload) {
            EncodedBody::Multipart(form) => {
                let names: Vec<&str> = form.parts().iter().map(|p| p.name.as_str()).collect();
                assert_eq!(names, vec!["name", "profile.avatar"]);
                assert!(form.content_type().starts_with("multipart/form-data; boundary="));
            }
            other => panic!("expected multipart, got {:?}", other),
        }
    }
}
