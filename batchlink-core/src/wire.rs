//! Batch wire format shared by the batch link and the server handler.
//!
//! Request: one `multipart/form-data` body. Item `i` is described by the
//! fields `i.method` (optional, defaults to GET), `i.path` (path plus query
//! string), `i.headers.<name>` for headers only that item carries and, for
//! methods that carry one, the body. A body without blobs
//! travels as one `i.body` field holding its JSON text, so numbers, booleans,
//! `null` and empty containers keep their type. A body with blobs is
//! flattened into `i.body.<field>` parts in dot/bracket notation; its text
//! leaves arrive as strings.
//!
//! Response: a JSON object keyed by item index, each value a [`BatchEntry`].
//! An index missing from the response is a dropped sub-call.

use crate::codec::form::{deep_set, flatten_payload_under, FormPart, MultipartForm, MAX_FIELD_INDEX};
use crate::codec::{method_allows_body, Headers, Payload, ResponseData};
use crate::error::LinkError;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const DEFAULT_BATCH_PATH: &str = "/batch";

/// One sub-request as the client puts it on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub method: Method,
    /// Path including the encoded query string.
    pub target: String,
    /// Headers sent for this item only, on top of the batch request's own.
    pub headers: Headers,
    pub body: Option<Payload>,
}

/// Builds the multipart body for a batch. Item `i` of the slice is sent
/// under wire index `i`.
pub fn encode_batch(items: &[BatchItem]) -> MultipartForm {
    let mut parts = Vec::new();
    for (index, item) in items.iter().enumerate() {
        parts.push(FormPart::text(format!("{}.method", index), item.method.as_str()));
        parts.push(FormPart::text(format!("{}.path", index), item.target.clone()));
        for (name, value) in item.headers.iter() {
            parts.push(FormPart::text(format!("{}.headers.{}", index, name), value));
        }
        if let Some(body) = item.body.as_ref().filter(|_| method_allows_body(&item.method)) {
            match body.to_json() {
                Some(json) => parts.push(FormPart::text(format!("{}.body", index), json.to_string())),
                None => parts.extend(flatten_payload_under(&format!("{}.body", index), body)),
            }
        }
    }
    MultipartForm::new(parts)
}

/// Sub-request reconstructed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequestItem {
    pub method: Method,
    pub path: String,
    /// Overrides the batch request's headers for this item.
    pub headers: Headers,
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct PartialItem {
    method: Option<String>,
    path: Option<String>,
    headers: Headers,
    fields: Value,
}

/// Collects form fields into batch items. Malformed field names are dropped.
#[derive(Debug, Default)]
pub struct BatchRequestDecoder {
    items: BTreeMap<usize, PartialItem>,
}

impl BatchRequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_field(&mut self, name: &str, value: String) {
        let Some((index, rest)) = name.split_once('.') else {
            warn!(field = name, "dropping batch field without an index");
            return;
        };
        let Some(index) = index.parse::<usize>().ok().filter(|i| *i <= MAX_FIELD_INDEX) else {
            warn!(field = name, "dropping batch field with an invalid index");
            return;
        };

        let item = self.items.entry(index).or_default();
        match rest {
            "method" => item.method = Some(value),
            "path" => item.path = Some(value),
            "body" => {
                // JSON text from our own encoder; anything else is a plain string.
                let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
                item.fields = json!({ "body": value });
            }
            _ => {
                if let Some(header) = rest.strip_prefix("headers.").filter(|h| !h.is_empty()) {
                    item.headers.insert(header, value);
                } else if is_body_field(rest) {
                    if let Err(err) = deep_set(&mut item.fields, rest, Value::String(value)) {
                        warn!(field = name, error = %err, "dropping batch body field");
                    }
                } else {
                    warn!(field = name, "dropping unknown batch field");
                }
            }
        }
    }

    /// Number of distinct indices seen so far, including incomplete ones.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Finishes decoding. Items without a usable path or method are dropped.
    pub fn finish(self) -> BTreeMap<usize, BatchRequestItem> {
        let mut decoded = BTreeMap::new();
        for (index, item) in self.items {
            let Some(path) = item.path.filter(|p| p.starts_with('/')) else {
                warn!(index, "dropping batch item without a valid path");
                continue;
            };
            let method = match item.method {
                None => Method::GET,
                Some(raw) => match Method::from_bytes(raw.to_ascii_uppercase().as_bytes()) {
                    Ok(method) => method,
                    Err(_) => {
                        warn!(index, method = %raw, "dropping batch item with an invalid method");
                        continue;
                    }
                },
            };
            let body = match item.fields {
                Value::Object(mut fields) => fields.remove("body"),
                _ => None,
            };
            decoded.insert(
                index,
                BatchRequestItem {
                    method,
                    path,
                    headers: item.headers,
                    body,
                },
            );
        }
        debug!(items = decoded.len(), "decoded batch request");
        decoded
    }
}

fn is_body_field(rest: &str) -> bool {
    match rest.strip_prefix("body") {
        Some("") => true,
        Some(tail) => tail.starts_with('.') || tail.starts_with('['),
        None => false,
    }
}

/// Decodes `(name, value)` form fields in one go.
pub fn decode_batch_fields<I>(fields: I) -> BTreeMap<usize, BatchRequestItem>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut decoder = BatchRequestDecoder::new();
    for (name, value) in fields {
        decoder.push_field(&name, value);
    }
    decoder.finish()
}

/// Outcome of one sub-request inside a batch response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub status: u16,
    #[serde(default)]
    pub body: Value,
}

impl BatchEntry {
    pub fn new(status: u16, data: &ResponseData) -> Self {
        BatchEntry {
            status,
            body: data.to_json(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Maps the entry back to response data: `null` is empty, a JSON string
    /// is text, anything else stays JSON.
    pub fn data(&self) -> ResponseData {
        match &self.body {
            Value::Null => ResponseData::Empty,
            Value::String(text) => ResponseData::Text(text.clone()),
            other => ResponseData::Json(other.clone()),
        }
    }
}

/// Parses a batch response body. Entries with a non-numeric key or an
/// unexpected shape are dropped.
pub fn decode_batch_response(body: &[u8]) -> Result<BTreeMap<usize, BatchEntry>, LinkError> {
    let value: Value = serde_json::from_slice(body)?;
    let Value::Object(entries) = value else {
        return Err(LinkError::protocol("batch response is not a JSON object"));
    };
    Ok(decode_entries(entries))
}

fn decode_entries(entries: Map<String, Value>) -> BTreeMap<usize, BatchEntry> {
    let mut decoded = BTreeMap::new();
    for (key, value) in entries {
        let Ok(index) = key.parse::<usize>() else {
            warn!(key = %key, "dropping batch result with a malformed key");
            continue;
        };
        match serde_json::from_value::<BatchEntry>(value) {
            Ok(entry) => {
                decoded.insert(index, entry);
            }
            Err(err) => warn!(index, error = %err, "dropping malformed batch result"),
        }
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Blob, FormValue};

    fn text_fields(form: &MultipartForm) -> Vec<(String, String)> {
        form.parts()
            .iter()
            .filter_map(|part| match &part.value {
                FormValue::Text(text) => Some((part.name.clone(), text.clone())),
                FormValue::File(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_three_gets_encode_to_indexed_fields() {
        let items: Vec<BatchItem> = ["/a", "/b", "/c"]
            .iter()
            .map(|path| BatchItem {
                method: Method::GET,
                target: path.to_string(),
                headers: Headers::new(),
                body: None,
            })
            .collect();
        let fields = text_fields(&encode_batch(&items));
        let rendered: Vec<String> = fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        assert_eq!(
            rendered.join(","),
            "0.method=GET,0.path=/a,1.method=GET,1.path=/b,2.method=GET,2.path=/c"
        );
    }

    #[test]
    fn test_get_body_is_never_encoded() {
        let items = vec![BatchItem {
            method: Method::GET,
            target: "/a".to_string(),
            headers: Headers::new(),
            body: Some(Payload::map().with("x", 1i64)),
        }];
        let fields = text_fields(&encode_batch(&items));
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn test_encoded_batch_decodes_back() {
        let items = vec![
            BatchItem {
                method: Method::POST,
                target: "/users?notify=true".to_string(),
                headers: Headers::new(),
                body: Some(Payload::from(json!({"name": "ada", "roles": ["admin", "dev"]}))),
            },
            BatchItem {
                method: Method::PUT,
                target: "/notes/1".to_string(),
                headers: Headers::new(),
                body: Some(Payload::from("plain")),
            },
        ];
        let decoded = decode_batch_fields(text_fields(&encode_batch(&items)));
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[&0].method, Method::POST);
        assert_eq!(decoded[&0].path, "/users?notify=true");
        assert_eq!(decoded[&0].body, Some(json!({"name": "ada", "roles": ["admin", "dev"]})));
        assert_eq!(decoded[&1].body, Some(json!("plain")));
    }

    #[test]
    fn test_body_leaf_types_survive_the_wire() {
        let body = json!({"count": 3, "active": true, "ratio": 0.5, "note": null, "tags": [], "meta": {}});
        let items = vec![
            BatchItem {
                method: Method::POST,
                target: "/counter".to_string(),
                headers: Headers::new(),
                body: Some(Payload::from(body.clone())),
            },
            BatchItem {
                method: Method::POST,
                target: "/empty".to_string(),
                headers: Headers::new(),
                body: Some(Payload::from(json!({}))),
            },
            BatchItem {
                method: Method::PUT,
                target: "/numbers/1".to_string(),
                headers: Headers::new(),
                body: Some(Payload::from("42")),
            },
        ];
        let fields = text_fields(&encode_batch(&items));
        assert!(fields.contains(&("0.body".to_string(), body.to_string())));

        let decoded = decode_batch_fields(fields);
        assert_eq!(decoded[&0].body, Some(body));
        assert_eq!(decoded[&1].body, Some(json!({})));
        // A string that looks like a number stays a string.
        assert_eq!(decoded[&2].body, Some(json!("42")));
    }

    #[test]
    fn test_plain_body_field_falls_back_to_text() {
        let decoded = decode_batch_fields(vec![
            ("0.path".to_string(), "/notes".to_string()),
            ("0.method".to_string(), "POST".to_string()),
            ("0.body".to_string(), "not json".to_string()),
        ]);
        assert_eq!(decoded[&0].body, Some(json!("not json")));
    }

    #[test]
    fn test_blob_bodies_are_flattened() {
        let items = vec![BatchItem {
            method: Method::POST,
            target: "/upload".to_string(),
            headers: Headers::new(),
            body: Some(Payload::map().with("name", "ada").with("file", Blob::new(vec![1u8, 2]))),
        }];
        let form = encode_batch(&items);
        let names: Vec<&str> = form.parts().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["0.method", "0.path", "0.body.name", "0.body.file"]);
    }

    #[test]
    fn test_malformed_fields_are_dropped() {
        let decoded = decode_batch_fields(vec![
            ("0.path".to_string(), "/ok".to_string()),
            ("nonsense".to_string(), "x".to_string()),
            ("x.path".to_string(), "/bad-index".to_string()),
            ("1.path".to_string(), "no-slash".to_string()),
            ("2.method".to_string(), "POST".to_string()),
            ("3.path".to_string(), "/three".to_string()),
            ("3.method".to_string(), "NOT A METHOD".to_string()),
            ("4.path".to_string(), "/four".to_string()),
            ("4.bodyx".to_string(), "ignored".to_string()),
            ("4.body.a[".to_string(), "ignored".to_string()),
        ]);
        assert_eq!(decoded.keys().copied().collect::<Vec<_>>(), vec![0, 4]);
        assert_eq!(decoded[&0].method, Method::GET);
        assert_eq!(decoded[&4].body, None);
    }

    #[test]
    fn test_response_decoding_drops_bad_entries() {
        let body = br#"{"0":{"status":200,"body":{"id":1}},"1":{"status":404},"x":{"status":200},"2":"oops"}"#;
        let entries = decode_batch_response(body).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[&0].data(), ResponseData::Json(json!({"id": 1})));
        assert!(!entries[&1].is_success());
        assert_eq!(entries[&1].data(), ResponseData::Empty);

        assert!(matches!(decode_batch_response(b"[1,2]"), Err(LinkError::Protocol(_))));
        assert!(matches!(decode_batch_response(b"not json"), Err(LinkError::Decode(_))));
    }
}
