//! Multipart form encoding plus the flatten / deep-set pair used to carry
//! nested payloads through flat form field names (`a.b`, `list[0]`).

use super::body::{Blob, Payload};
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};
use thiserror::Error;

/// Upper bound on a bracket index accepted by [`deep_set`].
pub const MAX_FIELD_INDEX: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File(Blob),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub value: FormValue,
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        FormPart {
            name: name.into(),
            value: FormValue::Text(value.into()),
        }
    }

    pub fn file(name: impl Into<String>, blob: Blob) -> Self {
        FormPart {
            name: name.into(),
            value: FormValue::File(blob),
        }
    }
}

/// `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<FormPart>,
}

impl MultipartForm {
    pub fn new(parts: Vec<FormPart>) -> Self {
        Self::with_boundary(format!("batchlink-{}", uuid::Uuid::new_v4().simple()), parts)
    }

    pub fn with_boundary(boundary: impl Into<String>, parts: Vec<FormPart>) -> Self {
        MultipartForm {
            boundary: boundary.into(),
            parts,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub fn push(&mut self, part: FormPart) {
        self.parts.push(part);
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for part in &self.parts {
            buf.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
            let name = escape_quoted(&part.name);
            match &part.value {
                FormValue::Text(text) => {
                    buf.put_slice(format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes());
                    buf.put_slice(text.as_bytes());
                }
                FormValue::File(blob) => {
                    let file_name = escape_quoted(blob.file_name.as_deref().unwrap_or("blob"));
                    buf.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            name, file_name
                        )
                        .as_bytes(),
                    );
                    let content_type = blob
                        .content_type
                        .as_deref()
                        .unwrap_or("application/octet-stream");
                    buf.put_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
                    buf.put_slice(&blob.data);
                }
            }
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        buf.freeze()
    }
}

fn escape_quoted(s: &str) -> String {
    s.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}

/// Flattens a payload into form parts with dot/bracket field names.
/// `null` leaves are omitted.
pub fn flatten_payload(payload: &Payload) -> Vec<FormPart> {
    let mut parts = Vec::new();
    flatten_into(&mut parts, "", payload);
    parts
}

/// Same as [`flatten_payload`] with every name placed under `prefix`.
pub fn flatten_payload_under(prefix: &str, payload: &Payload) -> Vec<FormPart> {
    let mut parts = Vec::new();
    flatten_into(&mut parts, prefix, payload);
    parts
}

fn flatten_into(parts: &mut Vec<FormPart>, prefix: &str, payload: &Payload) {
    match payload {
        Payload::Map(entries) => {
            for (key, value) in entries {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(parts, &name, value);
            }
        }
        Payload::List(items) => {
            for (index, value) in items.iter().enumerate() {
                let name = if prefix.is_empty() {
                    index.to_string()
                } else {
                    format!("{}[{}]", prefix, index)
                };
                flatten_into(parts, &name, value);
            }
        }
        Payload::Null => {}
        Payload::Bool(b) => parts.push(FormPart::text(leaf_name(prefix), b.to_string())),
        Payload::Number(n) => parts.push(FormPart::text(leaf_name(prefix), n.to_string())),
        Payload::String(s) => parts.push(FormPart::text(leaf_name(prefix), s.clone())),
        Payload::Blob(blob) => parts.push(FormPart::file(leaf_name(prefix), blob.clone())),
    }
}

fn leaf_name(prefix: &str) -> String {
    if prefix.is_empty() {
        "value".to_string()
    } else {
        prefix.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed field path: {0}")]
pub struct FieldPathError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Splits `a.b[0].c` into `[Key(a), Key(b), Index(0), Key(c)]`.
pub fn parse_field_path(path: &str) -> Result<Vec<PathSegment>, FieldPathError> {
    let malformed = || FieldPathError(path.to_string());
    let mut segments = Vec::new();
    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(pos) => part.split_at(pos),
            None => (part, ""),
        };
        if key.is_empty() {
            return Err(malformed());
        }
        segments.push(PathSegment::Key(key.to_string()));
        while !rest.is_empty() {
            let inner = rest.strip_prefix('[').ok_or_else(malformed)?;
            let end = inner.find(']').ok_or_else(malformed)?;
            let index: usize = inner[..end].parse().map_err(|_| malformed())?;
            if index > MAX_FIELD_INDEX {
                return Err(malformed());
            }
            segments.push(PathSegment::Index(index));
            rest = &inner[end + 1..];
        }
    }
    Ok(segments)
}

/// Writes `value` into `target` at `path`, creating intermediate objects and
/// arrays. Existing values of the wrong shape are replaced.
pub fn deep_set(target: &mut Value, path: &str, value: Value) -> Result<(), FieldPathError> {
    let segments = parse_field_path(path)?;
    let mut current = target;
    for segment in &segments {
        current = match segment {
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                    _ => return Err(FieldPathError(path.to_string())),
                }
            }
            PathSegment::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                match current {
                    Value::Array(items) => {
                        if items.len() <= *index {
                            items.resize(*index + 1, Value::Null);
                        }
                        &mut items[*index]
                    }
                    _ => return Err(FieldPathError(path.to_string())),
                }
            }
        };
    }
    *current = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_flatten_uses_dot_and_bracket_names() {
        let payload = Payload::from(json!({
            "user": {"name": "ada", "tags": ["x", "y"]},
            "active": true,
            "skip": null
        }));
        let names: Vec<String> = flatten_payload(&payload).into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["user.name", "user.tags[0]", "user.tags[1]", "active"]);

        let prefixed: Vec<String> = flatten_payload_under("3.body", &payload)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(prefixed[0], "3.body.user.name");
    }

    #[test]
    fn test_deep_set_reconstructs_nesting() {
        let mut target = Value::Null;
        deep_set(&mut target, "user.name", json!("ada")).unwrap();
        deep_set(&mut target, "user.tags[1]", json!("y")).unwrap();
        deep_set(&mut target, "user.tags[0]", json!("x")).unwrap();
        deep_set(&mut target, "grid[1][0]", json!(5)).unwrap();
        assert_eq!(
            target,
            json!({"user": {"name": "ada", "tags": ["x", "y"]}, "grid": [null, [5]]})
        );
    }

    #[test]
    fn test_malformed_paths_are_rejected() {
        let mut target = Value::Null;
        for path in ["", "a..b", "a[", "a[x]", "a[1]b", ".a", "a[99999999]"] {
            assert!(deep_set(&mut target, path, json!(1)).is_err(), "{path}");
        }
        assert_eq!(target, Value::Null);
    }

    #[test]
    fn test_multipart_bytes() {
        let form = MultipartForm::with_boundary(
            "XyZ",
            vec![
                FormPart::text("0.path", "/a"),
                FormPart::file("f", Blob::file("a.txt", "text/plain", &b"hi"[..])),
            ],
        );
        let text = String::from_utf8(form.to_bytes().to_vec()).unwrap();
        assert_eq!(
            text,
            "--XyZ\r\nContent-Disposition: form-data; name=\"0.path\"\r\n\r\n/a\r\n\
             --XyZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\r\nhi\r\n--XyZ--\r\n"
        );
    }

    proptest! {
        #[test]
        fn prop_flatten_then_deep_set_restores_strings(
            entries in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9 ]{0,8}", 1..6),
            nested in proptest::collection::vec("[a-z]{0,5}", 1..4),
        ) {
            let mut object = Map::new();
            for (k, v) in &entries {
                object.insert(k.clone(), Value::String(v.clone()));
            }
            object.insert("zz_list".to_string(), Value::Array(nested.iter().cloned().map(Value::String).collect()));
            let original = Value::Object(object);

            let mut rebuilt = Value::Null;
            for part in flatten_payload(&Payload::from(original.clone())) {
                if let FormValue::Text(text) = part.value {
                    deep_set(&mut rebuilt, &part.name, Value::String(text)).unwrap();
                }
            }
            prop_assert_eq!(rebuilt, original);
        }
    }
}
