use crate::error::LinkError;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    Empty,
    Json(Value),
    Text(String),
    Binary(Bytes),
    Date(DateTime<FixedOffset>),
}

impl ResponseData {
    /// JSON representation used when a result has to be re-serialized, e.g.
    /// inside a batch response. Binary data becomes a base64 string.
    pub fn to_json(&self) -> Value {
        match self {
            ResponseData::Empty => Value::Null,
            ResponseData::Json(value) => value.clone(),
            ResponseData::Text(text) => Value::String(text.clone()),
            ResponseData::Binary(bytes) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            ResponseData::Date(date) => Value::String(date.to_rfc3339()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseData::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseData::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Decodes a body according to its declared content type. Without a content
/// type the text heuristics of [`infer_text`] apply.
pub fn decode_response(content_type: Option<&str>, body: &[u8]) -> Result<ResponseData, LinkError> {
    if body.is_empty() {
        return Ok(ResponseData::Empty);
    }

    let Some(content_type) = content_type else {
        return Ok(match std::str::from_utf8(body) {
            Ok(text) => infer_text(text),
            Err(_) => ResponseData::Binary(Bytes::copy_from_slice(body)),
        });
    };

    let parsed: mime::Mime = match content_type.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            tracing::debug!(content_type, "unparseable content type, treating body as binary");
            return Ok(ResponseData::Binary(Bytes::copy_from_slice(body)));
        }
    };

    let is_json = parsed.subtype() == mime::JSON || parsed.suffix() == Some(mime::JSON);
    if is_json {
        let value: Value = serde_json::from_slice(body)?;
        return Ok(ResponseData::Json(value));
    }

    if parsed.type_() == mime::TEXT {
        let text = std::str::from_utf8(body)
            .map_err(|e| LinkError::decode(format!("invalid UTF-8 in text body: {}", e)))?;
        return Ok(ResponseData::Text(text.to_string()));
    }

    Ok(ResponseData::Binary(Bytes::copy_from_slice(body)))
}

/// Heuristic chain for untyped text: number, boolean, date, then text.
pub fn infer_text(text: &str) -> ResponseData {
    let trimmed = text.trim();
    if let Some(number) = parse_number(trimmed) {
        return ResponseData::Json(Value::Number(number));
    }
    match trimmed {
        "true" => return ResponseData::Json(Value::Bool(true)),
        "false" => return ResponseData::Json(Value::Bool(false)),
        _ => {}
    }
    if let Some(date) = parse_date(trimmed) {
        return ResponseData::Date(date);
    }
    ResponseData::Text(text.to_string())
}

fn parse_number(s: &str) -> Option<Number> {
    if s.is_empty()
        || !s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        || !s.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(n.into());
    }
    if let Ok(n) = s.parse::<u64>() {
        return Some(n.into());
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%b %d %Y", "%B %d, %Y", "%d %b %Y"];

/// ISO-8601, RFC-1123 and a few short date forms. Dates without an offset
/// are taken as UTC.
pub fn parse_date(s: &str) -> Option<DateTime<FixedOffset>> {
    let utc = FixedOffset::east_opt(0)?;
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date);
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(s) {
        return Some(date);
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc().with_timezone(&utc));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc().with_timezone(&utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    #[test]
    fn test_declared_json() {
        let data = decode_response(Some("application/json; charset=utf-8"), br#"{"id":1}"#).unwrap();
        assert_eq!(data, ResponseData::Json(json!({"id": 1})));

        let data = decode_response(Some("application/problem+json"), br#"{"title":"x"}"#).unwrap();
        assert_eq!(data.as_json(), Some(&json!({"title": "x"})));
    }

    #[test]
    fn test_declared_json_that_does_not_parse() {
        let err = decode_response(Some("application/json"), b"{oops").unwrap_err();
        assert!(matches!(err, LinkError::Decode(_)));
    }

    #[test]
    fn test_declared_text_skips_heuristics() {
        let data = decode_response(Some("text/plain"), b"42").unwrap();
        assert_eq!(data, ResponseData::Text("42".to_string()));
    }

    #[test]
    fn test_declared_binary() {
        let data = decode_response(Some("application/octet-stream"), &[0, 159, 146]).unwrap();
        assert_eq!(data, ResponseData::Binary(Bytes::from_static(&[0, 159, 146])));
        assert_eq!(data.to_json(), json!("AJ+S"));
    }

    #[test]
    fn test_heuristics_without_content_type() {
        assert_eq!(decode_response(None, b"42").unwrap(), ResponseData::Json(json!(42)));
        assert_eq!(decode_response(None, b"-1.5").unwrap(), ResponseData::Json(json!(-1.5)));
        assert_eq!(decode_response(None, b"true").unwrap(), ResponseData::Json(json!(true)));
        assert_eq!(decode_response(None, b"false").unwrap(), ResponseData::Json(json!(false)));
        assert_eq!(decode_response(None, b"hello").unwrap(), ResponseData::Text("hello".to_string()));
        assert_eq!(decode_response(None, b"inf").unwrap(), ResponseData::Text("inf".to_string()));
        assert_eq!(decode_response(None, b"").unwrap(), ResponseData::Empty);
    }

    #[test]
    fn test_date_heuristics() {
        let iso = parse_date("2024-03-01T10:20:30Z").unwrap();
        assert_eq!((iso.year(), iso.month(), iso.day(), iso.hour()), (2024, 3, 1, 10));

        let rfc1123 = parse_date("Tue, 15 Nov 1994 08:12:31 GMT").unwrap();
        assert_eq!((rfc1123.year(), rfc1123.minute()), (1994, 12));

        let short = parse_date("12/25/2023").unwrap();
        assert_eq!((short.month(), short.day()), (12, 25));

        assert_eq!(parse_date("2024-02-29").map(|d| d.day()), Some(29));
        assert!(parse_date("not a date").is_none());

        assert!(matches!(
            decode_response(None, b"2024-03-01T10:20:30+02:00").unwrap(),
            ResponseData::Date(_)
        ));
    }
}
