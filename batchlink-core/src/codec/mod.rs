//! Header, query, body and response resolution shared by every transport
//! strategy. Everything here is synchronous and side-effect free.

pub mod body;
pub mod form;
pub mod headers;
pub mod query;
pub mod response;

pub use body::{encode_body, Blob, EncodedBody, Payload};
pub use form::{deep_set, flatten_payload, flatten_payload_under, FieldPathError, FormPart, FormValue, MultipartForm};
pub use headers::{merge_headers, HeaderSource, Headers};
pub use query::{append_query, encode_query, QueryParams};
pub use response::{decode_response, infer_text, parse_date, ResponseData};

use http::Method;

/// A request as it is being assembled, before it is handed to a transport.
/// Request hooks receive and may modify it.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestInit {
    pub method: Method,
    pub headers: Headers,
    pub body: Option<EncodedBody>,
}

impl RequestInit {
    pub fn new(method: Method) -> Self {
        RequestInit {
            method,
            headers: Headers::new(),
            body: None,
        }
    }

    /// GET and HEAD never carry a body.
    pub fn strip_body_if_bodiless(&mut self) {
        if !method_allows_body(&self.method) && self.body.take().is_some() {
            tracing::debug!(method = %self.method, "dropping body from bodiless request");
            self.headers.remove("content-type");
        }
    }
}

pub fn method_allows_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_body_for_get_and_head() {
        for method in [Method::GET, Method::HEAD] {
            let mut init = RequestInit::new(method);
            init.body = Some(EncodedBody::Text("x".to_string()));
            init.headers.insert("Content-Type", "text/plain");
            init.strip_body_if_bodiless();
            assert!(init.body.is_none());
            assert!(!init.headers.contains("content-type"));
        }

        let mut init = RequestInit::new(Method::POST);
        init.body = Some(EncodedBody::Text("x".to_string()));
        init.strip_body_if_bodiless();
        assert!(init.body.is_some());
    }
}
