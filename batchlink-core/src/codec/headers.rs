use super::RequestInit;
use http::{HeaderMap, HeaderName, HeaderValue};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Header map keyed case-insensitively. Names are stored lowercased and keep
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(IndexMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.as_ref().to_ascii_lowercase(), value.into())
    }

    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.shift_remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Copies every entry of `other` over this map; `other` wins on conflict.
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries that are not valid HTTP headers are skipped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.len());
        for (name, value) in self.iter() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.append(name, value);
                }
                _ => tracing::warn!(header = name, "skipping invalid header"),
            }
        }
        map
    }
}

/// Repeated headers are joined into one comma-separated value. Values that
/// are not visible ASCII are skipped.
impl From<&HeaderMap> for Headers {
    fn from(map: &HeaderMap) -> Self {
        let mut headers = Headers::new();
        for name in map.keys() {
            let values: Vec<&str> = map.get_all(name).iter().filter_map(|v| v.to_str().ok()).collect();
            if !values.is_empty() {
                headers.insert(name.as_str(), values.join(", "));
            }
        }
        headers
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

pub type DynamicHeaders = Arc<dyn Fn(&str, &RequestInit) -> Headers + Send + Sync>;

/// Where request headers come from.
#[derive(Clone)]
pub enum HeaderSource {
    Static(Headers),
    List(Vec<HeaderSource>),
    /// Computed from the request path and the request being built.
    Dynamic(DynamicHeaders),
}

impl HeaderSource {
    pub fn dynamic(f: impl Fn(&str, &RequestInit) -> Headers + Send + Sync + 'static) -> Self {
        HeaderSource::Dynamic(Arc::new(f))
    }
}

impl Default for HeaderSource {
    fn default() -> Self {
        HeaderSource::Static(Headers::new())
    }
}

impl From<Headers> for HeaderSource {
    fn from(headers: Headers) -> Self {
        HeaderSource::Static(headers)
    }
}

impl fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderSource::Static(headers) => f.debug_tuple("Static").field(headers).finish(),
            HeaderSource::List(list) => f.debug_tuple("List").field(list).finish(),
            HeaderSource::Dynamic(_) => f.write_str("Dynamic(<fn>)"),
        }
    }
}

/// Resolves `source` and merges the result over `base`. List entries are
/// applied in order, so later sources override earlier ones.
pub fn merge_headers(base: &Headers, source: &HeaderSource, path: &str, init: &RequestInit) -> Headers {
    let mut merged = base.clone();
    apply(&mut merged, source, path, init);
    merged
}

fn apply(target: &mut Headers, source: &HeaderSource, path: &str, init: &RequestInit) {
    match source {
        HeaderSource::Static(headers) => target.merge(headers),
        HeaderSource::List(list) => {
            for source in list {
                apply(target, source, path, init);
            }
        }
        HeaderSource::Dynamic(f) => target.merge(&f(path, init)),
    }
}
