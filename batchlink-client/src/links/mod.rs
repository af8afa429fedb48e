//! Links shipped with the client. [`HttpLink`] and [`HttpBatchLink`] are
//! terminal; [`SplitLink`] and [`LoggerLink`] sit in front of them.

pub mod batch;
pub mod http;
pub mod logger;
pub mod split;

pub use batch::{BatchLinkOptions, HttpBatchLink, OperationLoader};
pub use http::HttpLink;
pub use logger::LoggerLink;
pub use split::{is_batchable, SplitLink};
