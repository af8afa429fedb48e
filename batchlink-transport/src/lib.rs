pub mod event_codec;
pub mod reqwest_fetch;
pub mod transport;

pub use event_codec::{EventCodecError, EventStreamCodec};
pub use reqwest_fetch::ReqwestFetch;
pub use transport::{BodyStream, Fetch, HttpRequest, HttpResponse, SharedFetch, TransportError};
