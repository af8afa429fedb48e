pub mod batch;
pub mod event_stream;
pub mod logging;
pub mod router_fetch;
pub mod server;

pub use batch::{dispatch, with_batch_endpoint, BatchConfig, BatchError};
pub use event_stream::{event_stream_response, EVENT_STREAM_CONTENT_TYPE};
pub use logging::{init_logging, init_test_logging, LogFormat};
pub use router_fetch::RouterFetch;
pub use server::{BatchServer, ServerConfig};
