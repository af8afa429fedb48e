pub mod client;
pub mod handle;
pub mod links;
pub mod path;
pub mod reactive;
pub mod resolve;

pub use client::{Client, ClientConfig};
pub use handle::{CallHandle, CallOutcome, SubscriptionCallbacks, SubscriptionHandle};
pub use links::{BatchLinkOptions, HttpBatchLink, HttpLink, LoggerLink, SplitLink};
pub use path::PathBuilder;
pub use reactive::MaybeReactive;
pub use resolve::{RequestHook, RequestResolver, ResponseHook};
