//! Account-link persistence + HTTP fetch utilities for starbot.

mod http;
mod links;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchedResponse, HttpClientConfig,
    HttpError, HttpFetcher, RetryDisposition,
};
#[cfg(any(test, feature = "testing"))]
pub use links::MemoryLinkStore;
pub use links::{LinkConstraint, LinkError, LinkStore, PgLinkStore};

pub const CRATE_NAME: &str = "starbot-storage";
