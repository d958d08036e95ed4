mod client;
mod connector;
mod source;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use client::OpenSearchClient;
pub use connector::OpenSearchConnector;
pub use source::OpenSearchSource;
