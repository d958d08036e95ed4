pub mod client;
mod connector;
mod destination;
mod encoding;
mod metrics;
mod schema;
mod source;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use client::ClickHouseClient;
pub use connector::ClickHouseConnector;
pub use destination::ClickHouseDestination;
pub use source::ClickHouseSource;
