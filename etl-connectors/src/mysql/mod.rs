mod connector;
mod schema;
mod source;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use connector::MySqlConnector;
pub use source::MySqlSource;
