//! Driver-backed sources and destinations for the sync engine.
//!
//! Each connector lives behind a cargo feature so that binaries only link the drivers they use.

#[cfg(feature = "clickhouse")]
pub mod clickhouse;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "opensearch")]
pub mod opensearch;
