//! Shared configuration types for sync runs.

mod base;
mod connection;
mod extraction;
mod object;
mod pipeline;
mod sync;

pub use base::ValidationError;
pub use connection::{
    ClickHouseConnectionConfig, DestinationConfig, MySqlConnectionConfig,
    OpenSearchConnectionConfig, SourceConfig,
};
pub use extraction::ExtractionConfig;
pub use object::{ObjectConfig, ObjectKind, OrderingColumnConfig, OrderingType};
pub use pipeline::PipelineConfig;
pub use sync::SyncConfig;
