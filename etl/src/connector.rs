//! Acquisition of source and destination connections.
//!
//! The pipeline opens fresh connections for every object through these traits and shuts them
//! down once the object is done, whatever its outcome.

use std::future::Future;

use crate::destination::Destination;
use crate::destination::memory::MemoryDestination;
use crate::error::EtlResult;
use crate::source::Source;
use crate::source::memory::MemorySource;

/// Opens connections to a source.
pub trait SourceConnector {
    type Source: Source + Send + Sync;

    /// Opens a new connection.
    fn connect(&self) -> impl Future<Output = EtlResult<Self::Source>> + Send;
}

/// Opens connections to a destination.
pub trait DestinationConnector {
    type Destination: Destination + Send + Sync;

    /// Opens a new connection.
    fn connect(&self) -> impl Future<Output = EtlResult<Self::Destination>> + Send;
}

/// Hands out clones sharing the same in-memory objects.
impl SourceConnector for MemorySource {
    type Source = MemorySource;

    async fn connect(&self) -> EtlResult<Self::Source> {
        Ok(self.clone())
    }
}

/// Hands out clones sharing the same in-memory tables.
impl DestinationConnector for MemoryDestination {
    type Destination = MemoryDestination;

    async fn connect(&self) -> EtlResult<Self::Destination> {
        Ok(self.clone())
    }
}
