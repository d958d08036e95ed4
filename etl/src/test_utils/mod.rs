//! Testing utilities for sync pipelines.
//!
//! [`faulty_source::FaultySource`] and [`test_destination_wrapper::TestDestinationWrapper`] wrap
//! any source or destination, record the calls flowing through them and inject failures, so
//! that retry, degradation and race handling can be exercised against the in-memory
//! implementations.

pub mod faulty_source;
pub mod records;
pub mod test_destination_wrapper;
