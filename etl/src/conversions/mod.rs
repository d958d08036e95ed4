//! Value conversions between source encodings and [`crate::types::Cell`]s.

pub mod bool;
pub mod json;
pub mod timestamp;
