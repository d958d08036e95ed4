use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// An object refers to a source that is not configured.
    #[error("object `{object}` refers to unknown source `{source_name}`")]
    UnknownSource { object: String, source_name: String },
    /// Two objects write to the same destination table while objects run concurrently.
    #[error(
        "objects `{first}` and `{second}` share destination table `{destination}`, which is not allowed when `max_concurrent_objects` is greater than 1"
    )]
    SharedDestination {
        destination: String,
        first: String,
        second: String,
    },
}
