use std::fmt;

/// The last position already applied to a destination table.
///
/// Read once at the start of processing an object and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Watermark {
    /// The destination table is missing, empty, or could not be queried.
    Absent,
    /// An integer position: a sequence value or an epoch in nanoseconds.
    NumericEpoch(i64),
    /// A naive timestamp rendered as `YYYY-MM-DD HH:MM:SS[.fraction]`.
    TimestampLiteral(String),
}

impl Watermark {
    pub fn is_absent(&self) -> bool {
        matches!(self, Watermark::Absent)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Absent => f.write_str("absent"),
            Watermark::NumericEpoch(value) => write!(f, "{value}"),
            Watermark::TimestampLiteral(value) => f.write_str(value),
        }
    }
}
