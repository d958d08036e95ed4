use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Canonical text rendering of a boolean in destination text columns.
pub fn render_bool(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Parses the textual booleans sources emit (`true`/`false`, `t`/`f`, `1`/`0`).
pub fn parse_bool(s: &str) -> EtlResult<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Ok(true),
        "false" | "f" | "0" => Ok(false),
        _ => {
            bail!(
                ErrorKind::ConversionError,
                "Invalid boolean value",
                format!("Boolean value must be 'true' or 'false' (received: {s})")
            );
        }
    }
}
