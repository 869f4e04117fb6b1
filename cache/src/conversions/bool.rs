use crate::bail;
use crate::error::{EngineResult, ErrorKind};

/// Parses the text rendering of a boolean.
///
/// Sources disagree on the spelling, so `t`/`f`, `true`/`false`, `y`/`n`, `yes`/`no` and `1`/`0`
/// are accepted in any case.
pub fn parse_bool(s: &str) -> EngineResult<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "1" => Ok(true),
        "f" | "false" | "n" | "no" | "0" => Ok(false),
        _ => bail!(
            ErrorKind::InvalidData,
            "Invalid boolean value",
            format!("Boolean value must be true or false (received: {s})")
        ),
    }
}
