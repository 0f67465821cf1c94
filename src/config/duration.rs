//! Parsing of duration strings such as `"500ms"`, `"10s"` or `"1m30s"`

use crate::error::ConfigError;
use std::time::Duration;

/// Parse a duration made of one or more `<number><unit>` groups
///
/// Supported units: `ms`, `s`, `m`, `h`. Fractional numbers are allowed
/// (`"1.5s"`). A bare `"0"` parses to zero.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(ConfigError::ValidationError(
            "empty duration string".to_string(),
        ));
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = || ConfigError::ValidationError(format!("invalid duration {:?}", input));

    let mut total = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total += value * seconds_per_unit;
    }

    Duration::try_from_secs_f64(total).map_err(|_| invalid())
}
