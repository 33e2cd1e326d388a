/// Parse a flag value such as "1", "Yes" or "off".
///
/// Matching ignores case and surrounding whitespace. Returns `None` for
/// values that are not recognized.
pub fn parse_flag(value: &str) -> Option<bool> {
    let value = value.trim();
    let matches = |names: &[&str]| names.iter().any(|n| value.eq_ignore_ascii_case(n));
    if matches(&["1", "true", "t", "yes", "y", "on"]) {
        Some(true)
    } else if matches(&["0", "false", "f", "no", "n", "off", ""]) {
        Some(false)
    } else {
        None
    }
}

/// Read a boolean option from the environment variable `name`.
///
/// Returns `default` if the variable is unset or its value is not a
/// recognized flag.
pub fn env_flag(name: &str, default: bool) -> bool {
    let Ok(value) = std::env::var(name) else {
        return default;
    };
    parse_flag(&value).unwrap_or_else(|| {
        tracing::warn!(var = name, value = %value, default, "ignoring unrecognized flag value");
        default
    })
}
