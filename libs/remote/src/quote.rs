//! Shell quoting for interpolated arguments.

/// Quotes `value` for a POSIX shell.
///
/// Values made only of safe characters are returned as-is; everything else is
/// wrapped in single quotes with embedded quotes escaped as `'\''`.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty() && value.chars().all(is_safe_char);
    if safe {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',')
}
