//! Name sanitization shared by configuration and metric code.

/// Collapse every run of non-alphanumeric characters into a single underscore
/// and trim leading/trailing underscores.
///
/// Returns an empty string when the input holds no ASCII alphanumerics.
pub fn sanitize_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_underscore = true;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            result.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    result
}

/// Derive a display name from an endpoint URL.
///
/// The scheme is dropped before sanitizing, so `http://localhost:9600`
/// becomes `localhost_9600`.
pub fn name_from_endpoint(endpoint: &str) -> String {
    let without_scheme = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);

    sanitize_name(without_scheme)
}
