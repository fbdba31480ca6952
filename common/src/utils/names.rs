use std::sync::OnceLock;

use regex::Regex;

fn name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[\w\-]+$").ok())
        .as_ref()
}

/// Whether `name` is usable as a configuration or service name, i.e. matches
/// `^[\w\-]+$`.
pub fn is_valid_name(name: &str) -> bool {
    name_pattern().is_some_and(|pattern| pattern.is_match(name))
}
