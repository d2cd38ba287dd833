//! Command classifier — spec §3, §4.4.
//!
//! Turns a request path into a stable "command" string by stripping the
//! leading slash and dropping any path segment that parses whole as a
//! base-10 integer. `/api/v2/orders/4711/items` → `api/v2/orders/items`.

/// Classify a request path into a command, or `None` for "no command"
/// (empty after stripping, or `favicon.ico`).
pub fn classify(path: &str) -> Option<String> {
    let command: String = path
        .trim_start_matches('/')
        .split('/')
        .filter(|segment| segment.parse::<i64>().is_err())
        .collect::<Vec<_>>()
        .join("/");

    if command.is_empty() || command == "favicon.ico" {
        None
    } else {
        Some(command)
    }
}

/// Storage-safe form of a command: every non-alphanumeric byte becomes `_`.
pub fn command_key(command: &str) -> String {
    command
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_integer_segments() {
        assert_eq!(
            classify("/api/v2/orders/4711/items").as_deref(),
            Some("api/v2/orders/items")
        );
    }

    #[test]
    fn strips_multiple_integer_segments() {
        assert_eq!(
            classify("/api/orders/4711/items/42").as_deref(),
            Some("api/orders/items")
        );
    }

    #[test]
    fn empty_path_has_no_command() {
        assert_eq!(classify("/"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn favicon_has_no_command() {
        assert_eq!(classify("/favicon.ico"), None);
    }

    #[test]
    fn leaves_non_numeric_segments_untouched() {
        assert_eq!(classify("/api/orders/items").as_deref(), Some("api/orders/items"));
    }

    #[test]
    fn command_key_replaces_non_alphanumerics() {
        assert_eq!(command_key("api/orders/items"), "api_orders_items");
        assert_eq!(command_key("api-v2.orders"), "api_v2_orders");
    }

    #[test]
    fn command_key_is_idempotent() {
        let once = command_key("api/orders/items");
        let twice = command_key(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn classify_is_stable_under_reclassification() {
        // A command with no remaining integer segments reclassifies to itself.
        let cmd = classify("/api/orders/4711/items").unwrap();
        let reclassified = classify(&format!("/{cmd}")).unwrap();
        assert_eq!(cmd, reclassified);
    }
}
