//! Space-delimited scope helpers.

/// Returns `true` if `scope` contains `name` as a whole token.
#[must_use]
pub fn has_scope(scope: &str, name: &str) -> bool {
    scope.split_whitespace().any(|s| s == name)
}

/// Returns `true` if every token in `requested` appears in `granted`.
#[must_use]
pub fn is_subset(requested: &str, granted: &str) -> bool {
    requested
        .split_whitespace()
        .all(|s| has_scope(granted, s))
}

/// Collapses whitespace and removes duplicate tokens, keeping first order.
#[must_use]
pub fn normalize(scope: &str) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for token in scope.split_whitespace() {
        if !seen.contains(&token) {
            seen.push(token);
        }
    }
    seen.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_scope() {
        assert!(has_scope("openid profile", "openid"));
        assert!(has_scope("  openid   profile ", "profile"));
        assert!(!has_scope("openid profile", "open"));
        assert!(!has_scope("", "openid"));
    }

    #[test]
    fn test_is_subset() {
        assert!(is_subset("openid", "openid profile"));
        assert!(is_subset("", "openid"));
        assert!(!is_subset("openid email", "openid profile"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(" openid  profile openid "), "openid profile");
        assert_eq!(normalize(""), "");
    }
}
