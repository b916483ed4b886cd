//! Hostname matching as used by Gateway API listeners and routes.
//!
//! A hostname is either exact (`foo.example.com`) or a wildcard whose leading
//! label is `*` (`*.example.com`). A wildcard matches any hostname with at
//! least one additional label in front of its suffix.

use std::cmp::Ordering;

pub fn is_wildcard(hostname: &str) -> bool {
    hostname.starts_with("*.")
}

/// Returns true if `pattern` matches the exact hostname `host`.
pub fn matches(pattern: &str, host: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_prefix('*') {
        Some(suffix) => host.len() > suffix.len()
            && host
                .get(host.len() - suffix.len()..)
                .map_or(false, |tail| tail.eq_ignore_ascii_case(suffix)),
        None => pattern.eq_ignore_ascii_case(host),
    }
}

/// Computes the hostname a route serves on a listener.
///
/// Returns `None` when the two do not overlap. When both are wildcards, the
/// more specific of the two is returned.
pub fn intersect(listener: Option<&str>, route: &str) -> Option<String> {
    let listener = match listener {
        None | Some("*") | Some("") => return Some(route.to_string()),
        Some(l) => l,
    };
    if route == "*" {
        return Some(listener.to_string());
    }

    match (is_wildcard(listener), is_wildcard(route)) {
        (false, false) => listener
            .eq_ignore_ascii_case(route)
            .then(|| route.to_string()),
        (false, true) => matches(route, listener).then(|| listener.to_string()),
        (true, false) => matches(listener, route).then(|| route.to_string()),
        (true, true) => {
            if listener.eq_ignore_ascii_case(route) || matches(listener, &route[2..]) {
                Some(route.to_string())
            } else if matches(route, &listener[2..]) {
                Some(listener.to_string())
            } else {
                None
            }
        }
    }
}

/// The hostnames a route serves through a listener.
///
/// A route without hostnames inherits the listener's hostname (or `*`). A
/// route whose hostnames do not overlap with the listener yields nothing.
pub fn route_hostnames(listener: Option<&str>, route: &[String]) -> Vec<String> {
    if route.is_empty() {
        return vec![listener.unwrap_or("*").to_string()];
    }
    let mut hostnames = Vec::new();
    for host in route {
        if let Some(h) = intersect(listener, host) {
            if !hostnames.contains(&h) {
                hostnames.push(h);
            }
        }
    }
    hostnames
}

/// Orders listener hostnames from most to least specific: exact hostnames
/// first, then wildcards with longer suffixes, then the catch-all.
pub fn cmp_specificity(a: Option<&str>, b: Option<&str>) -> Ordering {
    fn rank(h: Option<&str>) -> (u8, usize) {
        match h {
            None | Some("") | Some("*") => (0, 0),
            Some(h) if is_wildcard(h) => (1, h.len()),
            Some(h) => (2, h.len()),
        }
    }
    rank(b).cmp(&rank(a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matching() {
        assert!(matches("*.example.com", "foo.example.com"));
        assert!(matches("*.example.com", "foo.bar.example.com"));
        assert!(!matches("*.example.com", "example.com"));
        assert!(matches("foo.example.com", "FOO.example.com"));
        assert!(matches("*", "anything"));
    }

    #[test]
    fn wildcards_ignore_case() {
        assert!(matches("*.Example.com", "foo.example.com"));
        assert!(matches("*.example.com", "FOO.EXAMPLE.COM"));
        assert!(!matches("*.example.com", "foo.example.org"));
        assert!(!matches("*.aaa", "éaaa"));
        assert_eq!(
            intersect(Some("*.Example.com"), "foo.example.com").as_deref(),
            Some("foo.example.com")
        );
        assert_eq!(
            intersect(Some("*.example.com"), "*.EXAMPLE.com").as_deref(),
            Some("*.EXAMPLE.com")
        );
    }

    #[test]
    fn intersections() {
        assert_eq!(intersect(None, "a.com").as_deref(), Some("a.com"));
        assert_eq!(intersect(Some("a.com"), "a.com").as_deref(), Some("a.com"));
        assert_eq!(intersect(Some("a.com"), "b.com"), None);
        assert_eq!(
            intersect(Some("*.example.com"), "foo.example.com").as_deref(),
            Some("foo.example.com")
        );
        assert_eq!(
            intersect(Some("foo.example.com"), "*.example.com").as_deref(),
            Some("foo.example.com")
        );
        assert_eq!(
            intersect(Some("*.example.com"), "*.foo.example.com").as_deref(),
            Some("*.foo.example.com")
        );
        assert_eq!(
            intersect(Some("*.foo.example.com"), "*.example.com").as_deref(),
            Some("*.foo.example.com")
        );
        assert_eq!(intersect(Some("*.example.com"), "*.other.com"), None);
    }

    #[test]
    fn route_hostnames_inherit_listener() {
        assert_eq!(route_hostnames(Some("a.com"), &[]), vec!["a.com"]);
        assert_eq!(route_hostnames(None, &[]), vec!["*"]);
        assert!(route_hostnames(Some("a.com"), &["b.com".to_string()]).is_empty());
    }

    #[test]
    fn specificity_order() {
        let mut hosts = vec![None, Some("*.com"), Some("a.b.com"), Some("*.b.com")];
        hosts.sort_by(|a, b| cmp_specificity(*a, *b));
        assert_eq!(hosts, vec![Some("a.b.com"), Some("*.b.com"), Some("*.com"), None]);
    }
}
