//! Scope guard: registrable-domain match plus excluded path prefixes

use url::{Host, Url};

/// Schemes that never lead anywhere crawlable
const DEAD_SCHEMES: &[&str] = &["mailto:", "javascript:", "tel:", "data:"];

/// Returns true when `url` belongs to the scan scope rooted at `root`.
///
/// `excluded` must already be resolved against the root.
pub fn in_scope(url: &str, root: &Url, excluded: &[Url]) -> bool {
    let trimmed = url.trim();
    let lower = trimmed.to_ascii_lowercase();
    if trimmed.is_empty() || trimmed.starts_with('#') || DEAD_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return false;
    }

    let parsed = match Url::parse(trimmed) {
        Ok(u) => u,
        Err(_) => return false,
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    if !same_site(&parsed, root) {
        return false;
    }

    !excluded
        .iter()
        .any(|ex| same_site(&parsed, ex) && parsed.path().starts_with(ex.path()))
}

/// Resolves exclude entries (relative or absolute) against the root
pub fn resolve_excludes(root: &Url, paths: &[String]) -> Vec<Url> {
    paths
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .filter_map(|p| root.join(p).ok())
        .collect()
}

fn same_site(url: &Url, root: &Url) -> bool {
    match (url.host(), root.host()) {
        (Some(Host::Domain(a)), Some(Host::Domain(b))) => {
            registrable_domain(a) == registrable_domain(b)
        }
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Registrable domain per the public suffix list; hosts without one map to themselves
fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    psl::domain_str(&host)
        .map(|d| d.to_string())
        .unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Url {
        Url::parse("https://www.example.com/app/").expect("valid url")
    }

    #[test]
    fn test_same_registrable_domain() {
        let root = root();
        assert!(in_scope("https://www.example.com/login", &root, &[]));
        assert!(in_scope("https://shop.example.com/cart", &root, &[]));
        assert!(in_scope("http://example.com/", &root, &[]));
        assert!(!in_scope("https://example.org/", &root, &[]));
        assert!(!in_scope("https://notexample.com/", &root, &[]));
    }

    #[test]
    fn test_public_suffix_boundaries() {
        let root = Url::parse("https://www.shop.co.uk/").expect("valid url");
        assert!(in_scope("https://pay.shop.co.uk/", &root, &[]));
        assert!(!in_scope("https://other.co.uk/", &root, &[]));
    }

    #[test]
    fn test_ip_literal_exact_match() {
        let root = Url::parse("http://127.0.0.1:8080/").expect("valid url");
        assert!(in_scope("http://127.0.0.1:9999/x", &root, &[]));
        assert!(!in_scope("http://127.0.0.2/x", &root, &[]));
        assert!(!in_scope("http://localhost/x", &root, &[]));
    }

    #[test]
    fn test_dead_schemes_out_of_scope() {
        let root = root();
        assert!(!in_scope("#top", &root, &[]));
        assert!(!in_scope("mailto:admin@example.com", &root, &[]));
        assert!(!in_scope("JavaScript:void(0)", &root, &[]));
        assert!(!in_scope("ftp://www.example.com/file", &root, &[]));
        assert!(!in_scope("", &root, &[]));
    }

    #[test]
    fn test_excluded_paths_ignore_query_and_fragment() {
        let root = root();
        let excluded = resolve_excludes(&root, &["/logout".to_string(), "admin/".to_string()]);
        assert_eq!(excluded[1].as_str(), "https://www.example.com/app/admin/");

        assert!(!in_scope("https://www.example.com/logout", &root, &excluded));
        assert!(!in_scope("https://www.example.com/logout?next=/", &root, &excluded));
        assert!(!in_scope("https://www.example.com/logout#now", &root, &excluded));
        assert!(!in_scope("https://www.example.com/app/admin/users?id=1#x", &root, &excluded));
        assert!(in_scope("https://www.example.com/app/profile?logout=1", &root, &excluded));
        assert!(in_scope("https://www.example.com/app/administrator", &root, &excluded));
    }
}
