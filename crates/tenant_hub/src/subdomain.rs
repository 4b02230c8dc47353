//! Tenant derivation from the request `Host` header.

use crate::tenant::TenantKey;

/// Extracts the subdomain part of `host`.
///
/// Without a root host, everything before the first `.` is the subdomain
/// (`foo.localhost:3000` → `foo`). With a root host, the port is stripped and
/// the host must end with `.` + root host and not be the root host itself.
/// An empty prefix counts as no subdomain.
pub fn derive_subdomain(host: &str, root_host: Option<&str>) -> Option<String> {
    let subdomain = match root_host {
        None => host.split_once('.').map(|(prefix, _)| prefix),
        Some(root) => {
            let host = host.split_once(':').map_or(host, |(name, _)| name);
            if host == root {
                None
            } else {
                host.strip_suffix(root)
                    .and_then(|prefix| prefix.strip_suffix('.'))
            }
        }
    };

    subdomain.filter(|s| !s.is_empty()).map(str::to_string)
}

/// Resolves the tenant owning a connection made to `host`.
///
/// Connections without a resolvable subdomain belong to the root tenant.
pub fn tenant_for_host(host: Option<&str>, root_host: Option<&str>) -> TenantKey {
    host.and_then(|host| derive_subdomain(host, root_host))
        .map(TenantKey::new)
        .unwrap_or_else(TenantKey::root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_root_host_takes_first_label() {
        assert_eq!(derive_subdomain("foo.example.com", None).as_deref(), Some("foo"));
        assert_eq!(derive_subdomain("foo.localhost:3000", None).as_deref(), Some("foo"));
        assert_eq!(derive_subdomain("localhost:3000", None), None);
    }

    #[test]
    fn test_with_root_host() {
        let root = Some("example.com");
        assert_eq!(derive_subdomain("foo.example.com", root).as_deref(), Some("foo"));
        assert_eq!(derive_subdomain("foo.example.com:8080", root).as_deref(), Some("foo"));
        assert_eq!(derive_subdomain("a.b.example.com", root).as_deref(), Some("a.b"));
        assert_eq!(derive_subdomain("example.com", root), None);
        assert_eq!(derive_subdomain("example.com:443", root), None);
        assert_eq!(derive_subdomain("other.org", root), None);
        assert_eq!(derive_subdomain("fooexample.com", root), None);
    }

    #[test]
    fn test_empty_prefix_is_no_subdomain() {
        assert_eq!(derive_subdomain(".example.com", None), None);
        assert_eq!(derive_subdomain(".example.com", Some("example.com")), None);
    }

    #[test]
    fn test_unresolvable_host_maps_to_root_tenant() {
        assert!(tenant_for_host(None, None).is_root());
        assert!(tenant_for_host(Some("example.com"), Some("example.com")).is_root());
        assert_eq!(tenant_for_host(Some("foo.example.com"), None).as_str(), "foo");
    }
}
