//! Image reference helpers

/// Registry implied by an image reference without an explicit host
pub const IMPLICIT_REGISTRY: &str = "docker.io";

/// Strip an optional scheme and trailing slashes from a configured host
pub fn normalize_host(host: &str) -> &str {
    let host = host.trim();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    host.trim_end_matches('/')
}

/// Whether `image` is pulled from `host`
///
/// The reference must start with the host immediately followed by `/`, so
/// `reg.test.evil/pause:3.6` does not match host `reg.test`.
pub fn has_registry_prefix(image: &str, host: &str) -> bool {
    let host = normalize_host(host);
    if host.is_empty() {
        return false;
    }
    image
        .strip_prefix(host)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Registry host an image reference resolves to
///
/// Follows the container runtime convention: the first path component is a
/// host only if it contains `.` or `:` or is `localhost`.
pub fn registry_host(image: &str) -> &str {
    match image.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first
        }
        _ => IMPLICIT_REGISTRY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matches_exact_host() {
        assert!(has_registry_prefix(
            "registry.internal.test/rancher/pause:3.6",
            "registry.internal.test"
        ));
    }

    #[test]
    fn prefix_rejects_lookalike_host() {
        assert!(!has_registry_prefix(
            "registry.internal.test.evil/rancher/pause:3.6",
            "registry.internal.test"
        ));
        assert!(!has_registry_prefix(
            "registry.internal.testing/rancher/pause:3.6",
            "registry.internal.test"
        ));
    }

    #[test]
    fn prefix_handles_ports_and_digests() {
        assert!(has_registry_prefix(
            "reg.test:5000/rancher/hyperkube@sha256:abcdef",
            "reg.test:5000"
        ));
        assert!(!has_registry_prefix("reg.test/rancher/pause:3.6", "reg.test:5000"));
    }

    #[test]
    fn prefix_tolerates_scheme_and_trailing_slash_in_host() {
        assert!(has_registry_prefix(
            "reg.test/rancher/pause:3.6",
            "https://reg.test/"
        ));
    }

    #[test]
    fn blank_host_never_matches() {
        assert!(!has_registry_prefix("/rancher/pause:3.6", ""));
        assert!(!has_registry_prefix("rancher/pause:3.6", "  "));
    }

    #[test]
    fn bare_host_without_path_does_not_match() {
        assert!(!has_registry_prefix("reg.test", "reg.test"));
    }

    #[test]
    fn registry_host_resolution() {
        assert_eq!(registry_host("rancher/pause:3.6"), "docker.io");
        assert_eq!(registry_host("pause:3.6"), "docker.io");
        assert_eq!(registry_host("reg.test/rancher/pause:3.6"), "reg.test");
        assert_eq!(registry_host("localhost/pause"), "localhost");
        assert_eq!(registry_host("reg:5000/pause"), "reg:5000");
    }
}
