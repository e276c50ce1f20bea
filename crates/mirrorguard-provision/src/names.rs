//! Cluster name generation

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of the random suffix appended to generated names
pub const NAME_SUFFIX_LEN: usize = 8;

/// Longest prefix kept from the base name
const MAX_PREFIX_LEN: usize = 40;

/// Prefix used when the base name has no usable characters
const FALLBACK_PREFIX: &str = "cluster";

/// Generate `<base>-<suffix>` where the suffix is random lowercase alphanumerics
///
/// The base is lowercased and reduced to a valid DNS label prefix so the result
/// is always a valid label.
pub fn generate_cluster_name(base: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|b| char::from(b).to_ascii_lowercase())
        .take(NAME_SUFFIX_LEN)
        .collect();
    format!("{}-{}", sanitize_prefix(base), suffix)
}

fn sanitize_prefix(base: &str) -> String {
    let mut prefix = String::with_capacity(base.len());
    for c in base.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prefix.push(c);
        } else if !prefix.is_empty() && !prefix.ends_with('-') {
            prefix.push('-');
        }
    }
    prefix.truncate(MAX_PREFIX_LEN);
    let prefix = prefix.trim_end_matches('-');
    if prefix.is_empty() {
        FALLBACK_PREFIX.to_string()
    } else {
        prefix.to_string()
    }
}

/// Whether `name` is a valid DNS-1123 label
pub fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}
