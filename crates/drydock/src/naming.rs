//! Random identifiers for daemons and scratch directories.

use rand::Rng;
use rand::distributions::Alphanumeric;

const SUFFIX_LEN: usize = 6;

/// `prefix` followed by six lowercase alphanumerics.
#[must_use]
pub fn random_name(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("{prefix}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_lowercase_alphanumeric() {
        let name = random_name("control-");
        let suffix = name.strip_prefix("control-").expect("prefix kept");
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }
}
