//! Stable short identifiers for environments and instances.

use sha1::{Digest, Sha1};

/// Number of hex characters kept from the digest.
pub const ID_LEN: usize = 12;

/// Returns the first 12 hex characters of the SHA-1 of `parts` concatenated in order.
///
/// No separator is inserted and nothing is normalized, so callers are
/// responsible for keeping part boundaries unambiguous.
pub fn compute_id<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
    }
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(ID_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_id_is_case_sensitive() {
        assert_eq!(compute_id(&["testString"]), "956265657d0b");
        assert_eq!(compute_id(&["teststring"]), "b8473b86d4c2");
        assert_ne!(compute_id(&["teststring"]), compute_id(&["testString"]));
    }

    #[test]
    fn test_compute_id_multiple_parts() {
        assert_eq!(compute_id(&["teststring1", "teststring2"]), "ab8675367360");
    }

    #[test]
    fn test_compute_id_concatenates_without_separator() {
        // boundaries are not part of the hash input
        assert_eq!(compute_id(&["a", "b"]), compute_id(&["ab"]));
        assert_eq!(
            compute_id(&["aws", "us-east-1", "prod"]),
            compute_id(&["aws", "us-east-1prod", ""])
        );
        // different concatenations still differ
        assert_ne!(compute_id(&["a", "b"]), compute_id(&["b", "a"]));
    }

    #[test]
    fn test_compute_id_is_deterministic() {
        let first = compute_id(&["aws", "ca-central-1", "i-0a5c68f08c53f5a81"]);
        let second = compute_id(&["aws", "ca-central-1", "i-0a5c68f08c53f5a81"]);
        assert_eq!(first, second);
        assert_eq!(first.len(), ID_LEN);
    }
}
