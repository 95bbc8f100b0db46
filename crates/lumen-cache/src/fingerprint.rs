use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use lumen_core::ClasspathEntry;

/// A stable SHA-256 fingerprint stored as a lowercase hex string.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the SHA-256 fingerprint of an arbitrary byte slice.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Fingerprint over everything besides file content that would change
/// derived artifacts: the indexer generation, the active validation
/// settings, and the classpath signature.
///
/// Bumping the generation constant is the deliberate lever for invalidating
/// every cache when extraction logic changes incompatibly.
pub fn index_fingerprint(
    generation: &str,
    settings: &serde_json::Value,
    classpath: &[ClasspathEntry],
) -> Fingerprint {
    let mut input = String::new();
    input.push_str(generation);
    input.push('-');
    input.push_str(&settings.to_string());
    input.push('-');
    for entry in classpath {
        input.push_str(&entry.path.to_string_lossy());
        input.push('#');
        input.push_str(&entry.last_modified.as_millis().to_string());
        input.push(',');
    }
    Fingerprint::from_bytes(input.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::Timestamp;

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = Fingerprint::from_bytes(b"hello");
        let b = Fingerprint::from_bytes(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn index_fingerprint_tracks_each_input() {
        let settings = serde_json::json!({ "severity": "warning" });
        let classpath = vec![ClasspathEntry::new("/lib/core.jar", Timestamp::from_millis(100))];

        let base = index_fingerprint("gen-1", &settings, &classpath);

        assert_ne!(base, index_fingerprint("gen-2", &settings, &classpath));

        let other_settings = serde_json::json!({ "severity": "error" });
        assert_ne!(base, index_fingerprint("gen-1", &other_settings, &classpath));

        let touched = vec![ClasspathEntry::new("/lib/core.jar", Timestamp::from_millis(200))];
        assert_ne!(base, index_fingerprint("gen-1", &settings, &touched));

        assert_eq!(base, index_fingerprint("gen-1", &settings, &classpath));
    }
}
