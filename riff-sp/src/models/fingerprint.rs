//! Content fingerprint used as the stem cache key

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of hex characters kept from the SHA-256 digest
pub const FINGERPRINT_LEN: usize = 16;

/// Truncated SHA-256 of an upload's bytes
///
/// Always exactly [`FINGERPRINT_LEN`] lowercase hex characters, so it is safe to
/// use as a directory name under the cache root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build from a full hex digest, keeping the leading characters
    pub fn from_digest_hex(hex: &str) -> Result<Self, riff_common::Error> {
        let prefix = hex.get(..FINGERPRINT_LEN).ok_or_else(|| {
            riff_common::Error::InvalidInput(format!("digest too short: {} chars", hex.len()))
        })?;
        prefix.parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = riff_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == FINGERPRINT_LEN
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(riff_common::Error::InvalidInput(format!(
                "invalid fingerprint '{}': expected {} lowercase hex characters",
                s, FINGERPRINT_LEN
            )))
        }
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = riff_common::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let fp: Fingerprint = "0123456789abcdef".parse().unwrap();
        assert_eq!(fp.as_str(), "0123456789abcdef");
    }

    #[test]
    fn test_rejects_path_like_input() {
        assert!("../../etc/passwd".parse::<Fingerprint>().is_err());
        assert!("0123456789abcde/".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_rejects_uppercase_and_wrong_length() {
        assert!("0123456789ABCDEF".parse::<Fingerprint>().is_err());
        assert!("0123".parse::<Fingerprint>().is_err());
        assert!("0123456789abcdef0".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_from_digest_truncates() {
        let digest = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let fp = Fingerprint::from_digest_hex(digest).unwrap();
        assert_eq!(fp.as_str(), "e3b0c44298fc1c14");
    }

    #[test]
    fn test_serde_validates() {
        assert!(serde_json::from_str::<Fingerprint>("\"nothex!!nothex!!\"").is_err());
        let fp: Fingerprint = serde_json::from_str("\"00000000ffffffff\"").unwrap();
        assert_eq!(serde_json::to_string(&fp).unwrap(), "\"00000000ffffffff\"");
    }
}
