//! SHA-256 template hash.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// SHA-256 digest of a normalized template. Rendered as 64 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateHash([u8; 32]);

impl TemplateHash {
    /// Hash an already-normalized template.
    pub fn of(template: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(template.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for TemplateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTemplateHashError(String);

impl fmt::Display for ParseTemplateHashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid template hash '{}': expected 64 hex characters", self.0)
    }
}

impl std::error::Error for ParseTemplateHashError {}

impl FromStr for TemplateHash {
    type Err = ParseTemplateHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTemplateHashError(s.to_string());
        if s.len() != 64 || !s.is_ascii() {
            return Err(err());
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| err())?;
        }
        Ok(Self(out))
    }
}

impl Serialize for TemplateHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TemplateHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            TemplateHash::of("abc").to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_parse_hex() {
        let h = TemplateHash::of("hello {NUMBER}");
        assert_eq!(h.to_hex().parse::<TemplateHash>().unwrap(), h);
        assert!("abc".parse::<TemplateHash>().is_err());
        assert!("zz".repeat(32).parse::<TemplateHash>().is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let h = TemplateHash::of("abc");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h));
        let back: TemplateHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
