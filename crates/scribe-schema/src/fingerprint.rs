//! Schema fingerprinting for content deduplication
//!
//! A schema's identity is the 128-bit MD5 of its canonical string. Two
//! registrations with the same canonical content map to the same fingerprint
//! and therefore the same global id, regardless of subject.

use std::fmt;

/// 128-bit MD5 fingerprint of a canonical schema string
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Md5(pub [u8; 16]);

impl Md5 {
    /// Compute the fingerprint of a schema string.
    pub fn of(schema: &str) -> Self {
        Self(md5::compute(schema.as_bytes()).0)
    }

    /// Hex rendering, for logs and diagnostics.
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Md5 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Md5({})", self.hex())
    }
}

impl fmt::Display for Md5 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Md5::of(r#""string""#);
        let b = Md5::of(r#""string""#);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_content() {
        assert_ne!(Md5::of(r#""string""#), Md5::of(r#""bytes""#));
    }

    #[test]
    fn test_hex_rendering() {
        let fp = Md5::of(r#""string""#);
        assert_eq!(fp.hex().len(), 32);
        assert_eq!(format!("{}", fp), fp.hex());
    }
}
