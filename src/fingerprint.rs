//! Deterministic cache keys.
//!
//! Fingerprints are `blake3` digests over a length-prefixed encoding, so
//! field boundaries can never blur (`"ab" + "c"` differs from `"a" + "bc"`).

use std::fmt;

use blake3::Hasher;

use crate::policy::property::{FilterType, Operator, PropertyFilter, Restrict};

/// A 256-bit cache key derived from the semantically relevant parts of a
/// query or extension request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryFingerprint([u8; 32]);

impl QueryFingerprint {
    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        self.to_string()[..12].to_string()
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryFingerprint({})", self.short())
    }
}

/// Incremental fingerprint encoder.
pub(crate) struct FingerprintBuilder {
    hasher: Hasher,
}

impl FingerprintBuilder {
    /// Starts a fingerprint in a domain, so keys of different kinds never collide.
    pub(crate) fn new(domain: &str) -> Self {
        let mut b = Self {
            hasher: Hasher::new(),
        };
        b.str(domain);
        b
    }

    pub(crate) fn tag(&mut self, tag: u8) {
        self.hasher.update(&[tag]);
    }

    pub(crate) fn u64(&mut self, v: u64) {
        self.hasher.update(&v.to_le_bytes());
    }

    pub(crate) fn str(&mut self, s: &str) {
        self.u64(s.len() as u64);
        self.hasher.update(s.as_bytes());
    }

    pub(crate) fn opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.tag(1);
                self.str(s);
            }
            None => self.tag(0),
        }
    }

    pub(crate) fn filter(&mut self, f: &PropertyFilter) {
        self.tag(match f.filter_type {
            FilterType::ExactMatch => 0,
            FilterType::Similarity => 1,
        });
        self.tag(match f.operator {
            Operator::Gt => 0,
            Operator::Eq => 1,
            Operator::Lt => 2,
        });
        self.u64(f.threshold.to_bits());
        self.tag(match f.restrict {
            Restrict::Soft => 0,
            Restrict::Hard => 1,
        });
    }

    pub(crate) fn finish(self) -> QueryFingerprint {
        QueryFingerprint(*self.hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn of(parts: &[&str]) -> QueryFingerprint {
        let mut b = FingerprintBuilder::new("test");
        for p in parts {
            b.str(p);
        }
        b.finish()
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(of(&["a", "b"]), of(&["a", "b"]));
    }

    #[test]
    fn field_boundaries_are_preserved() {
        assert_ne!(of(&["ab", "c"]), of(&["a", "bc"]));
    }

    #[test]
    fn domains_are_separated() {
        let a = FingerprintBuilder::new("query").finish();
        let b = FingerprintBuilder::new("extend").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_lowercase_hex() {
        let fp = of(&["x"]);
        let s = fp.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp.short().len(), 12);
    }
}
