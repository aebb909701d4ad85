// ============================================================================
// Commit Digest
// ============================================================================
//
// The ledger verifies every commit against a digest folded over the
// transaction id and every statement executed in it. The driver computes the
// same fold locally and compares it with the digest the server returns.
//
// ============================================================================

use crate::core::ValueHolder;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;

/// Length in bytes of a SHA-256 digest.
pub const HASH_LENGTH: usize = 32;

/// Immutable SHA-256 based accumulator.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct QldbHash {
    bytes: Vec<u8>,
}

impl QldbHash {
    /// The empty hash; it is the identity of [`QldbHash::dot`].
    pub fn empty() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Wraps an already computed digest.
    pub fn from_digest(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn of_bytes(data: &[u8]) -> Self {
        Self {
            bytes: Sha256::digest(data).to_vec(),
        }
    }

    pub fn of_str(text: &str) -> Self {
        Self::of_bytes(text.as_bytes())
    }

    pub fn of_value(value: &ValueHolder) -> Self {
        Self::of_bytes(value.as_bytes())
    }

    /// Hash of one statement: the statement text folded with each parameter.
    pub fn of_statement(statement: &str, parameters: &[ValueHolder]) -> Self {
        parameters
            .iter()
            .fold(Self::of_str(statement), |acc, param| {
                acc.dot(&Self::of_value(param))
            })
    }

    /// Combines two hashes: the smaller digest (by [`compare_digests`]) is
    /// written first, then the concatenation is hashed again.
    pub fn dot(&self, other: &QldbHash) -> QldbHash {
        if self.bytes.is_empty() {
            return other.clone();
        }
        if other.bytes.is_empty() {
            return self.clone();
        }

        let (first, second) = match compare_digests(&self.bytes, &other.bytes) {
            Ordering::Greater => (&other.bytes, &self.bytes),
            _ => (&self.bytes, &other.bytes),
        };

        let mut hasher = Sha256::new();
        hasher.update(first);
        hasher.update(second);
        Self {
            bytes: hasher.finalize().to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Orders two digests the way the ledger does: signed bytes compared from
/// the last byte towards the first.
pub fn compare_digests(left: &[u8], right: &[u8]) -> Ordering {
    if left.len() != right.len() {
        return left.len().cmp(&right.len());
    }

    for (l, r) in left.iter().rev().zip(right.iter().rev()) {
        let ordering = (*l as i8).cmp(&(*r as i8));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

impl fmt::Debug for QldbHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QldbHash(")?;
        for byte in &self.bytes {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

impl AsRef<[u8]> for QldbHash {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_str_is_sha256() {
        let hash = QldbHash::of_str("abc");
        assert_eq!(hash.as_bytes().len(), HASH_LENGTH);
        assert_eq!(
            format!("{hash:?}"),
            "QldbHash(ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad)"
        );
    }

    #[test]
    fn test_dot_with_empty_is_identity() {
        let hash = QldbHash::of_str("txn");
        assert_eq!(hash.dot(&QldbHash::empty()), hash);
        assert_eq!(QldbHash::empty().dot(&hash), hash);
    }

    #[test]
    fn test_dot_is_symmetric_for_one_pair() {
        let a = QldbHash::of_str("a");
        let b = QldbHash::of_str("b");
        assert_eq!(a.dot(&b), b.dot(&a));
    }

    #[test]
    fn test_fold_is_order_sensitive() {
        let seed = QldbHash::of_str("txn-id");
        let s1 = QldbHash::of_statement("INSERT INTO t VALUE 1", &[]);
        let s2 = QldbHash::of_statement("DELETE FROM t", &[]);

        let forward = seed.dot(&s1).dot(&s2);
        let backward = seed.dot(&s2).dot(&s1);
        assert_ne!(forward, backward);
    }

    #[test]
    fn test_compare_digests_uses_signed_last_byte_first() {
        let mut low = vec![0u8; HASH_LENGTH];
        let mut high = vec![0u8; HASH_LENGTH];
        // 0x80 is negative as i8, so it sorts before 0x01.
        low[HASH_LENGTH - 1] = 0x80;
        high[HASH_LENGTH - 1] = 0x01;
        high[0] = 0x00;
        low[0] = 0x7f;

        assert_eq!(compare_digests(&low, &high), Ordering::Less);
        assert_eq!(compare_digests(&high, &low), Ordering::Greater);
        assert_eq!(compare_digests(&low, &low), Ordering::Equal);
    }

    #[test]
    fn test_statement_hash_includes_parameters() {
        let bare = QldbHash::of_statement("SELECT * FROM t WHERE id = ?", &[]);
        let with_param = QldbHash::of_statement(
            "SELECT * FROM t WHERE id = ?",
            &[ValueHolder::new(b"1".to_vec())],
        );
        assert_ne!(bare, with_param);
    }
}
