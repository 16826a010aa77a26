//! Content hashes used to identify graph nodes, inbox positions and machine
//! states.

/// A 32-byte BLAKE3 digest.
pub type Hash = [u8; 32];

/// Sentinel identity marking an absent successor slot.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Number of hex characters rendered by [`short_hex`].
const SHORT_HEX_LEN: usize = 12;

/// Computes the BLAKE3 hash of a byte slice.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> Hash {
    blake3::hash(data).into()
}

/// Extends a hash chain with a new element: `H(prev || H(item))`.
///
/// Inbox segments and execution output stubs are both committed to with this
/// construction so that the last link binds every element in order.
#[must_use]
pub fn chain_hash(prev: &Hash, item: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prev);
    hasher.update(&hash_bytes(item));
    hasher.finalize().into()
}

/// Returns `true` if the hash is the zero sentinel.
#[must_use]
pub fn is_zero(hash: &Hash) -> bool {
    *hash == ZERO_HASH
}

/// Renders the leading bytes of a hash as hex for log output.
#[must_use]
pub fn short_hex(hash: &Hash) -> String {
    let mut rendered = hex::encode(hash);
    rendered.truncate(SHORT_HEX_LEN);
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_hash_is_order_sensitive() {
        let a = chain_hash(&chain_hash(&ZERO_HASH, b"a"), b"b");
        let b = chain_hash(&chain_hash(&ZERO_HASH, b"b"), b"a");
        assert_ne!(a, b);
    }

    #[test]
    fn short_hex_truncates() {
        let rendered = short_hex(&[0xab; 32]);
        assert_eq!(rendered, "abababababab");
    }

    #[test]
    fn zero_sentinel() {
        assert!(is_zero(&ZERO_HASH));
        assert!(!is_zero(&hash_bytes(b"node")));
    }
}
