//! Task-id hashing.
//!
//! File ids must be stable across runs and processes so reporters can correlate `collected` and
//! `updated` batches. The hash is the classic 31-multiplier string hash over UTF-16 code units,
//! truncated to a signed 32-bit integer and rendered in decimal.

/// Hash a string into a stable decimal id.
///
/// ## Examples
/// ```rust
/// use typetest_core::generate_hash;
///
/// assert_eq!(generate_hash(""), "0");
/// assert_eq!(generate_hash("a"), "97");
/// assert_eq!(generate_hash("ab"), "3105");
/// ```
pub fn generate_hash(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit));
    }
    hash.to_string()
}
