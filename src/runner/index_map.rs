//! `(line, column)` to byte-offset lookup over one file's text.
//!
//! ## Notes
//! - Lines start at 1. The first line's columns start at 1; after every `\n` the column restarts at 0, so the first
//!   character of every later line is recorded at column 0. Callers translating checker positions rely on exactly
//!   this numbering, so it must not be "fixed".
//! - Offsets are byte offsets into the UTF-8 text, matching the spans produced by `typetest_syntax`.

use std::collections::HashMap;

/// Position-to-offset table for one source text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMap {
    offsets: HashMap<(u32, u32), usize>,
    /// The same entries in text order, for reverse lookups.
    positions: Vec<(usize, (u32, u32))>,
}

impl IndexMap {
    /// Scan `source` once and record the offset of every character position.
    pub fn build(source: &str) -> Self {
        let mut offsets = HashMap::with_capacity(source.len());
        let mut positions = Vec::with_capacity(source.len());
        let mut line = 1u32;
        let mut column = 1u32;
        for (offset, ch) in source.char_indices() {
            offsets.insert((line, column), offset);
            positions.push((offset, (line, column)));
            if ch == '\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }
        }
        Self { offsets, positions }
    }

    /// Byte offset recorded for `(line, column)`, if that position occurs in the text.
    pub fn offset(&self, line: u32, column: u32) -> Option<usize> {
        self.offsets.get(&(line, column)).copied()
    }

    /// Reverse lookup: the position recorded for `offset`.
    pub fn position(&self, offset: usize) -> Option<(u32, u32)> {
        let index = self.positions.binary_search_by_key(&offset, |(o, _)| *o).ok()?;
        Some(self.positions[index].1)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line_is_one_based() {
        let map = IndexMap::build("abc");
        assert_eq!(map.offset(1, 1), Some(0));
        assert_eq!(map.offset(1, 3), Some(2));
        assert_eq!(map.offset(1, 4), None);
    }

    #[test]
    fn test_later_lines_restart_at_zero() {
        let map = IndexMap::build("ab\ncd\nef");
        // The newline itself is recorded on the line it ends.
        assert_eq!(map.offset(1, 3), Some(2));
        assert_eq!(map.offset(2, 0), Some(3));
        assert_eq!(map.offset(2, 1), Some(4));
        assert_eq!(map.offset(3, 0), Some(6));
    }

    #[test]
    fn test_offsets_are_bytes() {
        let map = IndexMap::build("é\nx");
        assert_eq!(map.offset(1, 1), Some(0));
        assert_eq!(map.offset(1, 2), Some(2));
        assert_eq!(map.offset(2, 0), Some(3));
    }

    #[test]
    fn test_position_is_the_inverse_of_offset() {
        let map = IndexMap::build("one\ntwo");
        assert_eq!(map.position(5), Some((2, 1)));
        assert_eq!(map.offset(2, 1), Some(5));
    }

    #[test]
    fn test_position_of_a_continuation_byte_is_none() {
        let map = IndexMap::build("aé\nb");
        assert_eq!(map.position(1), Some((1, 2)));
        assert_eq!(map.position(2), None);
        assert_eq!(map.position(3), Some((1, 3)));
        assert_eq!(map.position(4), Some((2, 0)));
        assert_eq!(map.position(5), None);
    }

    #[test]
    fn test_empty_source() {
        assert!(IndexMap::build("").is_empty());
    }
}
