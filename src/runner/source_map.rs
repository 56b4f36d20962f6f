//! Source Map v3 decoding and position lookup.
//!
//! ## Notes
//! - Lookups take and return 1-based lines and columns; segments are stored 0-based as encoded.
//! - A line with no segment at or before the requested column has no mapping; callers keep the raw position.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

const SOURCE_MAPPING_URL: &str = "//# sourceMappingURL=";
const DATA_URL_PREFIX: &str = "data:application/json;";

#[derive(Debug, Error)]
pub enum SourceMapError {
    #[error("invalid source map JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported source map version {0}")]
    Version(u32),

    #[error("invalid base64 VLQ character {0:?} in mappings")]
    Vlq(char),

    #[error("truncated segment in mappings")]
    Truncated,
}

/// A 1-based position in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// One decoded mapping segment (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    generated_column: u32,
    original_line: u32,
    original_column: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap {
    version: u32,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    source_root: Option<String>,
    mappings: String,
}

/// A decoded source map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMap {
    sources: Vec<String>,
    /// Segments per generated line, sorted by generated column.
    lines: Vec<Vec<Segment>>,
}

impl SourceMap {
    /// Decode a source map from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, SourceMapError> {
        let raw: RawSourceMap = serde_json::from_str(json)?;
        if raw.version != 3 {
            return Err(SourceMapError::Version(raw.version));
        }
        let sources = match raw.source_root.as_deref().filter(|root| !root.is_empty()) {
            Some(root) => raw
                .sources
                .into_iter()
                .map(|s| format!("{}/{}", root.trim_end_matches('/'), s))
                .collect(),
            None => raw.sources,
        };
        Ok(Self {
            sources,
            lines: decode_mappings(&raw.mappings)?,
        })
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Map a generated position to the original position it came from.
    pub fn original_position_for(&self, line: u32, column: u32) -> Option<Position> {
        let segments = self.lines.get(line.checked_sub(1)? as usize)?;
        let column = column.saturating_sub(1);
        let index = segments.partition_point(|s| s.generated_column <= column);
        let segment = segments.get(index.checked_sub(1)?)?;
        Some(Position {
            line: segment.original_line + 1,
            column: segment.original_column + 1,
        })
    }

    /// Map an original position to the first generated position produced from it.
    ///
    /// Picks the closest segment on the original line at or before `column`.
    pub fn generated_position_for(&self, line: u32, column: u32) -> Option<Position> {
        let original_line = line.checked_sub(1)?;
        let column = column.saturating_sub(1);
        let mut best: Option<(u32, Position)> = None;
        for (generated_line, segments) in self.lines.iter().enumerate() {
            for segment in segments {
                if segment.original_line != original_line || segment.original_column > column {
                    continue;
                }
                let better = best.is_none_or(|(col, _)| segment.original_column > col);
                if better {
                    best = Some((
                        segment.original_column,
                        Position {
                            line: generated_line as u32 + 1,
                            column: segment.generated_column + 1,
                        },
                    ));
                }
            }
        }
        best.map(|(_, position)| position)
    }
}

// ============================================================================
// Mappings decoding
// ============================================================================

fn decode_mappings(mappings: &str) -> Result<Vec<Vec<Segment>>, SourceMapError> {
    let mut lines = Vec::new();
    // Original positions are relative across the whole string; generated columns restart per line.
    let mut original_line = 0i64;
    let mut original_column = 0i64;

    for line in mappings.split(';') {
        let mut segments = Vec::new();
        let mut generated_column = 0i64;
        for encoded in line.split(',').filter(|s| !s.is_empty()) {
            let fields = decode_vlq(encoded)?;
            let first = *fields.first().ok_or(SourceMapError::Truncated)?;
            generated_column = add(generated_column, first)?;
            match fields.len() {
                1 => continue,
                4 | 5 => {
                    original_line = add(original_line, fields[2])?;
                    original_column = add(original_column, fields[3])?;
                }
                _ => return Err(SourceMapError::Truncated),
            }
            segments.push(Segment {
                generated_column: clamp(generated_column),
                original_line: clamp(original_line),
                original_column: clamp(original_column),
            });
        }
        segments.sort_by_key(|s| s.generated_column);
        lines.push(segments);
    }
    Ok(lines)
}

fn add(total: i64, delta: i64) -> Result<i64, SourceMapError> {
    total.checked_add(delta).ok_or(SourceMapError::Truncated)
}

fn clamp(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

const MAX_VLQ_SHIFT: u32 = 30;

fn decode_vlq(encoded: &str) -> Result<Vec<i64>, SourceMapError> {
    let mut values = Vec::new();
    let mut value = 0i64;
    let mut shift = 0u32;
    for ch in encoded.chars() {
        let digit = base64_digit(ch).ok_or(SourceMapError::Vlq(ch))?;
        let bits = i64::from(digit & 0b11111)
            .checked_shl(shift)
            .ok_or(SourceMapError::Truncated)?;
        value = value.checked_add(bits).ok_or(SourceMapError::Truncated)?;
        if digit & 0b100000 != 0 {
            shift += 5;
            // Values are 32-bit; longer runs are malformed.
            if shift > MAX_VLQ_SHIFT {
                return Err(SourceMapError::Truncated);
            }
            continue;
        }
        let negative = value & 1 == 1;
        let magnitude = value >> 1;
        values.push(if negative { -magnitude } else { magnitude });
        value = 0;
        shift = 0;
    }
    if shift != 0 {
        return Err(SourceMapError::Truncated);
    }
    Ok(values)
}

fn base64_digit(ch: char) -> Option<u32> {
    match ch {
        'A'..='Z' => Some(ch as u32 - 'A' as u32),
        'a'..='z' => Some(ch as u32 - 'a' as u32 + 26),
        '0'..='9' => Some(ch as u32 - '0' as u32 + 52),
        '+' => Some(62),
        '/' => Some(63),
        _ => None,
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Supplies the source map for a collected file, if it has one.
pub trait SourceMapResolver: Send + Sync {
    fn resolve(&self, path: &Path, source: &str) -> Option<SourceMap>;
}

/// Never finds a source map.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSourceMaps;

impl SourceMapResolver for NoSourceMaps {
    fn resolve(&self, _path: &Path, _source: &str) -> Option<SourceMap> {
        None
    }
}

/// Looks for an inline `data:` source map comment, then a sibling `<file>.map`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSourceMapResolver;

impl SourceMapResolver for FsSourceMapResolver {
    fn resolve(&self, path: &Path, source: &str) -> Option<SourceMap> {
        let json = match mapping_url(source) {
            Some(url) if url.starts_with(DATA_URL_PREFIX) => decode_data_url(url)?,
            Some(url) => fs::read_to_string(path.parent()?.join(url)).ok()?,
            None => fs::read_to_string(sibling_map_path(path)).ok()?,
        };
        match SourceMap::from_json(&json) {
            Ok(map) => Some(map),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "ignoring unreadable source map");
                None
            }
        }
    }
}

fn mapping_url(source: &str) -> Option<&str> {
    source
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(SOURCE_MAPPING_URL))
        .map(str::trim)
}

fn decode_data_url(url: &str) -> Option<String> {
    let (_, payload) = url.split_once("base64,")?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload).ok()?;
    String::from_utf8(bytes).ok()
}

fn sibling_map_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".map");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Generated line 1 maps col 0 -> (0,0) and col 4 -> (1,2); line 2 maps col 2 -> (2,0).
    const MAP: &str = r#"{"version":3,"sources":["a.ts"],"names":[],"mappings":"AAAA,IACE;EACF"}"#;

    #[test]
    fn test_vlq_decoding() {
        assert_eq!(decode_vlq("AAAA").unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(decode_vlq("IACE").unwrap(), vec![4, 0, 1, 2]);
        assert_eq!(decode_vlq("D").unwrap(), vec![-1]);
        assert_eq!(decode_vlq("gB").unwrap(), vec![16]);
    }

    #[test]
    fn test_overlong_vlq_runs_are_rejected() {
        // Six continuation digits still fit 32 bits; a seventh does not.
        assert!(decode_vlq("//////D").is_ok());
        assert!(matches!(decode_vlq("///////D"), Err(SourceMapError::Truncated)));
        let long = format!("AA{}A", "g".repeat(40));
        let json = format!(r#"{{"version":3,"sources":["a.ts"],"names":[],"mappings":"{long}"}}"#);
        assert!(matches!(SourceMap::from_json(&json), Err(SourceMapError::Truncated)));
    }

    #[test]
    fn test_original_position_for() {
        let map = SourceMap::from_json(MAP).unwrap();
        assert_eq!(map.original_position_for(1, 1), Some(Position { line: 1, column: 1 }));
        assert_eq!(map.original_position_for(1, 7), Some(Position { line: 2, column: 3 }));
        assert_eq!(map.original_position_for(2, 5), Some(Position { line: 3, column: 1 }));
    }

    #[test]
    fn test_unmapped_positions_are_none() {
        let map = SourceMap::from_json(MAP).unwrap();
        // Before the first segment on line 2.
        assert_eq!(map.original_position_for(2, 1), None);
        assert_eq!(map.original_position_for(9, 1), None);
    }

    #[test]
    fn test_generated_position_for() {
        let map = SourceMap::from_json(MAP).unwrap();
        assert_eq!(map.generated_position_for(2, 3), Some(Position { line: 1, column: 5 }));
        assert_eq!(map.generated_position_for(3, 4), Some(Position { line: 2, column: 3 }));
    }

    #[test]
    fn test_rejects_other_versions() {
        let err = SourceMap::from_json(r#"{"version":2,"mappings":""}"#).unwrap_err();
        assert!(matches!(err, SourceMapError::Version(2)));
    }

    #[test]
    fn test_inline_data_url() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(MAP);
        let source = format!("test('x', () => {{}})\n//# sourceMappingURL=data:application/json;base64,{encoded}\n");
        let map = FsSourceMapResolver.resolve(Path::new("/nonexistent/a.ts"), &source);
        assert!(map.is_some());
    }
}
