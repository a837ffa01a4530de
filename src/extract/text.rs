//! Plain-text extraction with encoding detection and repair.

use std::path::Path;

use super::{Extracted, Extractor};
use crate::error::{FolioError, Result};

/// Extractor for plain text and markdown files.
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn can_extract(&self, extension: &str) -> bool {
        matches!(extension, "txt" | "md")
    }

    fn extract(&self, path: &Path) -> Result<Extracted> {
        let raw = std::fs::read(path).map_err(FolioError::Io)?;
        decode_bytes(&raw)
    }
}

/// Fraction of NUL bytes above which input is treated as binary, not text.
const MAX_NUL_FRACTION: f64 = 0.01;

/// Decode raw bytes to text.
///
/// Detection order: strict UTF-8, UTF-16 via BOM, then Latin-1 as the repair
/// path (every byte maps, so it cannot fail; the repair is recorded as a
/// warning). NUL-dense input is rejected as binary with `Encoding`.
pub fn decode_bytes(raw: &[u8]) -> Result<Extracted> {
    if raw.is_empty() {
        return Ok(Extracted {
            text: String::new(),
            warnings: Vec::new(),
        });
    }

    // UTF-16 text is NUL-dense by nature, so the BOM check runs first
    if let Some(text) = decode_utf16_bom(raw) {
        return Ok(Extracted {
            text,
            warnings: vec!["decoded as UTF-16 via byte-order mark".to_string()],
        });
    }

    let nul_count = raw.iter().filter(|&&b| b == 0).count();
    if nul_count as f64 > raw.len() as f64 * MAX_NUL_FRACTION {
        return Err(FolioError::Encoding(format!(
            "input looks binary ({nul_count} NUL bytes in {} total)",
            raw.len()
        )));
    }

    match std::str::from_utf8(raw) {
        Ok(text) => Ok(Extracted {
            // A UTF-8 BOM is an encoding artifact, not content
            text: text.strip_prefix('\u{FEFF}').unwrap_or(text).to_string(),
            warnings: Vec::new(),
        }),
        Err(_) => {
            let text: String = raw.iter().map(|&b| b as char).collect();
            Ok(Extracted {
                text,
                warnings: vec!["invalid UTF-8, repaired as Latin-1".to_string()],
            })
        }
    }
}

fn decode_utf16_bom(raw: &[u8]) -> Option<String> {
    let (le, payload) = match raw {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => return None,
    };
    let units: Vec<u16> = payload
        .chunks(2)
        .map(|pair| {
            let (a, b) = (pair[0], *pair.get(1).unwrap_or(&0));
            if le {
                u16::from_le_bytes([a, b])
            } else {
                u16::from_be_bytes([a, b])
            }
        })
        .collect();
    Some(String::from_utf16_lossy(&units))
}
