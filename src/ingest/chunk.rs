//! Sliding-window retrieval chunks over scene spans.
//!
//! Chunks never cross a scene boundary; within a scene, consecutive chunks
//! overlap by `window - stride` characters, and the final chunk may be
//! shorter than the window but never empty.

use crate::error::{FolioError, Result};
use crate::ingest::segment::SceneSpan;

/// A retrieval window over a scene, in absolute character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub idx: usize,
    pub scene_idx: usize,
    pub start: usize,
    pub end: usize,
}

/// Window positions for a single scene of `scene_chars` characters,
/// relative to the scene start.
pub fn chunk_scene(scene_chars: usize, window: usize, stride: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    while start < scene_chars {
        let end = (start + window).min(scene_chars);
        spans.push((start, end));
        if end == scene_chars {
            break;
        }
        start += stride;
    }
    spans
}

/// Build the full chunk list for a work's scenes.
///
/// `stride` must not exceed `window`; both must be positive.
pub fn make_chunks(scenes: &[SceneSpan], window: usize, stride: usize) -> Result<Vec<ChunkSpan>> {
    if window == 0 || stride == 0 {
        return Err(FolioError::Config(
            "window_chars and stride_chars must be greater than 0".to_string(),
        ));
    }
    if stride > window {
        return Err(FolioError::Config(format!(
            "stride_chars ({stride}) must not exceed window_chars ({window})"
        )));
    }

    let mut chunks = Vec::new();
    for scene in scenes {
        for (rel_start, rel_end) in chunk_scene(scene.end - scene.start, window, stride) {
            chunks.push(ChunkSpan {
                idx: chunks.len(),
                scene_idx: scene.idx,
                start: scene.start + rel_start,
                end: scene.start + rel_end,
            });
        }
    }
    Ok(chunks)
}
