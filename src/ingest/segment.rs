//! Segmentation engine: canonical text into ordered, gapless scene spans.
//!
//! Profiles are interchangeable strategies behind one `segment` capability,
//! selected by name at the coordinator boundary. Every strategy emits
//! boundary positions; a shared assembler turns them into a partition of
//! `[0, char_count)`, so the gapless invariant holds structurally no matter
//! what a strategy does. All offsets are character offsets.

use regex::Regex;
use std::sync::OnceLock;

/// A contiguous, non-overlapping span of a work's canonical text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSpan {
    pub idx: usize,
    pub start: usize,
    pub end: usize,
    pub heading: Option<String>,
}

/// A single segmentation policy, pure over its input text.
pub trait SegmentStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn segment(&self, text: &str) -> Vec<SceneSpan>;
}

/// Names accepted by `strategy_for`, in registry order.
pub const PROFILE_NAMES: &[&str] = &[
    "default",
    "dense",
    "sparse",
    "markdown",
    "screenplay",
    "pdf_pages",
];

/// Select a strategy by profile name.
///
/// Unknown names fall back to `default` with a warning so a typo in a stored
/// run parameter cannot fail a re-ingest.
pub fn strategy_for(profile: Option<&str>) -> Box<dyn SegmentStrategy> {
    let name = profile.unwrap_or("default").to_lowercase();
    match name.as_str() {
        "default" => Box::new(BlankRunStrategy::DEFAULT),
        "dense" => Box::new(BlankRunStrategy::DENSE),
        "sparse" => Box::new(BlankRunStrategy::SPARSE),
        "markdown" => Box::new(MarkdownStrategy),
        "screenplay" => Box::new(ScreenplayStrategy),
        "pdf_pages" => Box::new(PdfPagesStrategy),
        other => {
            log::warn!("Unknown segmentation profile '{other}', falling back to default");
            Box::new(BlankRunStrategy::DEFAULT)
        }
    }
}

// ---------------------------------------------------------------------------
// Shared line scanning and span assembly
// ---------------------------------------------------------------------------

/// One physical line with its char offset and char length (newline included).
struct Line<'a> {
    content: &'a str,
    start: usize,
    char_len: usize,
}

fn lines_with_offsets(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut pos = 0;
    for content in text.split_inclusive('\n') {
        let char_len = content.chars().count();
        lines.push(Line {
            content,
            start: pos,
            char_len,
        });
        pos += char_len;
    }
    lines
}

/// A scene boundary: the new scene starts at `at` and carries `heading`.
/// A boundary at 0 only attaches a heading to the first scene.
struct Boundary {
    at: usize,
    heading: Option<String>,
}

fn assemble(char_count: usize, mut boundaries: Vec<Boundary>) -> Vec<SceneSpan> {
    boundaries.sort_by_key(|b| b.at);
    // Coinciding boundaries collapse into one; a heading wins over none
    // (a transition ending where the next slugline starts).
    boundaries.dedup_by(|b, kept| {
        if b.at != kept.at {
            return false;
        }
        if kept.heading.is_none() {
            kept.heading = b.heading.take();
        }
        true
    });

    let mut starts: Vec<(usize, Option<String>)> = vec![(0, None)];
    for b in boundaries {
        if b.at == 0 {
            starts[0].1 = b.heading;
        } else if b.at < char_count {
            starts.push((b.at, b.heading));
        }
    }

    let mut scenes = Vec::with_capacity(starts.len());
    for (i, (start, heading)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(char_count);
        scenes.push(SceneSpan {
            idx: i,
            start: *start,
            end,
            heading: heading.clone(),
        });
    }
    scenes
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

// ---------------------------------------------------------------------------
// default / dense / sparse: blank-line run-length boundaries
// ---------------------------------------------------------------------------

fn chapter_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(chapter|book|part|prologue|epilogue)\b").unwrap()
    })
}

/// Heuristic prose segmentation: a run of at least `min_blank_run`
/// consecutive blank lines ends a scene. The blank run attaches to the
/// preceding scene so the partition stays gapless; a candidate scene shorter
/// than `min_scene_chars` merges forward instead of splitting.
pub struct BlankRunStrategy {
    name: &'static str,
    min_blank_run: usize,
    min_scene_chars: usize,
}

impl BlankRunStrategy {
    /// Scene breaks on double blank lines, as manuscripts usually mark them.
    pub const DEFAULT: BlankRunStrategy = BlankRunStrategy {
        name: "default",
        min_blank_run: 2,
        min_scene_chars: 16,
    };
    /// Fewer, larger spans: breaks only on long blank runs.
    pub const DENSE: BlankRunStrategy = BlankRunStrategy {
        name: "dense",
        min_blank_run: 3,
        min_scene_chars: 64,
    };
    /// More, smaller spans: every blank line is a break.
    pub const SPARSE: BlankRunStrategy = BlankRunStrategy {
        name: "sparse",
        min_blank_run: 1,
        min_scene_chars: 0,
    };

    fn heading_for(line: &str) -> Option<String> {
        if chapter_heading_re().is_match(line) {
            Some(line.trim().to_string())
        } else {
            None
        }
    }
}

impl SegmentStrategy for BlankRunStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn segment(&self, text: &str) -> Vec<SceneSpan> {
        let char_count = text.chars().count();
        let lines = lines_with_offsets(text);
        let mut boundaries = Vec::new();
        let mut blank_run = 0usize;
        let mut last_accepted = 0usize;

        if let Some(first) = lines.first() {
            if let Some(heading) = Self::heading_for(first.content) {
                boundaries.push(Boundary {
                    at: 0,
                    heading: Some(heading),
                });
            }
        }

        for line in &lines {
            if is_blank(line.content) {
                blank_run += 1;
                continue;
            }
            if blank_run >= self.min_blank_run
                && line.start > last_accepted
                && line.start - last_accepted >= self.min_scene_chars
            {
                boundaries.push(Boundary {
                    at: line.start,
                    heading: Self::heading_for(line.content),
                });
                last_accepted = line.start;
            }
            blank_run = 0;
        }

        assemble(char_count, boundaries)
    }
}

// ---------------------------------------------------------------------------
// markdown: ATX heading boundaries with fence tracking
// ---------------------------------------------------------------------------

fn md_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s{0,3}(#{1,6})\s+(.+?)\s*$").unwrap())
}

fn md_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s{0,3}(```|~~~)").unwrap())
}

/// Splits at ATX heading lines. Heading markers inside fenced code blocks
/// never split; an unterminated fence runs to the end of the text.
pub struct MarkdownStrategy;

impl SegmentStrategy for MarkdownStrategy {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn segment(&self, text: &str) -> Vec<SceneSpan> {
        let char_count = text.chars().count();
        let mut boundaries = Vec::new();
        let mut in_fence = false;

        for line in &lines_with_offsets(text) {
            if md_fence_re().is_match(line.content) {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }
            if let Some(caps) = md_heading_re().captures(line.content) {
                boundaries.push(Boundary {
                    at: line.start,
                    heading: Some(caps[2].to_string()),
                });
            }
        }

        assemble(char_count, boundaries)
    }
}

// ---------------------------------------------------------------------------
// screenplay: sluglines, transitions, and character cues
// ---------------------------------------------------------------------------

fn slugline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(INT\./EXT\.|I/E\.|INT\.|EXT\.|EST\.)\s+\S").unwrap())
}

fn transition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[A-Z][A-Z .]*TO:|FADE IN[.:]?|FADE OUT[.:]?)$").unwrap())
}

fn cue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9 .'\-]{0,39}$").unwrap())
}

/// Splits at slugline lines; transition lines are boundary hints (the new
/// scene starts after them, the transition stays with the scene it closes).
/// Character-cue lines are recognized so they never count as sluglines.
pub struct ScreenplayStrategy;

impl ScreenplayStrategy {
    fn is_slugline(line: &str) -> bool {
        slugline_re().is_match(line)
    }

    fn is_transition(line: &str) -> bool {
        transition_re().is_match(line.trim())
    }

    fn is_character_cue(line: &str, next: Option<&str>) -> bool {
        let trimmed = line.trim();
        if trimmed.is_empty() || Self::is_slugline(line) || Self::is_transition(line) {
            return false;
        }
        if !cue_re().is_match(trimmed) {
            return false;
        }
        // A cue introduces dialogue on the following line
        matches!(next, Some(n) if !is_blank(n))
    }
}

impl SegmentStrategy for ScreenplayStrategy {
    fn name(&self) -> &'static str {
        "screenplay"
    }

    fn segment(&self, text: &str) -> Vec<SceneSpan> {
        let char_count = text.chars().count();
        let lines = lines_with_offsets(text);
        let mut boundaries = Vec::new();

        for line in &lines {
            if Self::is_slugline(line.content) {
                boundaries.push(Boundary {
                    at: line.start,
                    heading: Some(line.content.trim().to_string()),
                });
            } else if Self::is_transition(line.content) {
                boundaries.push(Boundary {
                    at: line.start + line.char_len,
                    heading: None,
                });
            }
        }

        assemble(char_count, boundaries)
    }
}

/// Character-cue lines in order of appearance: short all-capitals lines
/// immediately followed by dialogue. Later-usable metadata for collaborators
/// that want speaker attribution.
pub fn character_cues(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut cues = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let next = lines.get(i + 1).copied();
        if ScreenplayStrategy::is_character_cue(line, next) {
            cues.push(line.trim().to_string());
        }
    }
    cues
}

// ---------------------------------------------------------------------------
// pdf_pages: strict sentinel split
// ---------------------------------------------------------------------------

/// Page-break sentinel inserted upstream by the page-extraction collaborator.
pub const PAGE_BREAK_SENTINEL: &str = "[[PAGE_BREAK]]";

/// Strict 1:1 split on page-break sentinel lines: every inter-sentinel run is
/// exactly one scene regardless of content. The sentinel line attaches to the
/// page it ends.
pub struct PdfPagesStrategy;

impl SegmentStrategy for PdfPagesStrategy {
    fn name(&self) -> &'static str {
        "pdf_pages"
    }

    fn segment(&self, text: &str) -> Vec<SceneSpan> {
        let char_count = text.chars().count();
        let mut boundaries = Vec::new();

        for line in &lines_with_offsets(text) {
            if line.content.trim() == PAGE_BREAK_SENTINEL {
                boundaries.push(Boundary {
                    at: line.start + line.char_len,
                    heading: None,
                });
            }
        }

        assemble(char_count, boundaries)
    }
}
