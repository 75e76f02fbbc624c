//! Heading-aware, token-bounded splitting of a markdown body.
//!
//! Every chunk is a contiguous byte range of the input, so
//! `&body[chunk.start..chunk.end] == chunk.text` always holds. Chunks never
//! overlap and come out in body order.

use std::sync::LazyLock;

use regex::Regex;

use crate::{cleanup::link_density, slugify};

/// Splitter settings.
#[derive(Debug, Clone)]
pub struct SplitterConfig {
    /// Upper bound on [`count_tokens`] for every chunk.
    pub max_tokens: usize,
    /// Link density at or above which a chunk is flagged boilerplate.
    pub boilerplate_link_density: f64,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            boilerplate_link_density: 0.6,
        }
    }
}

/// One chunk candidate produced by [`split`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// Enclosing heading titles, outermost first.
    pub heading_path: Vec<String>,
    /// Slug of the innermost heading.
    pub anchor: Option<String>,
    pub tokens: usize,
    pub is_boilerplate: bool,
}

/// Approximate token count: one token per four characters, rounded up.
pub fn count_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

// ---------------------------------------------------------------------------
// Segmentation
// ---------------------------------------------------------------------------

struct Heading {
    start: usize,
    level: usize,
    title: String,
}

struct Segment {
    start: usize,
    end: usize,
    heading_path: Vec<String>,
}

/// Level 1-3 ATX headings outside fenced code, with their byte offsets.
fn find_headings(body: &str) -> Vec<Heading> {
    static HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,3})[ \t]+(.+?)[ \t#]*$").expect("valid regex"));

    let mut headings = Vec::new();
    let mut offset = 0;
    let mut in_code = false;

    for line in body.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        if content.trim_start().starts_with("```") {
            in_code = !in_code;
        } else if !in_code {
            if let Some(caps) = HEADING_RE.captures(content) {
                headings.push(Heading {
                    start: offset,
                    level: caps[1].len(),
                    title: caps[2].trim().to_string(),
                });
            }
        }
        offset += line.len();
    }

    headings
}

/// One segment per heading, plus a preamble segment for text before the
/// first heading.
fn segments(body: &str) -> Vec<Segment> {
    let headings = find_headings(body);
    let mut out = Vec::with_capacity(headings.len() + 1);

    let first = headings.first().map(|h| h.start).unwrap_or(body.len());
    if first > 0 {
        out.push(Segment {
            start: 0,
            end: first,
            heading_path: Vec::new(),
        });
    }

    let mut stack: Vec<(usize, String)> = Vec::new();
    for (i, heading) in headings.iter().enumerate() {
        while stack.last().is_some_and(|(level, _)| *level >= heading.level) {
            stack.pop();
        }
        stack.push((heading.level, heading.title.clone()));

        let end = headings.get(i + 1).map(|h| h.start).unwrap_or(body.len());
        out.push(Segment {
            start: heading.start,
            end,
            heading_path: stack.iter().map(|(_, t)| t.clone()).collect(),
        });
    }

    out
}

// ---------------------------------------------------------------------------
// Token-bounded pieces
// ---------------------------------------------------------------------------

static PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("valid regex"));
static SENTENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?]["')\]]*[ \t]+|\n"#).expect("valid regex"));
static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Cut `[start, end)` after every match of `re`; the ranges cover the input.
fn cut_after(body: &str, start: usize, end: usize, re: &Regex) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut from = start;
    for m in re.find_iter(&body[start..end]) {
        let cut = start + m.end();
        if cut > from {
            ranges.push((from, cut));
            from = cut;
        }
    }
    if from < end {
        ranges.push((from, end));
    }
    ranges
}

/// Cut `[start, end)` into runs of at most `max_chars` characters.
fn cut_chars(body: &str, start: usize, end: usize, max_chars: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut from = start;
    let mut count = 0;
    for (i, _) in body[start..end].char_indices() {
        if count == max_chars {
            ranges.push((from, start + i));
            from = start + i;
            count = 0;
        }
        count += 1;
    }
    if from < end {
        ranges.push((from, end));
    }
    ranges
}

/// Break `[start, end)` into contiguous units that each fit the budget:
/// paragraphs, then sentences, then words, then raw characters.
fn units(
    body: &str,
    start: usize,
    end: usize,
    max_tokens: usize,
    depth: usize,
) -> Vec<(usize, usize)> {
    if count_tokens(&body[start..end]) <= max_tokens {
        return vec![(start, end)];
    }

    let pieces = match depth {
        0 => cut_after(body, start, end, &PARAGRAPH_RE),
        1 => cut_after(body, start, end, &SENTENCE_RE),
        2 => cut_after(body, start, end, &WORD_RE),
        _ => return cut_chars(body, start, end, max_tokens.max(1) * 4),
    };

    pieces
        .into_iter()
        .flat_map(|(s, e)| units(body, s, e, max_tokens, depth + 1))
        .collect()
}

/// Shrink a range to exclude leading and trailing whitespace.
fn trim_range(body: &str, start: usize, end: usize) -> (usize, usize) {
    let slice = &body[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead == slice.len() {
        return (start, start);
    }
    (start + lead, end - trail)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Split a markdown body into ordered, non-overlapping chunks.
///
/// Units are packed greedily into a chunk until the next one would push the
/// trimmed chunk text over `max_tokens`. Whitespace-only segments yield no
/// chunk.
pub fn split(body: &str, config: &SplitterConfig) -> Vec<TextChunk> {
    let max_tokens = config.max_tokens.max(1);
    let mut chunks = Vec::new();

    let mut emit = |start: usize, end: usize, heading_path: &[String]| {
        let (start, end) = trim_range(body, start, end);
        if start == end {
            return;
        }
        let text = &body[start..end];
        chunks.push(TextChunk {
            index: chunks.len(),
            start,
            end,
            text: text.to_string(),
            heading_path: heading_path.to_vec(),
            anchor: heading_path.last().map(|h| slugify(h)).filter(|s| !s.is_empty()),
            tokens: count_tokens(text),
            is_boilerplate: link_density(text) >= config.boilerplate_link_density,
        });
    };

    for segment in segments(body) {
        let mut current: Option<(usize, usize)> = None;

        for (us, ue) in units(body, segment.start, segment.end, max_tokens, 0) {
            match current {
                None => current = Some((us, ue)),
                Some((cs, ce)) => {
                    let (ts, te) = trim_range(body, cs, ue);
                    if count_tokens(&body[ts..te]) <= max_tokens {
                        current = Some((cs, ue));
                    } else {
                        emit(cs, ce, &segment.heading_path);
                        current = Some((us, ue));
                    }
                }
            }
        }

        if let Some((cs, ce)) = current {
            emit(cs, ce, &segment.heading_path);
        }
    }

    chunks
}
