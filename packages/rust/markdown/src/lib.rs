//! HTML-to-Markdown conversion, cleanup passes, and the heading-aware splitter.
//!
//! Converts raw HTML pages to clean Markdown using the `htmd` crate, after
//! narrowing the page to the content a site profile selects. A cleanup
//! pipeline then normalizes headings, whitespace, code blocks, and links, and
//! optionally prunes link-dense blocks.

mod cleanup;
pub mod splitter;

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use sitekb_shared::{Result, SiteKbError};

pub use cleanup::{link_density, prune_link_dense_blocks};
pub use splitter::{SplitterConfig, TextChunk, count_tokens, split};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of converting an HTML page to Markdown.
#[derive(Debug, Clone)]
pub struct ConvertResult {
    /// The Markdown body (no front matter).
    pub markdown: String,
    /// `<title>` text, else the first H1, else "Untitled".
    pub title: String,
}

/// Options for the HTML-to-Markdown conversion.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Source URL used for resolving relative links.
    pub source_url: String,
    /// Content containers. All matches are concatenated in document order.
    /// Empty, or no match, falls back to `main`/`article`/`body`.
    pub target_selectors: Vec<String>,
    /// Tag names removed from the content before conversion.
    pub excluded_tags: Vec<String>,
    /// Selectors removed from the content before conversion.
    pub excluded_selectors: Vec<String>,
    /// Drop markdown blocks whose link density exceeds this.
    pub pruning_threshold: Option<f64>,
}

impl ConvertOptions {
    /// Options with no profile rules.
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert an HTML page to clean Markdown.
///
/// 1. Selects the content HTML per the target selectors
/// 2. Removes excluded tags and selectors
/// 3. Pre-processes HTML tables into markdown tables
/// 4. Converts HTML → Markdown via `htmd`
/// 5. Runs the cleanup pipeline, then link-density pruning if enabled
#[instrument(skip(html, opts), fields(url = %opts.source_url))]
pub fn convert(html: &str, opts: &ConvertOptions) -> Result<ConvertResult> {
    let doc = Html::parse_document(html);

    let content_html = extract_content_html(&doc, &opts.target_selectors)?;

    let mut excluded: Vec<&str> = opts.excluded_tags.iter().map(String::as_str).collect();
    excluded.extend(opts.excluded_selectors.iter().map(String::as_str));
    let content_html = strip_selectors(&content_html, &excluded)?;

    let content_html = preprocess_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "iframe", "noscript", "svg"])
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| SiteKbError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    let base_url = Url::parse(&opts.source_url).ok();
    let mut cleaned = cleanup::run_pipeline(&raw_markdown, base_url.as_ref());

    if let Some(threshold) = opts.pruning_threshold {
        let pruned = prune_link_dense_blocks(&cleaned, threshold);
        debug!(
            before = cleaned.len(),
            after = pruned.len(),
            threshold,
            "pruned link-dense blocks"
        );
        cleaned = pruned;
    }

    let title = extract_html_title(&doc)
        .or_else(|| extract_title_from_markdown(&cleaned))
        .unwrap_or_else(|| "Untitled".to_string());

    debug!(
        title = %title,
        word_count = count_words(&cleaned),
        final_len = cleaned.len(),
        "conversion complete"
    );

    Ok(ConvertResult {
        markdown: cleaned,
        title,
    })
}

/// Generate a URL-safe slug from a title.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

// ---------------------------------------------------------------------------
// Content selection
// ---------------------------------------------------------------------------

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| SiteKbError::parse(format!("invalid selector {s:?}: {e}")))
}

/// Pick the content HTML: every outermost match of the target selectors in
/// document order, else the first common content container, else the body.
fn extract_content_html(doc: &Html, targets: &[String]) -> Result<String> {
    if !targets.is_empty() {
        let selector = parse_selector(&targets.join(", "))?;
        let matched: Vec<_> = doc.select(&selector).collect();
        let ids: HashSet<_> = matched.iter().map(|el| el.id()).collect();
        let outermost: Vec<String> = matched
            .iter()
            .filter(|el| !el.ancestors().any(|a| ids.contains(&a.id())))
            .map(|el| el.html())
            .collect();
        if !outermost.is_empty() {
            return Ok(outermost.join("\n"));
        }
        debug!(?targets, "no target selector matched, using fallback containers");
    }

    for sel_str in ["main", "article", "[role=\"main\"]", ".content", "body"] {
        let selector = parse_selector(sel_str)?;
        if let Some(el) = doc.select(&selector).next() {
            return Ok(el.inner_html());
        }
    }

    Ok(doc.root_element().inner_html())
}

/// Remove every element matching one of `selectors` from an HTML fragment.
fn strip_selectors(html: &str, selectors: &[&str]) -> Result<String> {
    if selectors.is_empty() {
        return Ok(html.to_string());
    }
    let combined = parse_selector(&selectors.join(", "))?;
    let doc = Html::parse_fragment(html);

    let mut result = doc.root_element().inner_html();
    for el in doc.select(&combined) {
        let outer = el.html();
        result = result.replace(&outer, "");
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

/// Convert HTML `<table>` elements to markdown table syntax before htmd
/// conversion, which has no table support.
fn preprocess_tables(html: &str) -> String {
    static TABLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("table").expect("valid selector"));

    let doc = Html::parse_fragment(html);
    if doc.select(&TABLE_SEL).next().is_none() {
        return html.to_string();
    }

    let mut result = doc.root_element().inner_html();
    for table_el in doc.select(&TABLE_SEL) {
        let md_table = html_table_to_markdown(&table_el);
        result = result.replacen(&table_el.html(), &md_table, 1);
    }
    result
}

/// Convert a single HTML table element to a markdown table string.
fn html_table_to_markdown(table: &scraper::ElementRef) -> String {
    static TR_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
    static TH_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("th").expect("valid selector"));
    static TD_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("td").expect("valid selector"));

    let cell_text = |cell: scraper::ElementRef| {
        cell.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;

    for tr in table.select(&TR_SEL) {
        let ths: Vec<String> = tr.select(&TH_SEL).map(cell_text).collect();
        if !ths.is_empty() {
            has_header = true;
            rows.push(ths);
            continue;
        }
        let tds: Vec<String> = tr.select(&TD_SEL).map(cell_text).collect();
        if !tds.is_empty() {
            rows.push(tds);
        }
    }

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let mut md = String::from("\n\n");
    md.push_str(&format!("| {} |\n", rows[0].join(" | ")));
    md.push_str(&format!("| {} |\n", vec!["---"; col_count].join(" | ")));

    let data_start = if has_header { 1 } else { 0 };
    for row in &rows[data_start..] {
        md.push_str(&format!("| {} |\n", row.join(" | ")));
    }

    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn extract_html_title(doc: &Html) -> Option<String> {
    static TITLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("head > title, title").expect("valid selector"));

    doc.select(&TITLE_SEL)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Extract title from the first H1 in the Markdown text.
fn extract_title_from_markdown(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}

/// Count words in Markdown body, excluding code blocks.
fn count_words(md: &str) -> usize {
    static CODE_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

    CODE_BLOCK_RE
        .replace_all(md, "")
        .split_whitespace()
        .filter(|w| !w.starts_with('#') || w.len() > 2)
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
