//! Post-conversion cleanup and pruning for Markdown output.
//!
//! Each pass is a `&str -> String` function applied in sequence.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)(?:\s+[^)]*)?\)").expect("valid regex"));

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid regex"));

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let md = normalize_headings(md);
    let md = outside_code_blocks(&md, strip_leftover_html);
    let md = resolve_links(&md, base_url);
    let md = normalize_whitespace(&md);
    let md = collapse_blank_lines(&md);
    ensure_trailing_newline(&md)
}

// ---------------------------------------------------------------------------
// Link density
// ---------------------------------------------------------------------------

/// Share of non-whitespace characters that belong to markdown links.
///
/// Images count as links. Returns 0.0 for text without visible characters.
pub fn link_density(text: &str) -> f64 {
    let total = non_ws_len(text);
    if total == 0 {
        return 0.0;
    }
    let linked: usize = LINK_RE.find_iter(text).map(|m| non_ws_len(m.as_str())).sum();
    // A leading `!` on images is not inside the match.
    linked.min(total) as f64 / total as f64
}

fn non_ws_len(s: &str) -> usize {
    s.chars().filter(|c| !c.is_whitespace()).count()
}

/// Drop blank-line separated blocks whose link density exceeds `threshold`.
///
/// Headings and anything inside fenced code are always kept.
pub fn prune_link_dense_blocks(md: &str, threshold: f64) -> String {
    let mut kept = Vec::new();
    let mut in_code = false;

    for block in md.split("\n\n") {
        let fences = block
            .lines()
            .filter(|l| l.trim_start().starts_with("```"))
            .count();
        let touches_code = in_code || fences > 0;
        if fences % 2 == 1 {
            in_code = !in_code;
        }

        let is_heading = HEADING_RE.is_match(block.trim());
        if touches_code || is_heading || link_density(block) <= threshold {
            kept.push(block);
        }
    }

    ensure_trailing_newline(&kept.join("\n\n"))
}

// ---------------------------------------------------------------------------
// Passes
// ---------------------------------------------------------------------------

/// Keep the first H1 and demote any later ones to H2.
fn normalize_headings(md: &str) -> String {
    let mut seen_h1 = false;
    md.lines()
        .map(|line| match HEADING_RE.captures(line) {
            Some(caps) if &caps[1] == "#" => {
                if seen_h1 {
                    format!("## {}", &caps[2])
                } else {
                    seen_h1 = true;
                    line.to_string()
                }
            }
            _ => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Apply a per-line pass only outside fenced code blocks.
fn outside_code_blocks(md: &str, pass: fn(&str) -> String) -> String {
    let mut in_code = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code = !in_code;
                line.to_string()
            } else if in_code {
                line.to_string()
            } else {
                pass(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove layout tags that survived conversion, keeping their text.
fn strip_leftover_html(line: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary|font|center)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    HTML_TAG_RE.replace_all(line, "").to_string()
}

/// Resolve relative link targets against the page URL. Images, anchors,
/// `mailto:`, and absolute links are left alone.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    let Some(base) = base_url else {
        return md.to_string();
    };

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let (Some(whole), Some(href)) = (caps.get(0), caps.get(2)) else {
                return caps[0].to_string();
            };
            let target = href.as_str();
            let is_image = whole.start() > 0 && md.as_bytes()[whole.start() - 1] == b'!';

            if is_image || target.starts_with('#') || target.contains(':') {
                return whole.as_str().to_string();
            }
            match base.join(target) {
                Ok(resolved) => {
                    let text = whole.as_str();
                    let from = href.start() - whole.start();
                    let to = href.end() - whole.start();
                    format!("{}{}{}", &text[..from], resolved, &text[to..])
                }
                Err(_) => whole.as_str().to_string(),
            }
        })
        .to_string()
}

/// Trim trailing whitespace and turn non-breaking spaces into spaces.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.replace('\u{a0}', " ").trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of blank lines into a single blank line.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE
        .replace_all(md.trim_start_matches('\n'), "\n\n")
        .to_string()
}

/// Ensure the text ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    format!("{}\n", md.trim_end_matches('\n'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_h1_demoted() {
        let input = "# Title\n\ntext\n\n# Another";
        assert_eq!(normalize_headings(input), "# Title\n\ntext\n\n## Another");
    }

    #[test]
    fn leftover_html_stripped_outside_code() {
        let input = "<div class=\"note\">Importante</div>\n```html\n<div>kept</div>\n```";
        let result = outside_code_blocks(input, strip_leftover_html);
        assert!(result.starts_with("Importante\n"));
        assert!(result.contains("<div>kept</div>"));
    }

    #[test]
    fn relative_links_resolved() {
        let base = Url::parse("https://example.com/carreras/medicina").unwrap();
        assert_eq!(
            resolve_links("[Plan](/plan/)", Some(&base)),
            "[Plan](https://example.com/plan/)"
        );
        assert_eq!(resolve_links("[S](#s)", Some(&base)), "[S](#s)");
        assert_eq!(
            resolve_links("[M](mailto:a@b.c)", Some(&base)),
            "[M](mailto:a@b.c)"
        );
        assert_eq!(
            resolve_links("![img](logo.png)", Some(&base)),
            "![img](logo.png)"
        );
    }

    #[test]
    fn blank_lines_collapsed_and_newline_added() {
        let result = run_pipeline("\n\nA   \n\n\n\n\nB", None);
        assert_eq!(result, "A\n\nB\n");
    }

    #[test]
    fn link_density_bounds() {
        assert_eq!(link_density(""), 0.0);
        assert_eq!(link_density("   "), 0.0);
        assert!(link_density("plain prose without links") < f64::EPSILON);
        let nav = "[Inicio](/) [Carreras](/c) [Contacto](/x)";
        assert!((link_density(nav) - 1.0).abs() < 1e-9);
        let mixed = "Consulte el [reglamento](/r) antes de inscribirse en la carrera.";
        let d = link_density(mixed);
        assert!(d > 0.0 && d < 0.5, "density {d}");
    }

    #[test]
    fn pruning_keeps_headings_and_code() {
        let md = "## [Menu](/m)\n\n[a](/a) [b](/b)\n\nTexto normal.\n\n```\n[x](/x)\n```\n";
        let result = prune_link_dense_blocks(md, 0.5);
        assert!(result.contains("## [Menu](/m)"));
        assert!(!result.contains("[a](/a)"));
        assert!(result.contains("Texto normal."));
        assert!(result.contains("[x](/x)"));
    }
}
