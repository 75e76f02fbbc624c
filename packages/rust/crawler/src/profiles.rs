//! Site profiles: named bundles of content extraction rules.
//!
//! A profile tells the fetcher which part of a page is content and which
//! parts are site chrome. Three profiles are built in; more can be declared
//! under `[profiles.<name>]` in the config file, and a config entry with a
//! built-in name replaces the built-in.

use std::collections::BTreeMap;

use sitekb_markdown::ConvertOptions;
use sitekb_shared::{Result, SiteKbError, SiteProfileConfig};

/// Link density above which a markdown block is pruned by the built-in
/// WordPress profiles.
const DEFAULT_PRUNING_THRESHOLD: f64 = 0.48;

const ELEMENTOR_TARGETS: &[&str] = &[
    "main",
    "article",
    "#content",
    ".entry-content",
    ".elementor-location-single",
    ".elementor-widget-theme-post-content",
    ".e-n-tabs-content",
    ".elementor-tab-content",
    ".elementor-widget-text-editor",
];

const ELEMENTOR_EXCLUDED: &[&str] = &[
    "#masthead",
    "#colophon",
    ".site-header",
    ".site-footer",
    ".widget",
    ".sidebar",
    ".breadcrumbs",
    ".menu",
    ".elementor-location-header",
    ".elementor-location-footer",
    ".elementor-nav-menu",
    ".elementor-menu",
    ".elementor-icon-list",
    ".elementor-widget-social-icons",
    ".elementor-share-buttons",
];

/// Extraction rules for one site template.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteProfile {
    pub name: String,
    pub target_selectors: Vec<String>,
    pub excluded_tags: Vec<String>,
    pub excluded_selectors: Vec<String>,
    pub pruning_threshold: Option<f64>,
}

impl SiteProfile {
    /// Whole body, chrome tags removed, no pruning.
    pub fn generic() -> Self {
        Self {
            name: "generic".into(),
            target_selectors: Vec::new(),
            excluded_tags: strings(&["header", "footer", "nav", "aside", "script", "style"]),
            excluded_selectors: Vec::new(),
            pruning_threshold: None,
        }
    }

    pub fn wordpress_elementor() -> Self {
        Self {
            name: "wordpress_elementor".into(),
            target_selectors: strings(ELEMENTOR_TARGETS),
            excluded_tags: strings(&["header", "footer", "nav", "form", "aside"]),
            excluded_selectors: strings(ELEMENTOR_EXCLUDED),
            pruning_threshold: Some(DEFAULT_PRUNING_THRESHOLD),
        }
    }

    /// Elementor rules plus the extra chrome of the medical faculty site.
    pub fn med_unne() -> Self {
        let mut targets = strings(ELEMENTOR_TARGETS);
        targets.extend(strings(&[".post-content", ".page-content"]));

        let mut excluded = strings(ELEMENTOR_EXCLUDED);
        excluded.extend(strings(&[
            ".nav-menu",
            ".navigation",
            ".social-links",
            ".share-buttons",
            ".comments",
            ".comment-form",
            ".post-meta",
            ".entry-meta",
            ".ad",
            ".advertisement",
            ".popup",
            ".modal",
        ]));

        Self {
            name: "med_unne".into(),
            target_selectors: targets,
            excluded_tags: strings(&[
                "header", "footer", "nav", "aside", "form", "script", "style", "noscript", "menu",
            ]),
            excluded_selectors: excluded,
            pruning_threshold: Some(DEFAULT_PRUNING_THRESHOLD),
        }
    }

    fn from_config(name: &str, cfg: &SiteProfileConfig) -> Self {
        Self {
            name: name.to_string(),
            target_selectors: cfg.target_selectors.clone(),
            excluded_tags: cfg.excluded_tags.clone(),
            excluded_selectors: cfg.excluded_selectors.clone(),
            pruning_threshold: cfg.pruning_threshold,
        }
    }

    /// Converter options for a page at `url`.
    pub fn convert_options(&self, url: &str) -> ConvertOptions {
        ConvertOptions {
            source_url: url.to_string(),
            target_selectors: self.target_selectors.clone(),
            excluded_tags: self.excluded_tags.clone(),
            excluded_selectors: self.excluded_selectors.clone(),
            pruning_threshold: self.pruning_threshold,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Lookup table of profiles by name.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, SiteProfile>,
}

impl ProfileRegistry {
    /// Built-in profiles only.
    pub fn new() -> Self {
        let profiles = [
            SiteProfile::generic(),
            SiteProfile::wordpress_elementor(),
            SiteProfile::med_unne(),
        ]
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect();
        Self { profiles }
    }

    /// Built-in profiles overlaid with the ones declared in config.
    pub fn with_config(configured: &BTreeMap<String, SiteProfileConfig>) -> Self {
        let mut registry = Self::new();
        for (name, cfg) in configured {
            registry
                .profiles
                .insert(name.clone(), SiteProfile::from_config(name, cfg));
        }
        registry
    }

    pub fn get(&self, name: &str) -> Result<SiteProfile> {
        self.profiles.get(name).cloned().ok_or_else(|| {
            SiteKbError::config(format!(
                "unknown site profile {name:?} (available: {})",
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}
