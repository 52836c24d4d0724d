//! Response-quality classification
//!
//! Heuristic detection of block/challenge pages and content-free "shell"
//! responses. This is a classifier, not a guarantee: legitimate short pages
//! can trip it and well-disguised blocks can slip through; the strategy
//! engine treats its verdicts as escalation signals, never as hard errors.

use scraper::{Html, Selector};

use crate::policy::FetchPolicy;

/// Title phrases typical of anti-bot interstitials and denial pages.
const BLOCK_TITLE_PHRASES: &[&str] = &[
    "just a moment",
    "attention required",
    "access denied",
    "forbidden",
    "are you a human",
    "verify you are human",
    "captcha",
    "please enable cookies",
    "request blocked",
];

/// Body markers of CDN challenge scripts. Each only counts when "captcha"
/// appears in the same body.
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_",
    "challenge-platform",
];

/// Stateless classifier for fetched HTML bodies.
///
/// The phrase and marker sets ship with built-in defaults and can be
/// extended per instance; no authoritative list exists, so deployments
/// tune them as new challenge variants show up.
#[derive(Debug, Clone)]
pub struct BlockDetector {
    title_phrases: Vec<String>,
    challenge_markers: Vec<String>,
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self {
            title_phrases: BLOCK_TITLE_PHRASES.iter().map(|s| s.to_string()).collect(),
            challenge_markers: CHALLENGE_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl BlockDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a title phrase to match against (stored lowercased).
    pub fn with_title_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.title_phrases.push(phrase.into().to_lowercase());
        self
    }

    /// Add a CDN-challenge body marker (stored lowercased).
    pub fn with_challenge_marker(mut self, marker: impl Into<String>) -> Self {
        self.challenge_markers.push(marker.into().to_lowercase());
        self
    }

    /// Does this body look like a block or challenge page?
    pub fn looks_blocked(&self, html: &str) -> bool {
        if let Some(title) = page_title(html) {
            let title = title.to_lowercase();
            if self.title_phrases.iter().any(|p| title.contains(p)) {
                return true;
            }
        }

        let body = html.to_lowercase();
        body.contains("captcha")
            && self
                .challenge_markers
                .iter()
                .any(|marker| body.contains(marker))
    }

    /// Is this body unusable under the given policy?
    ///
    /// Any one signal suffices: empty body, block/challenge page, required
    /// marker missing, or body shorter than the policy minimum.
    pub fn looks_shell_or_bad(&self, policy: &FetchPolicy, html: &str) -> bool {
        if html.trim().is_empty() {
            return true;
        }
        if self.looks_blocked(html) {
            return true;
        }
        if let Some(marker) = &policy.must_contain {
            if !html.to_lowercase().contains(&marker.to_lowercase()) {
                return true;
            }
        }
        if let Some(min_len) = policy.min_len {
            if html.len() < min_len {
                return true;
            }
        }
        false
    }
}

/// First `<title>` of the document, whitespace-collapsed.
fn page_title(html: &str) -> Option<String> {
    let selector = Selector::parse("title").expect("valid selector");
    let document = Html::parse_document(html);
    let element = document.select(&selector).next()?;
    let raw: String = element.text().collect();
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{FetchPolicy, FetchStrategy};

    fn policy(min_len: Option<usize>, must_contain: Option<&str>) -> FetchPolicy {
        FetchPolicy {
            strategy: FetchStrategy::JsIfShell,
            timeout_s: None,
            min_len,
            must_contain: must_contain.map(|s| s.to_string()),
            fail_threshold: 2,
            max_retries: None,
            backoff_base_s: None,
        }
    }

    #[test]
    fn test_challenge_title_blocked() {
        let html = "<html><head><title>Just a Moment...</title></head><body></body></html>";
        assert!(BlockDetector::new().looks_blocked(html));
    }

    #[test]
    fn test_product_title_not_blocked() {
        let html = "<html><head><title>Laptop ASUS ROG Strix — ofertă</title></head>\
                    <body>Specificații complete</body></html>";
        assert!(!BlockDetector::new().looks_blocked(html));
    }

    #[test]
    fn test_title_whitespace_collapsed() {
        let html = "<html><head><title>\n  Attention\n   Required!  </title></head></html>";
        assert!(BlockDetector::new().looks_blocked(html));
    }

    #[test]
    fn test_challenge_marker_needs_captcha_cooccurrence() {
        let detector = BlockDetector::new();
        let with_both =
            "<html><body><div id=\"cf-browser-verification\">solve the captcha</div></body></html>";
        let marker_only =
            "<html><body><div id=\"cf-browser-verification\">checking</div></body></html>";
        assert!(detector.looks_blocked(with_both));
        assert!(!detector.looks_blocked(marker_only));
    }

    #[test]
    fn test_short_body_is_shell_without_block_title() {
        let detector = BlockDetector::new();
        let html = "<html><head><title>Rezultate</title></head><body>scurt</body></html>";
        assert!(detector.looks_shell_or_bad(&policy(Some(15_000), None), html));
    }

    #[test]
    fn test_good_body_passes_all_thresholds() {
        let detector = BlockDetector::new();
        let filler = "anunțuri ".repeat(2_000);
        let html = format!(
            "<html><head><title>Anunțuri laptopuri</title></head>\
             <body><a href=\"/anunt/laptop-1\">laptop</a>{filler}</body></html>"
        );
        assert!(!detector.looks_shell_or_bad(&policy(Some(15_000), Some("/anunt/")), &html));
    }

    #[test]
    fn test_missing_required_marker() {
        let detector = BlockDetector::new();
        let filler = "x".repeat(20_000);
        let html = format!("<html><head><title>Listă</title></head><body>{filler}</body></html>");
        assert!(detector.looks_shell_or_bad(&policy(None, Some("/anunt/")), &html));
    }

    #[test]
    fn test_must_contain_case_insensitive() {
        let detector = BlockDetector::new();
        let html = "<html><body><a href=\"/ANUNT/laptop\">ofertă</a></body></html>";
        assert!(!detector.looks_shell_or_bad(&policy(None, Some("/anunt/")), html));
    }

    #[test]
    fn test_empty_body_is_shell() {
        let detector = BlockDetector::new();
        assert!(detector.looks_shell_or_bad(&policy(None, None), ""));
        assert!(detector.looks_shell_or_bad(&policy(None, None), "   \n "));
    }

    #[test]
    fn test_custom_phrase_extension() {
        let detector = BlockDetector::new().with_title_phrase("suspicious activity");
        let html = "<html><head><title>Suspicious Activity Detected</title></head></html>";
        assert!(detector.looks_blocked(html));
        assert!(!BlockDetector::new().looks_blocked(html));
    }
}
