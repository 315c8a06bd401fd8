use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::browser::PageScanner;
use crate::models::{DetectionMethod, ImageInfo};

// ── Constants ────────────────────────────────────────────────────────────────

/// Images with a known width or height below this are treated as icons.
pub const MIN_DIMENSION: u32 = 50;

// ── Lazy static regexes ──────────────────────────────────────────────────────

static CSS_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)]*?))\s*\)"#).unwrap()
});

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("URL is required")]
    MissingUrl,
    #[error("{0}")]
    InvalidUrl(String),
    #[error("Failed to launch browser: {0}")]
    Launch(String),
    #[error("Browser error: {0}")]
    Browser(String),
    #[error("Navigation failed: {0}")]
    Navigation(String),
    #[error("Navigation timeout of {} ms exceeded", .0.as_millis())]
    Timeout(Duration),
    #[error("Page evaluation failed: {0}")]
    Script(String),
}

// ── Raw scan types (produced by the in-page collector) ───────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCandidate {
    pub method: DetectionMethod,
    pub value: String,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageScan {
    pub page_url: String,
    #[serde(default)]
    pub candidates: Vec<RawCandidate>,
}

// ── Public API ───────────────────────────────────────────────────────────────

pub async fn extract_images(
    scanner: &dyn PageScanner,
    url: &str,
) -> Result<Vec<ImageInfo>, ExtractionError> {
    let target = validate_url(url)?;
    let scan = scanner.scan(&target).await?;
    let images = collect_images(&scan, &target);
    tracing::debug!(
        candidates = scan.candidates.len(),
        images = images.len(),
        "interpreted page scan for {}",
        target
    );
    Ok(images)
}

// ── URL validation ───────────────────────────────────────────────────────────

pub fn validate_url(url: &str) -> Result<Url, ExtractionError> {
    let parsed = Url::parse(url.trim())
        .map_err(|_| ExtractionError::InvalidUrl("Invalid URL".to_string()))?;
    if !is_http(&parsed) {
        return Err(ExtractionError::InvalidUrl(
            "Only http and https URLs are allowed".to_string(),
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ExtractionError::InvalidUrl(
            "URL must include a host".to_string(),
        ));
    }
    Ok(parsed)
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

// ── Candidate interpretation ─────────────────────────────────────────────────

/// Turn the collector's raw findings into the final image list: resolve every
/// reference against the page, keep http(s) only, drop icons, then dedupe by
/// exact URL keeping the first hit in detection order.
pub fn collect_images(scan: &PageScan, fallback_base: &Url) -> Vec<ImageInfo> {
    let base = Url::parse(&scan.page_url)
        .ok()
        .filter(is_http)
        .unwrap_or_else(|| fallback_base.clone());

    let mut seen: HashSet<String> = HashSet::new();
    let mut images = Vec::new();

    for candidate in &scan.candidates {
        let width = candidate.width.filter(|w| *w > 0);
        let height = candidate.height.filter(|h| *h > 0);
        if is_too_small(width, height) {
            continue;
        }

        let alt = candidate
            .alt
            .as_deref()
            .map(normalize_text)
            .filter(|s| !s.is_empty());

        for reference in candidate_references(candidate) {
            let Some(src) = resolve_reference(&base, &reference) else {
                continue;
            };
            if !seen.insert(src.clone()) {
                continue;
            }
            images.push(ImageInfo {
                src,
                alt: alt.clone(),
                method: candidate.method,
                width,
                height,
            });
        }
    }

    images
}

fn is_too_small(width: Option<u32>, height: Option<u32>) -> bool {
    width.is_some_and(|w| w < MIN_DIMENSION) || height.is_some_and(|h| h < MIN_DIMENSION)
}

fn candidate_references(candidate: &RawCandidate) -> Vec<String> {
    let value = candidate.value.trim();
    match candidate.method {
        DetectionMethod::ImgTag => vec![value.to_string()],
        DetectionMethod::CssBackground => css_urls(value),
        DetectionMethod::PictureSrcset => best_src_from_srcset(value).into_iter().collect(),
        DetectionMethod::LazyData => {
            let is_srcset = candidate
                .attribute
                .as_deref()
                .is_some_and(|a| a.to_ascii_lowercase().ends_with("srcset"));
            if is_srcset {
                best_src_from_srcset(value).into_iter().collect()
            } else if CSS_URL_RE.is_match(value) {
                css_urls(value)
            } else {
                vec![value.to_string()]
            }
        }
    }
}

fn resolve_reference(base: &Url, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    let resolved = base.join(reference).ok()?;
    is_http(&resolved).then(|| resolved.to_string())
}

// ── CSS helpers ──────────────────────────────────────────────────────────────

/// Every `url(...)` reference in a CSS value, in order. Gradients and other
/// layers are ignored.
fn css_urls(value: &str) -> Vec<String> {
    CSS_URL_RE
        .captures_iter(value)
        .filter_map(|cap| {
            cap.get(1)
                .or_else(|| cap.get(2))
                .or_else(|| cap.get(3))
                .map(|m| m.as_str().trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

// ── srcset helpers ───────────────────────────────────────────────────────────

/// Split a `srcset` into `(url, descriptor)` pairs. URLs are whitespace
/// delimited so commas inside them (CDN transforms, data URIs) survive.
fn parse_srcset(srcset: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut rest = srcset;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let url_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (raw_url, after) = rest.split_at(url_end);
        let url = raw_url.trim_end_matches(',');

        let (descriptor, next) = if url.len() < raw_url.len() {
            ("", after)
        } else {
            match after.find(',') {
                Some(i) => (&after[..i], &after[i + 1..]),
                None => (after, ""),
            }
        };

        if !url.is_empty() {
            entries.push((url.to_string(), descriptor.trim().to_string()));
        }
        rest = next;
    }

    entries
}

fn descriptor_score(descriptor: &str) -> f64 {
    descriptor
        .split_whitespace()
        .find_map(|d| {
            d.strip_suffix('w')
                .or_else(|| d.strip_suffix('x'))
                .and_then(|n| n.parse::<f64>().ok())
        })
        .unwrap_or(0.0)
}

/// Largest `w`/`x` candidate of a `srcset`; the earliest wins on ties.
fn best_src_from_srcset(srcset: &str) -> Option<String> {
    let mut best: Option<(f64, String)> = None;
    for (url, descriptor) in parse_srcset(srcset) {
        let score = descriptor_score(&descriptor);
        match &best {
            Some((top, _)) if *top >= score => {}
            _ => best = Some((score, url)),
        }
    }
    best.map(|(_, url)| url)
}

// ── Text helpers ─────────────────────────────────────────────────────────────

/// Collapse whitespace and trim.
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
