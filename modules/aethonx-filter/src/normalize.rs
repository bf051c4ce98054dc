//! URL normalizer.
//!
//! Canonicalises URLs under layered strategies and emits the dedup
//! signature. Basic is always applied; Structural/Parametric/Extensionless
//! add rewrites on top; Aggressive composes all four. Path handling is
//! strictly POSIX forward-slash semantics regardless of host OS, since
//! host-style separators break duplicate detection.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::FilterError;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeStrategy {
    Basic,
    Structural,
    Parametric,
    Extensionless,
    Aggressive,
}

impl NormalizeStrategy {
    fn structural(&self) -> bool {
        matches!(self, Self::Structural | Self::Aggressive)
    }
    fn parametric(&self) -> bool {
        matches!(self, Self::Parametric | Self::Aggressive)
    }
    fn extensionless(&self) -> bool {
        matches!(self, Self::Extensionless | Self::Aggressive)
    }
}

impl std::fmt::Display for NormalizeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Basic => "basic",
            Self::Structural => "structural",
            Self::Parametric => "parametric",
            Self::Extensionless => "extensionless",
            Self::Aggressive => "aggressive",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for NormalizeStrategy {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Self::Basic),
            "structural" => Ok(Self::Structural),
            "parametric" => Ok(Self::Parametric),
            "extensionless" => Ok(Self::Extensionless),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!("unknown NormalizeStrategy: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Dynamic segment classification (shared with the pattern extractor)
// ---------------------------------------------------------------------------

static UUID_SEG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid regex")
});
static HEX_SEG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)[0-9a-f]{32,64}$").expect("valid regex"));
static DATE_SEG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"));
static DIGITS_SEG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid regex"));
static TIMESTAMP_SEG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{10,13}$").expect("valid regex"));
static SLUG_SEG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+-[a-z0-9-]+$").expect("valid regex"));

/// Classify a path segment as dynamic, returning its placeholder.
/// Precedence: uuid, date, timestamp, id, hash, slug.
pub fn classify_segment(segment: &str) -> Option<&'static str> {
    if segment.is_empty() {
        return None;
    }
    if UUID_SEG.is_match(segment) {
        return Some("{uuid}");
    }
    if DATE_SEG.is_match(segment) {
        return Some("{date}");
    }
    if DIGITS_SEG.is_match(segment) {
        if TIMESTAMP_SEG.is_match(segment) {
            return Some("{timestamp}");
        }
        return Some("{id}");
    }
    if HEX_SEG.is_match(segment) {
        return Some("{hash}");
    }
    if segment.len() > 10 && SLUG_SEG.is_match(segment) {
        return Some("{slug}");
    }
    None
}

// ---------------------------------------------------------------------------
// Tracking parameters and asset extensions
// ---------------------------------------------------------------------------

const TRACKING_PARAMS: &[&str] = &[
    "gclid",
    "fbclid",
    "msclkid",
    "ref",
    "referrer",
    "source",
    "session_id",
    "sessionid",
    "sid",
    "phpsessid",
    "jsessionid",
    "cb",
    "cache",
    "cachebuster",
    "nocache",
    "_",
    "t",
    "ts",
    "timestamp",
    "v",
    "ver",
    "version",
];

pub fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

const ASSET_EXTENSIONS: &[&str] = &[
    // images
    "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "bmp", "tiff",
    // stylesheets
    "css", "scss", "less",
    // fonts
    "woff", "woff2", "ttf", "eot", "otf",
    // media
    "mp4", "mp3", "avi", "mov", "webm", "wav", "flv",
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // archives
    "zip", "tar", "gz", "rar", "7z", "bz2",
];

pub fn is_asset_extension(ext: &str) -> bool {
    ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizeMetadata {
    pub params_removed: Vec<String>,
    pub segments_rewritten: u32,
    pub extension_rewritten: bool,
}

#[derive(Debug, Clone)]
pub struct NormalizedUrl {
    pub original: String,
    pub canonical: String,
    pub signature: String,
    pub metadata: NormalizeMetadata,
}

pub struct Normalizer {
    strategy: NormalizeStrategy,
}

impl Normalizer {
    pub fn new(strategy: NormalizeStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> NormalizeStrategy {
        self.strategy
    }

    pub fn normalize(&self, raw: &str) -> Result<NormalizedUrl, FilterError> {
        let mut url =
            Url::parse(raw.trim()).map_err(|e| FilterError::Parse(format!("{raw}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(FilterError::Parse(format!("{raw}: not a hierarchical URL")));
        }

        let mut metadata = NormalizeMetadata::default();

        // --- Basic, always ---
        // The parser already lowers scheme and domain hosts and drops default
        // ports; fragment strip and path cleaning are ours.
        url.set_fragment(None);
        if let Some(port) = url.port() {
            let default = match url.scheme() {
                "http" => Some(80),
                "https" => Some(443),
                _ => None,
            };
            if default == Some(port) {
                let _ = url.set_port(None);
            }
        }

        let mut segments = clean_path_segments(url.path());

        // --- Structural ---
        if self.strategy.structural() {
            for segment in segments.iter_mut() {
                if let Some(placeholder) = classify_segment(segment) {
                    *segment = placeholder.to_string();
                    metadata.segments_rewritten += 1;
                }
            }
        }

        // --- Extensionless (applies to the basename only) ---
        if self.strategy.extensionless() {
            if let Some(basename) = segments.last_mut() {
                if let Some(dot) = basename.rfind('.') {
                    let ext = &basename[dot + 1..];
                    if !ext.is_empty() && is_asset_extension(ext) {
                        *basename = format!("{}.{{ext}}", &basename[..dot]);
                        metadata.extension_rewritten = true;
                    }
                }
            }
        }

        let trailing_slash = needs_trailing_slash(&segments);
        let mut path = format!("/{}", segments.join("/"));
        if trailing_slash && path != "/" {
            path.push('/');
        }
        url.set_path(&path);

        // --- Query: parametric removal, then lexicographic key sort ---
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let mut kept: Vec<(String, String)> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            if self.strategy.parametric() {
                if is_tracking_param(&key) {
                    metadata.params_removed.push(key);
                    continue;
                }
                // Surviving parameters keep the key, the value is blanked.
                kept.push((key, String::new()));
            } else {
                kept.push((key, value));
            }
        }
        kept.sort_by(|a, b| a.0.cmp(&b.0));

        if kept.is_empty() {
            url.set_query(None);
        } else {
            let mut q = url.query_pairs_mut();
            q.clear();
            for (key, value) in &kept {
                q.append_pair(key, value);
            }
            drop(q);
        }

        let canonical = url.to_string();
        Ok(NormalizedUrl {
            original: raw.to_string(),
            signature: canonical.clone(),
            canonical,
            metadata,
        })
    }

    /// Normalize a batch, skipping inputs that fail to parse.
    pub fn normalize_batch(&self, urls: &[String]) -> Vec<NormalizedUrl> {
        let mut out = Vec::with_capacity(urls.len());
        for raw in urls {
            match self.normalize(raw) {
                Ok(n) => out.push(n),
                Err(e) => debug!(url = raw.as_str(), error = %e, "skipping unparseable URL"),
            }
        }
        out
    }
}

/// POSIX path cleaning: collapse `//`, resolve `.` and `..` (never above
/// root). Returns the non-empty segments.
fn clean_path_segments(path: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s.to_string()),
        }
    }
    out
}

/// A trailing slash is added when the basename carries no extension.
fn needs_trailing_slash(segments: &[String]) -> bool {
    match segments.last() {
        Some(basename) => !basename_has_extension(basename),
        None => false, // root path is already "/"
    }
}

fn basename_has_extension(basename: &str) -> bool {
    match basename.rfind('.') {
        Some(0) | None => false, // dotfiles have no extension
        Some(dot) => dot + 1 < basename.len(),
    }
}

/// Lexicographically sorted query-key signature, used by the pattern
/// extractor and cluster signatures.
pub fn sorted_param_keys(url: &Url) -> Vec<String> {
    url.query_pairs()
        .map(|(k, _)| k.into_owned())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Decoded parameter map helper for scoring.
pub fn param_map(url: &Url) -> BTreeMap<String, String> {
    url.query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
