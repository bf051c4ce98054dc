//! Priority scorer.
//!
//! Accumulates positive and negative deltas from orthogonal detectors over
//! the path and query of a URL. Each detector records a reason tag; the best
//! positive detector decides the category. Detection is case-insensitive
//! substring matching on the path and exact lower-case matching on parameter
//! names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::normalize;

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Score deltas. Caller may replace the whole vector; `Default` carries the
/// tuned values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub sensitive_file: i64,
    pub repository: i64,
    pub backup_file: i64,
    pub admin_path: i64,
    pub database_admin: i64,
    pub auth_path: i64,
    pub config_path: i64,
    pub api_path: i64,
    pub upload_path: i64,
    pub interesting_param: i64,
    pub depth_bonus: i64,
    pub depth_penalty: i64,
    pub common_asset_dir: i64,
    pub tracking_param: i64,
    pub pagination_param: i64,
    pub static_asset: i64,
    pub invalid_url: i64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            sensitive_file: 1000,
            repository: 800,
            backup_file: 600,
            admin_path: 400,
            database_admin: 450,
            auth_path: 350,
            config_path: 300,
            api_path: 300,
            upload_path: 250,
            interesting_param: 100,
            depth_bonus: 50,
            depth_penalty: -150,
            common_asset_dir: -100,
            tracking_param: -100,
            pagination_param: -50,
            static_asset: -200,
            invalid_url: -1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Detection tables
// ---------------------------------------------------------------------------

const SENSITIVE_FILES: &[&str] = &[
    ".env",
    "config.php",
    "wp-config.php",
    "id_rsa",
    "id_dsa",
    ".htpasswd",
    ".htaccess",
    ".git-credentials",
    "credentials.json",
    "secrets.yml",
    "web.config",
    "settings.py",
    "database.yml",
    ".netrc",
    ".pgpass",
    ".npmrc",
];

const REPOSITORY_PATHS: &[&str] = &["/.git", "/.svn", "/.hg", "/.bzr"];

const BACKUP_EXTENSIONS: &[&str] = &[
    "bak", "backup", "old", "orig", "save", "swp", "sql", "dump", "tar.gz", "tgz", "tar", "gz",
    "zip", "rar", "7z",
];

const ADMIN_PATHS: &[&str] = &[
    "/admin",
    "/administrator",
    "/wp-admin",
    "/dashboard",
    "/panel",
    "/console",
    "/manage",
    "/cpanel",
];

const DATABASE_ADMIN_PATHS: &[&str] = &[
    "/phpmyadmin",
    "/adminer",
    "/pgadmin",
    "/dbadmin",
    "/myadmin",
];

const AUTH_PATHS: &[&str] = &[
    "/login", "/logout", "/signin", "/signup", "/register", "/auth", "/oauth", "/sso",
    "/password", "/reset", "/forgot",
];

const CONFIG_PATHS: &[&str] = &["/config", "/configuration", "/settings", "/setup", "/install"];

const API_PATHS: &[&str] = &[
    "/api/", "/v1/", "/v2/", "/v3/", "/graphql", "/rest/", "/swagger", "/openapi", "/api-docs",
];

const UPLOAD_PATHS: &[&str] = &[
    "/upload", "/uploads", "/files", "/attachments", "/import", "/export",
];

const ASSET_DIRS: &[&str] = &[
    "/assets/",
    "/static/",
    "/images/",
    "/img/",
    "/css/",
    "/js/",
    "/fonts/",
    "/media/",
    "/vendor/",
    "/node_modules/",
];

const INTERESTING_PARAMS: &[&str] = &[
    "id", "user", "user_id", "uid", "account", "admin", "debug", "test", "redirect", "url",
    "return", "callback", "next", "file", "path", "dir", "cmd", "exec", "query", "q", "search",
    "token", "key", "api_key", "apikey", "secret", "password", "email", "role", "access",
];

const PAGINATION_PARAMS: &[&str] = &[
    "page", "offset", "limit", "per_page", "page_size", "sort", "order", "start",
];

/// Static asset extensions for scoring. Archives are absent on purpose:
/// they score as backup candidates instead.
const STATIC_ASSET_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "bmp", "css", "scss", "less", "js",
    "map", "woff", "woff2", "ttf", "eot", "otf", "mp4", "mp3", "avi", "mov", "webm", "wav",
];

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Critical => "critical",
            Category::High => "high",
            Category::Medium => "medium",
            Category::Low => "low",
            Category::Info => "info",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlScore {
    pub url: String,
    pub score: i64,
    pub reasons: Vec<String>,
    pub category: Category,
    pub metadata: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Scorer {
    weights: ScoreWeights,
}

impl Scorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn score_url(&self, raw: &str) -> UrlScore {
        let url = match Url::parse(raw.trim()) {
            Ok(u) if !u.cannot_be_a_base() => u,
            _ => {
                return UrlScore {
                    url: raw.to_string(),
                    score: self.weights.invalid_url,
                    reasons: vec!["invalid_url".to_string()],
                    category: Category::Info,
                    metadata: BTreeMap::new(),
                }
            }
        };

        let path = url.path().to_ascii_lowercase();
        let w = &self.weights;
        let mut score = 0i64;
        let mut reasons: Vec<String> = Vec::new();
        let mut metadata = BTreeMap::new();
        let mut category = Category::Info;
        let bump = |cat: Category, current: &mut Category| {
            if cat < *current {
                *current = cat;
            }
        };

        // --- Path detectors ---
        if SENSITIVE_FILES.iter().any(|f| path.contains(f)) {
            score += w.sensitive_file;
            reasons.push("sensitive_file".to_string());
            bump(Category::Critical, &mut category);
        }
        if REPOSITORY_PATHS.iter().any(|p| path.contains(p)) {
            score += w.repository;
            reasons.push("repository".to_string());
            bump(Category::Critical, &mut category);
        }
        if has_backup_extension(&path) {
            score += w.backup_file;
            reasons.push("backup_file".to_string());
            bump(Category::High, &mut category);
        }
        if ADMIN_PATHS.iter().any(|p| path.contains(p)) {
            score += w.admin_path;
            reasons.push("admin_path".to_string());
            bump(Category::High, &mut category);
        }
        if DATABASE_ADMIN_PATHS.iter().any(|p| path.contains(p)) {
            score += w.database_admin;
            reasons.push("database_admin".to_string());
            bump(Category::High, &mut category);
        }
        if AUTH_PATHS.iter().any(|p| path.contains(p)) {
            score += w.auth_path;
            reasons.push("auth_path".to_string());
            bump(Category::Medium, &mut category);
        }
        if CONFIG_PATHS.iter().any(|p| path.contains(p)) {
            score += w.config_path;
            reasons.push("config_path".to_string());
            bump(Category::Medium, &mut category);
        }
        if API_PATHS.iter().any(|p| path.contains(p)) {
            score += w.api_path;
            reasons.push("api_path".to_string());
            bump(Category::Medium, &mut category);
        }
        if UPLOAD_PATHS.iter().any(|p| path.contains(p)) {
            score += w.upload_path;
            reasons.push("upload_path".to_string());
            bump(Category::Medium, &mut category);
        }

        // --- Parameter detectors (exact lower-case key match) ---
        let params = normalize::param_map(&url);
        let interesting: Vec<&str> = params
            .keys()
            .map(|k| k.as_str())
            .filter(|k| INTERESTING_PARAMS.contains(&k.to_ascii_lowercase().as_str()))
            .collect();
        if !interesting.is_empty() {
            score += w.interesting_param * interesting.len() as i64;
            reasons.push("interesting_params".to_string());
            metadata.insert("interesting_params".to_string(), interesting.join(","));
            bump(Category::Low, &mut category);
        }
        if params
            .keys()
            .any(|k| normalize::is_tracking_param(&k.to_ascii_lowercase()))
        {
            score += w.tracking_param;
            reasons.push("tracking_params".to_string());
        }
        if params
            .keys()
            .any(|k| PAGINATION_PARAMS.contains(&k.to_ascii_lowercase().as_str()))
        {
            score += w.pagination_param;
            reasons.push("pagination_params".to_string());
        }

        // --- Structure detectors ---
        let depth = path.split('/').filter(|s| !s.is_empty()).count();
        if (4..=7).contains(&depth) {
            score += w.depth_bonus;
            reasons.push("depth_bonus".to_string());
            bump(Category::Low, &mut category);
        } else if depth > 8 {
            score += w.depth_penalty;
            reasons.push("deep_path".to_string());
        }
        if ASSET_DIRS.iter().any(|d| path.contains(d)) {
            score += w.common_asset_dir;
            reasons.push("common_asset_dir".to_string());
        }
        if has_static_extension(&path) {
            score += w.static_asset;
            reasons.push("static_asset".to_string());
        }

        metadata.insert("category".to_string(), category.to_string());
        metadata.insert("depth".to_string(), depth.to_string());

        UrlScore {
            url: raw.to_string(),
            score,
            reasons,
            category,
            metadata,
        }
    }

    /// Score a batch and order by descending score. The sort is stable, so
    /// ties resolve by first-seen input order.
    pub fn score_batch(&self, urls: &[String]) -> Vec<UrlScore> {
        let mut scored: Vec<UrlScore> = urls.iter().map(|u| self.score_url(u)).collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored
    }
}

fn has_backup_extension(path: &str) -> bool {
    if path.ends_with('~') {
        return true;
    }
    let basename = path.rsplit('/').next().unwrap_or(path);
    BACKUP_EXTENSIONS
        .iter()
        .any(|ext| basename.ends_with(&format!(".{ext}")))
}

fn has_static_extension(path: &str) -> bool {
    let basename = path.rsplit('/').next().unwrap_or(path);
    match basename.rfind('.') {
        Some(dot) => STATIC_ASSET_EXTENSIONS.contains(&&basename[dot + 1..]),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> Scorer {
        Scorer::default()
    }

    #[test]
    fn sensitive_file_is_critical() {
        let s = scorer().score_url("https://example.com/.env");
        assert!(s.score >= 1000, "score {}", s.score);
        assert!(s.reasons.contains(&"sensitive_file".to_string()));
        assert_eq!(s.category, Category::Critical);
    }

    #[test]
    fn static_asset_scores_negative() {
        let s = scorer().score_url("https://example.com/images/logo.png");
        assert!(s.score < 0, "score {}", s.score);
        assert!(s.reasons.contains(&"static_asset".to_string()));
        assert!(s.reasons.contains(&"common_asset_dir".to_string()));
    }

    #[test]
    fn repository_and_backup() {
        let repo = scorer().score_url("https://example.com/.git/config");
        assert!(repo.reasons.contains(&"repository".to_string()));
        assert_eq!(repo.category, Category::Critical);

        let bak = scorer().score_url("https://example.com/db.sql");
        assert!(bak.reasons.contains(&"backup_file".to_string()));
        let tilde = scorer().score_url("https://example.com/index.php~");
        assert!(tilde.reasons.contains(&"backup_file".to_string()));
    }

    #[test]
    fn parameters_count_per_key() {
        let one = scorer().score_url("https://example.com/p?id=1");
        let two = scorer().score_url("https://example.com/p?id=1&token=x");
        assert_eq!(two.score - one.score, 100);
        assert_eq!(two.metadata.get("interesting_params").unwrap(), "id,token");
    }

    #[test]
    fn depth_detectors() {
        let bonus = scorer().score_url("https://example.com/a/b/c/d");
        assert!(bonus.reasons.contains(&"depth_bonus".to_string()));
        let deep = scorer().score_url("https://example.com/a/b/c/d/e/f/g/h/i");
        assert!(deep.reasons.contains(&"deep_path".to_string()));
    }

    #[test]
    fn invalid_url_penalised() {
        let s = scorer().score_url("::::");
        assert_eq!(s.score, -1000);
        assert_eq!(s.reasons, vec!["invalid_url"]);
    }

    #[test]
    fn batch_orders_descending_with_stable_ties() {
        let urls = vec![
            "https://example.com/images/a.png".to_string(),
            "https://example.com/.env".to_string(),
            "https://example.com/first".to_string(),
            "https://example.com/second".to_string(),
        ];
        let out = scorer().score_batch(&urls);
        assert_eq!(out[0].url, "https://example.com/.env");
        assert_eq!(out.last().unwrap().url, "https://example.com/images/a.png");
        // Equal-score URLs keep input order.
        let first = out.iter().position(|s| s.url.ends_with("/first")).unwrap();
        let second = out.iter().position(|s| s.url.ends_with("/second")).unwrap();
        assert!(first < second);
    }

    #[test]
    fn custom_weights_replace_vector() {
        let weights = ScoreWeights {
            sensitive_file: 5,
            ..ScoreWeights::default()
        };
        let s = Scorer::new(weights).score_url("https://example.com/.env");
        assert_eq!(s.score, 5);
    }
}
