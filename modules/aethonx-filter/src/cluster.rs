//! Similarity clustering.
//!
//! Groups near-duplicate URLs so large crawl dumps collapse to a handful of
//! representatives. Greedy pairwise clustering: O(n²), acceptable because
//! the pipeline Bloom-dedupes first and clustering can be disabled outright.
//! The Jaccard token signature and representative contract are stable so a
//! min-hash/LSH implementation can replace the scan without API changes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::normalize::sorted_param_keys;
use crate::pattern::PatternExtractor;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterAlgorithm {
    Jaccard,
    Levenshtein,
    Template,
}

impl std::fmt::Display for ClusterAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Jaccard => "jaccard",
            Self::Levenshtein => "levenshtein",
            Self::Template => "template",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ClusterAlgorithm {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "jaccard" => Ok(Self::Jaccard),
            "levenshtein" => Ok(Self::Levenshtein),
            "template" => Ok(Self::Template),
            other => Err(format!("unknown ClusterAlgorithm: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub algorithm: ClusterAlgorithm,
    pub threshold: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            algorithm: ClusterAlgorithm::Jaccard,
            threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCluster {
    pub representative: String,
    pub members: Vec<String>,
    pub count: usize,
    pub confidence: f64,
    pub signature: String,
}

// ---------------------------------------------------------------------------
// Clusterer
// ---------------------------------------------------------------------------

/// Pre-parsed view of one URL, computed once per input.
struct Parsed {
    raw: String,
    host: String,
    path: String,
    tokens: BTreeSet<String>,
    param_count: usize,
    numeric_segments: usize,
    sorted_keys: Vec<String>,
    valid: bool,
}

impl Parsed {
    fn from_raw(raw: &str) -> Self {
        match Url::parse(raw.trim()) {
            Ok(url) if !url.cannot_be_a_base() => {
                let host = url.host_str().unwrap_or_default().to_string();
                let path = url.path().to_string();
                let sorted_keys = sorted_param_keys(&url);
                let mut tokens = BTreeSet::new();
                tokens.insert(format!("host:{host}"));
                let mut numeric_segments = 0;
                for segment in path.split('/').filter(|s| !s.is_empty()) {
                    if segment.chars().all(|c| c.is_ascii_digit()) {
                        numeric_segments += 1;
                    }
                    tokens.insert(format!("path:{segment}"));
                }
                for key in &sorted_keys {
                    tokens.insert(format!("param:{key}"));
                }
                Self {
                    raw: raw.to_string(),
                    host,
                    path,
                    param_count: sorted_keys.len(),
                    sorted_keys,
                    tokens,
                    numeric_segments,
                    valid: true,
                }
            }
            _ => Self {
                raw: raw.to_string(),
                host: String::new(),
                path: String::new(),
                tokens: BTreeSet::new(),
                param_count: 0,
                numeric_segments: 0,
                sorted_keys: Vec::new(),
                valid: false,
            },
        }
    }

    /// Representative preference: shorter, fewer params, fewer numeric ids.
    fn representative_cost(&self) -> usize {
        self.raw.len() + 10 * self.param_count + 5 * self.numeric_segments
    }

    fn signature(&self) -> String {
        if self.sorted_keys.is_empty() {
            format!("{}:{}", self.host, self.path)
        } else {
            format!("{}:{}?{}", self.host, self.path, self.sorted_keys.join(","))
        }
    }
}

pub struct Clusterer {
    config: ClusterConfig,
}

impl Clusterer {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn cluster(&self, urls: &[String]) -> Vec<UrlCluster> {
        match self.config.algorithm {
            ClusterAlgorithm::Template => self.cluster_by_template(urls),
            algorithm => {
                let parsed: Vec<Parsed> = urls.iter().map(|u| Parsed::from_raw(u)).collect();
                let sim = |a: &Parsed, b: &Parsed| -> f64 {
                    match algorithm {
                        ClusterAlgorithm::Jaccard => jaccard(&a.tokens, &b.tokens),
                        ClusterAlgorithm::Levenshtein => {
                            // Edit distance only compares paths; different
                            // hosts never cluster.
                            if a.host != b.host {
                                0.0
                            } else {
                                levenshtein_similarity(&a.path, &b.path)
                            }
                        }
                        ClusterAlgorithm::Template => unreachable!(),
                    }
                };
                self.greedy(parsed, sim)
            }
        }
    }

    /// Greedy skeleton: each unused URL seeds a cluster and absorbs every
    /// later unused URL meeting the threshold. Invalid URLs stay singletons.
    fn greedy(&self, parsed: Vec<Parsed>, sim: impl Fn(&Parsed, &Parsed) -> f64) -> Vec<UrlCluster> {
        let mut used = vec![false; parsed.len()];
        let mut clusters = Vec::new();

        for i in 0..parsed.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            let mut member_idx = vec![i];
            let mut confidence = 1.0f64;
            let mut max_pairwise = 0.0f64;

            if parsed[i].valid {
                for j in (i + 1)..parsed.len() {
                    if used[j] || !parsed[j].valid {
                        continue;
                    }
                    let s = sim(&parsed[i], &parsed[j]);
                    if s >= self.config.threshold {
                        used[j] = true;
                        member_idx.push(j);
                        if s > max_pairwise {
                            max_pairwise = s;
                        }
                    }
                }
            }
            if member_idx.len() > 1 {
                confidence = max_pairwise;
            }

            let rep_idx = *member_idx
                .iter()
                .min_by_key(|&&idx| parsed[idx].representative_cost())
                .unwrap_or(&i);
            clusters.push(UrlCluster {
                representative: parsed[rep_idx].raw.clone(),
                signature: parsed[rep_idx].signature(),
                members: member_idx.iter().map(|&idx| parsed[idx].raw.clone()).collect(),
                count: member_idx.len(),
                confidence,
            });
        }
        clusters
    }

    fn cluster_by_template(&self, urls: &[String]) -> Vec<UrlCluster> {
        let extractor = PatternExtractor::new(1);
        extractor
            .extract(urls)
            .into_iter()
            .map(|group| {
                let parsed: Vec<Parsed> = group.urls.iter().map(|u| Parsed::from_raw(u)).collect();
                let rep = parsed
                    .iter()
                    .min_by_key(|p| p.representative_cost())
                    .expect("template groups are never empty");
                UrlCluster {
                    representative: rep.raw.clone(),
                    signature: rep.signature(),
                    members: group.urls,
                    count: group.count,
                    confidence: 1.0,
                }
            })
            .collect()
    }
}

/// First `min(k, |members|)` members of each cluster, concatenated. Used to
/// prune large clusters to a small coverage sample.
pub fn select_top_k(clusters: &[UrlCluster], k: usize) -> Vec<String> {
    clusters
        .iter()
        .flat_map(|c| c.members.iter().take(k).cloned())
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Wagner–Fischer with the single-row optimisation.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut prev = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            let next = (prev + cost).min(row[j] + 1).min(row[j + 1] + 1);
            prev = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}

fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max = a.chars().count().max(b.chars().count());
    if max == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max as f64
}
