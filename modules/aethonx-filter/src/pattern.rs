//! Structural template extraction.
//!
//! Replaces dynamic path segments with placeholders (same classification as
//! the structural normalizer), collapses the query to a sorted key
//! signature, and groups URLs by the resulting template. Templates below the
//! frequency floor are discarded; per-template instance caps keep large
//! groups to a coverage sample.

use std::collections::HashMap;

use url::Url;

use crate::normalize::{classify_segment, sorted_param_keys};

#[derive(Debug, Clone)]
pub struct PatternGroup {
    pub template: String,
    pub urls: Vec<String>,
    pub count: usize,
}

pub struct PatternExtractor {
    min_frequency: usize,
}

impl PatternExtractor {
    pub fn new(min_frequency: usize) -> Self {
        Self {
            min_frequency: min_frequency.max(1),
        }
    }

    /// Template for one URL, or None when it does not parse.
    pub fn template_for(&self, raw: &str) -> Option<String> {
        let url = Url::parse(raw.trim()).ok()?;
        if url.cannot_be_a_base() {
            return None;
        }
        let host = url.host_str().unwrap_or_default();
        let segments: Vec<String> = url
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match classify_segment(s) {
                Some(placeholder) => placeholder.to_string(),
                None => s.to_string(),
            })
            .collect();
        let mut template = format!("{host}/{}", segments.join("/"));
        let keys = sorted_param_keys(&url);
        if !keys.is_empty() {
            template.push('?');
            template.push_str(&keys.join(","));
        }
        Some(template)
    }

    /// Group URLs by template, keeping groups meeting the frequency floor.
    /// Groups come back in first-seen order; URLs keep input order.
    pub fn extract(&self, urls: &[String]) -> Vec<PatternGroup> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for raw in urls {
            let Some(template) = self.template_for(raw) else {
                continue;
            };
            let entry = groups.entry(template.clone()).or_insert_with(|| {
                order.push(template);
                Vec::new()
            });
            entry.push(raw.clone());
        }
        order
            .into_iter()
            .filter_map(|template| {
                let urls = groups.remove(&template)?;
                (urls.len() >= self.min_frequency).then(|| PatternGroup {
                    template,
                    count: urls.len(),
                    urls,
                })
            })
            .collect()
    }

    /// Cap each group to at most `max_per_pattern` URLs, first-seen first.
    pub fn select_representatives(
        groups: Vec<PatternGroup>,
        max_per_pattern: usize,
    ) -> Vec<PatternGroup> {
        groups
            .into_iter()
            .map(|mut g| {
                g.urls.truncate(max_per_pattern);
                g
            })
            .collect()
    }
}
