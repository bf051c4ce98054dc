//! Filter engine.
//!
//! Orchestrates the reduction pipeline over a batch of raw URLs:
//! volume cap → normalize-and-dedup → score → cluster → pattern-prune →
//! score-threshold. Every stage checks cancellation and returns what has
//! been processed so far. The streaming variant feeds the same pipeline in
//! batches of 1000 URLs or every 2 seconds, whichever comes first.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use aethonx_common::{mem, CancelToken};

use crate::bloom::{BloomFilter, BloomStats};
use crate::cluster::{select_top_k, ClusterConfig, Clusterer};
use crate::normalize::{NormalizeStrategy, Normalizer};
use crate::pattern::PatternExtractor;
use crate::score::{ScoreWeights, Scorer, UrlScore};
use crate::FilterError;

/// Streaming flush triggers: batch size or elapsed time.
const STREAM_BATCH_SIZE: usize = 1000;
const STREAM_BATCH_INTERVAL: Duration = Duration::from_secs(2);

/// How often the hot normalize loop polls the cancellation token.
const CANCEL_POLL_EVERY: usize = 1024;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub enable_volume_control: bool,
    pub max_urls: usize,
    pub use_bloom: bool,
    pub bloom_expected: usize,
    pub bloom_fp_rate: f64,
    pub strategy: NormalizeStrategy,
    pub enable_clustering: bool,
    pub cluster: ClusterConfig,
    pub cluster_top_k: usize,
    pub enable_pattern_filter: bool,
    pub pattern_min_frequency: usize,
    pub max_per_pattern: usize,
    pub min_priority_score: i64,
    pub weights: ScoreWeights,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enable_volume_control: true,
            max_urls: 10_000,
            use_bloom: true,
            bloom_expected: 100_000,
            bloom_fp_rate: 0.01,
            strategy: NormalizeStrategy::Aggressive,
            enable_clustering: true,
            cluster: ClusterConfig::default(),
            cluster_top_k: 3,
            enable_pattern_filter: true,
            pattern_min_frequency: 3,
            max_per_pattern: 5,
            min_priority_score: 0,
            weights: ScoreWeights::default(),
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.enable_volume_control && self.max_urls == 0 {
            return Err(FilterError::Config("max_urls must be positive".to_string()));
        }
        if self.use_bloom {
            if self.bloom_expected == 0 {
                return Err(FilterError::Config(
                    "bloom_expected must be positive".to_string(),
                ));
            }
            if !(self.bloom_fp_rate > 0.0 && self.bloom_fp_rate < 1.0) {
                return Err(FilterError::Config(format!(
                    "bloom_fp_rate must be in (0, 1), got {}",
                    self.bloom_fp_rate
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.cluster.threshold) {
            return Err(FilterError::Config(format!(
                "cluster threshold must be in [0, 1], got {}",
                self.cluster.threshold
            )));
        }
        if self.enable_clustering && self.cluster_top_k == 0 {
            return Err(FilterError::Config(
                "cluster_top_k must be positive".to_string(),
            ));
        }
        if self.enable_pattern_filter && self.max_per_pattern == 0 {
            return Err(FilterError::Config(
                "max_per_pattern must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct FilterStats {
    pub input_count: usize,
    pub output_count: usize,
    pub truncated_by_cap: usize,
    pub invalid_skipped: usize,
    pub duplicates_skipped: usize,
    pub cluster_dropped: usize,
    pub pattern_dropped: usize,
    pub low_priority_skipped: usize,
    pub cluster_count: usize,
    pub pattern_count: usize,
    pub duration: Duration,
    pub memory_delta_bytes: i64,
    pub cancelled: bool,
    pub bloom: Option<BloomStats>,
}

impl FilterStats {
    /// Percentage of input removed, in [0, 100].
    pub fn reduction_ratio(&self) -> f64 {
        if self.input_count == 0 {
            return 0.0;
        }
        let kept = self.output_count.min(self.input_count) as f64;
        (1.0 - kept / self.input_count as f64) * 100.0
    }
}

impl std::fmt::Display for FilterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== URL Filter Complete ===")?;
        writeln!(f, "Input URLs:         {}", self.input_count)?;
        writeln!(f, "Output URLs:        {}", self.output_count)?;
        writeln!(f, "Reduction:          {:.1}%", self.reduction_ratio())?;
        writeln!(f, "Truncated by cap:   {}", self.truncated_by_cap)?;
        writeln!(f, "Invalid skipped:    {}", self.invalid_skipped)?;
        writeln!(f, "Duplicates skipped: {}", self.duplicates_skipped)?;
        writeln!(f, "Cluster dropped:    {}", self.cluster_dropped)?;
        writeln!(f, "Pattern dropped:    {}", self.pattern_dropped)?;
        writeln!(f, "Low priority:       {}", self.low_priority_skipped)?;
        writeln!(f, "Clusters:           {}", self.cluster_count)?;
        writeln!(f, "Patterns:           {}", self.pattern_count)?;
        writeln!(f, "Duration:           {:.2?}", self.duration)?;
        if self.memory_delta_bytes != 0 {
            writeln!(f, "Memory delta:       {} KiB", self.memory_delta_bytes / 1024)?;
        }
        if let Some(bloom) = &self.bloom {
            writeln!(
                f,
                "Bloom:              {} items, fill {:.3}, est fp {:.4}",
                bloom.count, bloom.fill_ratio, bloom.est_fp_rate
            )?;
        }
        if self.cancelled {
            writeln!(f, "(cancelled, partial results)")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FilterOutcome {
    pub urls: Vec<UrlScore>,
    pub stats: FilterStats,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct FilterEngine {
    config: FilterConfig,
    normalizer: Normalizer,
    scorer: Scorer,
    bloom: Option<BloomFilter>,
}

impl FilterEngine {
    pub fn new(config: FilterConfig) -> Result<Self, FilterError> {
        config.validate()?;
        let bloom = if config.use_bloom {
            Some(BloomFilter::new(config.bloom_expected, config.bloom_fp_rate)?)
        } else {
            None
        };
        Ok(Self {
            normalizer: Normalizer::new(config.strategy),
            scorer: Scorer::new(config.weights.clone()),
            bloom,
            config,
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Forget every signature seen so far. The engine never calls this on
    /// its own; long-lived embedders may between runs.
    pub fn reset_dedup(&self) {
        if let Some(bloom) = &self.bloom {
            bloom.clear();
        }
    }

    /// Run the full pipeline over a batch. Cancellation returns partials
    /// with `stats.cancelled` set.
    pub fn filter(&self, urls: &[String], cancel: &CancelToken) -> FilterOutcome {
        let started = Instant::now();
        let rss_before = mem::resident_bytes();
        let mut stats = FilterStats {
            input_count: urls.len(),
            ..FilterStats::default()
        };

        // --- 1. Volume cap ---
        let mut input = urls;
        if self.config.enable_volume_control && input.len() > self.config.max_urls {
            stats.truncated_by_cap = input.len() - self.config.max_urls;
            warn!(
                input = input.len(),
                cap = self.config.max_urls,
                "URL volume over cap, truncating"
            );
            input = &input[..self.config.max_urls];
        }

        // --- 2. Normalize and dedup by signature ---
        let mut exact_seen: HashSet<String> = HashSet::new();
        let mut deduped: Vec<String> = Vec::with_capacity(input.len().min(4096));
        for (i, raw) in input.iter().enumerate() {
            if i % CANCEL_POLL_EVERY == 0 && cancel.is_cancelled() {
                return self.finish(Vec::new(), stats, started, rss_before, true);
            }
            let normalized = match self.normalizer.normalize(raw) {
                Ok(n) => n,
                Err(e) => {
                    stats.invalid_skipped += 1;
                    debug!(url = raw.as_str(), error = %e, "invalid URL skipped");
                    continue;
                }
            };
            let duplicate = match &self.bloom {
                Some(bloom) => bloom.add_and_check(&normalized.signature),
                None => !exact_seen.insert(normalized.signature.clone()),
            };
            if duplicate {
                stats.duplicates_skipped += 1;
            } else {
                deduped.push(raw.clone());
            }
        }
        if cancel.is_cancelled() {
            return self.finish(Vec::new(), stats, started, rss_before, true);
        }

        // --- 3. Score (input order preserved for ties) ---
        let mut scored = self.scorer.score_batch(&deduped);
        if cancel.is_cancelled() {
            return self.finish(scored, stats, started, rss_before, true);
        }

        // --- 4. Cluster and keep a coverage sample per cluster ---
        if self.config.enable_clustering {
            let members: Vec<String> = scored.iter().map(|s| s.url.clone()).collect();
            let clusters = Clusterer::new(self.config.cluster.clone()).cluster(&members);
            stats.cluster_count = clusters.len();
            let keep: HashSet<String> =
                select_top_k(&clusters, self.config.cluster_top_k).into_iter().collect();
            let before = scored.len();
            scored.retain(|s| keep.contains(&s.url));
            stats.cluster_dropped = before - scored.len();
        }
        if cancel.is_cancelled() {
            return self.finish(scored, stats, started, rss_before, true);
        }

        // --- 5. Pattern prune: cap instances of high-frequency templates ---
        if self.config.enable_pattern_filter {
            let members: Vec<String> = scored.iter().map(|s| s.url.clone()).collect();
            let extractor = PatternExtractor::new(self.config.pattern_min_frequency);
            let groups = extractor.extract(&members);
            stats.pattern_count = groups.len();
            let mut drop: HashSet<String> = HashSet::new();
            for group in &groups {
                for url in group.urls.iter().skip(self.config.max_per_pattern) {
                    drop.insert(url.clone());
                }
            }
            let before = scored.len();
            scored.retain(|s| !drop.contains(&s.url));
            stats.pattern_dropped = before - scored.len();
        }
        if cancel.is_cancelled() {
            return self.finish(scored, stats, started, rss_before, true);
        }

        // --- 6. Score threshold ---
        let before = scored.len();
        scored.retain(|s| s.score >= self.config.min_priority_score);
        stats.low_priority_skipped = before - scored.len();

        self.finish(scored, stats, started, rss_before, false)
    }

    fn finish(
        &self,
        urls: Vec<UrlScore>,
        mut stats: FilterStats,
        started: Instant,
        rss_before: Option<u64>,
        cancelled: bool,
    ) -> FilterOutcome {
        stats.output_count = urls.len();
        stats.duration = started.elapsed();
        stats.cancelled = cancelled;
        stats.bloom = self.bloom.as_ref().map(|b| b.stats());
        if let (Some(before), Some(after)) = (rss_before, mem::resident_bytes()) {
            stats.memory_delta_bytes = after as i64 - before as i64;
        }
        FilterOutcome { urls, stats }
    }

    /// Streaming variant: consume raw URLs from `rx`, emit scored URLs.
    /// Flushes every `STREAM_BATCH_SIZE` URLs or `STREAM_BATCH_INTERVAL`,
    /// whichever comes first; closing the input drains the final batch and
    /// then closes the output. The Bloom filter spans batches, so dedup is
    /// global even though clustering stays batch-local.
    pub fn stream(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<String>,
        cancel: CancelToken,
    ) -> mpsc::Receiver<UrlScore> {
        let (tx, out) = mpsc::channel(STREAM_BATCH_SIZE);
        tokio::spawn(async move {
            let mut batch: Vec<String> = Vec::with_capacity(STREAM_BATCH_SIZE);
            let mut ticker = tokio::time::interval(STREAM_BATCH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !self.flush(&mut batch, &tx, &cancel).await {
                            break;
                        }
                    }
                    next = rx.recv() => match next {
                        Some(url) => {
                            batch.push(url);
                            if batch.len() >= STREAM_BATCH_SIZE
                                && !self.flush(&mut batch, &tx, &cancel).await
                            {
                                break;
                            }
                        }
                        None => {
                            self.flush(&mut batch, &tx, &cancel).await;
                            break;
                        }
                    },
                }
            }
            // tx drops here, closing the output channel.
        });
        out
    }

    /// Filter one streaming batch and forward the survivors. Returns false
    /// when the consumer went away or cancellation fired.
    async fn flush(
        &self,
        batch: &mut Vec<String>,
        tx: &mpsc::Sender<UrlScore>,
        cancel: &CancelToken,
    ) -> bool {
        if batch.is_empty() {
            return true;
        }
        let urls = std::mem::take(batch);
        let outcome = self.filter(&urls, cancel);
        debug!(
            input = outcome.stats.input_count,
            output = outcome.stats.output_count,
            "streaming batch filtered"
        );
        for scored in outcome.urls {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                sent = tx.send(scored) => {
                    if sent.is_err() {
                        return false;
                    }
                }
            }
        }
        !outcome.stats.cancelled
    }
}

impl std::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEngine")
            .field("strategy", &self.config.strategy)
            .field("use_bloom", &self.config.use_bloom)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn plain_config() -> FilterConfig {
        // Clustering and pattern pruning off: the dedup/score/threshold
        // behavior is easier to assert in isolation.
        FilterConfig {
            enable_clustering: false,
            enable_pattern_filter: false,
            min_priority_score: i64::MIN,
            ..FilterConfig::default()
        }
    }

    #[test]
    fn validates_config() {
        let bad = FilterConfig {
            bloom_fp_rate: 1.5,
            ..FilterConfig::default()
        };
        assert!(FilterEngine::new(bad).is_err());

        let bad = FilterConfig {
            max_urls: 0,
            ..FilterConfig::default()
        };
        assert!(FilterEngine::new(bad).is_err());
    }

    #[test]
    fn output_is_subset_of_input() {
        let engine = FilterEngine::new(FilterConfig::default()).unwrap();
        let input = urls(&[
            "https://example.com/.env",
            "https://example.com/api/users",
            "https://example.com/images/logo.png",
            "https://example.com/page",
        ]);
        let outcome = engine.filter(&input, &CancelToken::new());
        assert!(outcome.urls.len() <= input.len());
        for scored in &outcome.urls {
            assert!(input.contains(&scored.url), "fabricated URL {}", scored.url);
        }
        let ratio = outcome.stats.reduction_ratio();
        assert!((0.0..=100.0).contains(&ratio));
    }

    #[test]
    fn sensitive_first_asset_last_or_dropped() {
        let engine = FilterEngine::new(plain_config()).unwrap();
        let input = urls(&[
            "https://example.com/.env",
            "https://example.com/api/users",
            "https://example.com/images/logo.png",
            "https://example.com/page",
        ]);
        let outcome = engine.filter(&input, &CancelToken::new());
        assert_eq!(outcome.urls[0].url, "https://example.com/.env");
        if let Some(last) = outcome.urls.last() {
            assert_eq!(last.url, "https://example.com/images/logo.png");
        }
        // With the default threshold of 0 the asset URL is dropped instead.
        let strict = FilterEngine::new(FilterConfig {
            enable_clustering: false,
            enable_pattern_filter: false,
            ..FilterConfig::default()
        })
        .unwrap();
        let outcome = strict.filter(&input, &CancelToken::new());
        assert!(outcome.urls.iter().all(|s| !s.url.contains("logo.png")));
        assert!(outcome.stats.low_priority_skipped >= 1);
    }

    #[test]
    fn duplicates_by_signature_are_dropped() {
        let engine = FilterEngine::new(plain_config()).unwrap();
        // Same page with reordered params and tracking noise.
        let input = urls(&[
            "https://example.com/p?a=1&m=2&z=3",
            "https://example.com/p?z=3&a=1&m=2",
            "https://example.com/p?a=1&m=2&z=3&utm_source=mail",
        ]);
        let outcome = engine.filter(&input, &CancelToken::new());
        assert_eq!(outcome.urls.len(), 1);
        assert_eq!(outcome.stats.duplicates_skipped, 2);
    }

    #[test]
    fn exact_set_dedup_when_bloom_disabled() {
        let engine = FilterEngine::new(FilterConfig {
            use_bloom: false,
            ..plain_config()
        })
        .unwrap();
        let input = urls(&[
            "https://example.com/a",
            "https://example.com/a",
            "https://example.com/b",
        ]);
        let outcome = engine.filter(&input, &CancelToken::new());
        assert_eq!(outcome.urls.len(), 2);
        assert_eq!(outcome.stats.duplicates_skipped, 1);
        assert!(outcome.stats.bloom.is_none());
    }

    #[test]
    fn volume_cap_truncates() {
        let engine = FilterEngine::new(FilterConfig {
            max_urls: 5,
            ..plain_config()
        })
        .unwrap();
        let input: Vec<String> = (0..20)
            .map(|i| format!("https://example.com/page/{i}"))
            .collect();
        let outcome = engine.filter(&input, &CancelToken::new());
        assert_eq!(outcome.stats.truncated_by_cap, 15);
        assert!(outcome.urls.len() <= 5);
    }

    #[test]
    fn invalid_urls_counted_and_skipped() {
        let engine = FilterEngine::new(plain_config()).unwrap();
        let input = urls(&["::::", "https://example.com/ok"]);
        let outcome = engine.filter(&input, &CancelToken::new());
        assert_eq!(outcome.stats.invalid_skipped, 1);
        assert_eq!(outcome.urls.len(), 1);
    }

    #[test]
    fn pattern_prune_caps_templates() {
        // Basic normalization: structural templating would collapse the id
        // pages to one signature before the pattern stage ever saw them.
        let engine = FilterEngine::new(FilterConfig {
            strategy: NormalizeStrategy::Basic,
            enable_clustering: false,
            enable_pattern_filter: true,
            pattern_min_frequency: 3,
            max_per_pattern: 2,
            min_priority_score: i64::MIN,
            ..FilterConfig::default()
        })
        .unwrap();
        let mut input: Vec<String> = (0..10)
            .map(|i| format!("https://example.com/users/{i}"))
            .collect();
        input.push("https://example.com/about".to_string());
        let outcome = engine.filter(&input, &CancelToken::new());
        let user_pages = outcome
            .urls
            .iter()
            .filter(|s| s.url.contains("/users/"))
            .count();
        assert_eq!(user_pages, 2, "template capped to max_per_pattern");
        assert!(outcome.urls.iter().any(|s| s.url.ends_with("/about")));
        assert_eq!(outcome.stats.pattern_dropped, 8);
        assert_eq!(outcome.stats.pattern_count, 1);
    }

    #[test]
    fn cancelled_filter_returns_partials() {
        let engine = FilterEngine::new(plain_config()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let input = urls(&["https://example.com/a", "https://example.com/b"]);
        let outcome = engine.filter(&input, &cancel);
        assert!(outcome.stats.cancelled);
        assert!(outcome.urls.is_empty());
    }

    #[tokio::test]
    async fn streaming_drains_final_batch_and_closes() {
        let engine = Arc::new(FilterEngine::new(plain_config()).unwrap());
        let (tx, rx) = mpsc::channel(16);
        let mut out = engine.stream(rx, CancelToken::new());

        tx.send("https://example.com/.env".to_string()).await.unwrap();
        tx.send("https://example.com/admin".to_string()).await.unwrap();
        drop(tx);

        let mut got = Vec::new();
        while let Some(scored) = out.recv().await {
            got.push(scored.url);
        }
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn streaming_stops_on_cancel() {
        let engine = Arc::new(FilterEngine::new(plain_config()).unwrap());
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancelToken::new();
        let mut out = engine.stream(rx, cancel.clone());

        tx.send("https://example.com/a".to_string()).await.unwrap();
        cancel.cancel();
        // Output closes without the sender being dropped.
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while out.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "output channel should close on cancel");
        drop(tx);
    }
}
