//! Scan orchestration.
//!
//! Builds configured sources from the registry, runs stage-0 sources
//! concurrently under the scan-wide cancellation token, feeds input
//! consumers the aggregate, enforces target scope, and reduces URL
//! artifacts through the filter engine. Per-source failures land in the
//! result's error list; the run itself fails only when nothing was
//! produced at all.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{info, warn};

use aethonx_artifacts::{ArtifactType, ScanResult, Target};
use aethonx_common::config::SourceConfig;
use aethonx_common::{AethonxError, CancelToken};
use aethonx_filter::FilterEngine;
use aethonx_sources::{Source, SourceRegistry};

pub struct Runner {
    registry: &'static SourceRegistry,
    filter: Arc<FilterEngine>,
}

/// Human-facing summary of one scan run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub sources_run: usize,
    pub sources_failed: usize,
    pub artifacts: usize,
    pub by_type: Vec<(ArtifactType, usize)>,
    pub out_of_scope_dropped: usize,
    pub urls_in: usize,
    pub urls_out: usize,
    pub reduction_ratio: f64,
    pub duration_secs: f64,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Scan Complete ===")?;
        writeln!(f, "Sources run:       {}", self.sources_run)?;
        writeln!(f, "Sources failed:    {}", self.sources_failed)?;
        writeln!(f, "Artifacts:         {}", self.artifacts)?;
        writeln!(f, "Out of scope:      {}", self.out_of_scope_dropped)?;
        writeln!(
            f,
            "URL reduction:     {} -> {} ({:.1}%)",
            self.urls_in, self.urls_out, self.reduction_ratio
        )?;
        writeln!(f, "Duration:          {:.1}s", self.duration_secs)?;
        writeln!(f, "\nBy type:")?;
        for (artifact_type, count) in &self.by_type {
            writeln!(f, "  {artifact_type}: {count}")?;
        }
        Ok(())
    }
}

impl Runner {
    pub fn new(registry: &'static SourceRegistry, filter: Arc<FilterEngine>) -> Self {
        Self { registry, filter }
    }

    pub async fn run(
        &self,
        target: &Target,
        configs: &HashMap<String, SourceConfig>,
        cancel: &CancelToken,
    ) -> Result<(ScanResult, RunReport), AethonxError> {
        let started = Instant::now();
        let sources = self.registry.build(configs).await?;

        let mut aggregate = ScanResult::new(target.clone());
        let mut report = RunReport::default();

        // Partition on capability and mode. Input consumers wait for the
        // stage-0 aggregate; mode-mismatched sources are skipped outright.
        let mut stage_zero: Vec<&Box<dyn Source>> = Vec::new();
        let mut consumers: Vec<&Box<dyn Source>> = Vec::new();
        for source in &sources {
            if !source.mode().allows(target.mode) {
                info!(
                    source = source.name(),
                    mode = %target.mode,
                    "source skipped: mode mismatch"
                );
                continue;
            }
            if source.input_consumer().is_some() {
                consumers.push(source);
            } else {
                stage_zero.push(source);
            }
        }

        // --- Stage 0, concurrent ---
        let runs = stage_zero.iter().map(|source| {
            let timeout = configs
                .get(source.name())
                .map(|c| c.timeout)
                .unwrap_or(aethonx_common::config::DEFAULT_TIMEOUT);
            let token = cancel.child_with_timeout(timeout);
            async move {
                let name = source.name().to_string();
                let result = source.run(&token, target).await;
                (name, result)
            }
        });
        for (name, result) in join_all(runs).await {
            report.sources_run += 1;
            match result {
                Ok(partial) => {
                    info!(source = name.as_str(), artifacts = partial.artifacts.len(), "source complete");
                    aggregate.merge_result(partial);
                }
                Err(e) if e.is_cancelled() => {
                    warn!(source = name.as_str(), "source cancelled");
                    aggregate.add_warning(&name, "cancelled before completion");
                }
                Err(e) => {
                    report.sources_failed += 1;
                    warn!(source = name.as_str(), error = %e, "source failed");
                    aggregate.add_error(&name, &e.to_string());
                }
            }
        }

        // --- Later stages, sequential in priority order ---
        for source in consumers {
            if cancel.is_cancelled() {
                break;
            }
            let consumer = source
                .input_consumer()
                .expect("partitioned as input consumer");
            report.sources_run += 1;
            let name = source.name().to_string();
            match consumer.run_with_input(cancel, target, &aggregate).await {
                Ok(partial) => aggregate.merge_result(partial),
                Err(e) if e.is_cancelled() => {
                    aggregate.add_warning(&name, "cancelled before completion");
                }
                Err(e) => {
                    report.sources_failed += 1;
                    warn!(source = name.as_str(), error = %e, "source failed");
                    aggregate.add_error(&name, &e.to_string());
                }
            }
        }

        for source in &sources {
            if let Err(e) = source.close().await {
                warn!(source = source.name(), error = %e, "source close failed");
            }
        }

        if aggregate.artifacts.is_empty() && report.sources_failed == report.sources_run {
            return Err(AethonxError::SourceFailed {
                source_name: "scan".to_string(),
                message: "every source failed and nothing was produced".to_string(),
            });
        }

        // --- Scope enforcement on host-shaped artifacts ---
        report.out_of_scope_dropped = aggregate.retain_artifacts(|a| {
            !a.artifact_type.is_host_shaped() || target.is_in_scope(&a.value)
        });
        if report.out_of_scope_dropped > 0 {
            aggregate.add_warning(
                "scope",
                &format!("{} out-of-scope artifacts dropped", report.out_of_scope_dropped),
            );
        }

        // --- URL reduction ---
        self.reduce_urls(&mut aggregate, cancel, &mut report);

        report.artifacts = aggregate.artifacts.len();
        report.duration_secs = started.elapsed().as_secs_f64();
        report.by_type = count_by_type(&aggregate);
        aggregate.finish();
        info!(
            target = target.root.as_str(),
            sources = report.sources_run,
            failed = report.sources_failed,
            artifacts = report.artifacts,
            urls_in = report.urls_in,
            urls_out = report.urls_out,
            reduction = %format!("{:.1}%", report.reduction_ratio),
            duration_secs = report.duration_secs,
            "scan complete"
        );
        Ok((aggregate, report))
    }

    /// Push every URL artifact through the filter pipeline and keep only
    /// the survivors, tagged with their priority category.
    fn reduce_urls(&self, aggregate: &mut ScanResult, cancel: &CancelToken, report: &mut RunReport) {
        let urls: Vec<String> = aggregate
            .artifacts_of_type(ArtifactType::Url)
            .iter()
            .map(|a| a.value.clone())
            .collect();
        if urls.is_empty() {
            return;
        }

        let outcome = self.filter.filter(&urls, cancel);
        report.urls_in = outcome.stats.input_count;
        report.urls_out = outcome.stats.output_count;
        report.reduction_ratio = outcome.stats.reduction_ratio();
        info!(
            urls_in = outcome.stats.input_count,
            urls_out = outcome.stats.output_count,
            invalid = outcome.stats.invalid_skipped,
            duplicates = outcome.stats.duplicates_skipped,
            low_priority = outcome.stats.low_priority_skipped,
            clusters = outcome.stats.cluster_count,
            patterns = outcome.stats.pattern_count,
            "url filter applied"
        );

        let survivors: HashMap<String, String> = outcome
            .urls
            .iter()
            .map(|s| (s.url.clone(), s.category.to_string()))
            .collect();
        aggregate.retain_artifacts(|a| {
            a.artifact_type != ArtifactType::Url || survivors.contains_key(&a.value)
        });
        for artifact in aggregate.artifacts.iter_mut() {
            if artifact.artifact_type == ArtifactType::Url {
                if let Some(category) = survivors.get(&artifact.value) {
                    artifact.add_tag(&format!("priority-{category}"));
                }
            }
        }
    }
}

fn count_by_type(result: &ScanResult) -> Vec<(ArtifactType, usize)> {
    let mut counts: HashMap<ArtifactType, usize> = HashMap::new();
    for artifact in &result.artifacts {
        *counts.entry(artifact.artifact_type).or_insert(0) += 1;
    }
    let mut counts: Vec<(ArtifactType, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
    counts
}
