//! Runner orchestration tests with registry-built fake sources.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use aethonx_artifacts::{confidence, Artifact, ArtifactType, ScanMode, ScanResult, Target};
use aethonx_common::config::SourceConfig;
use aethonx_common::{AethonxError, CancelToken};
use aethonx_filter::{FilterConfig, FilterEngine};
use aethonx_scanner::runner::Runner;
use aethonx_sources::{
    SourceKind, SourceMetadata, SourceMode, SourceRegistry,
    Source,
};

// The runner takes a &'static registry, so each test registers its fakes in
// this shared instance under unique names.
static REGISTRY: Lazy<SourceRegistry> = Lazy::new(SourceRegistry::new);

struct FakeSource {
    name: String,
    mode: SourceMode,
    artifacts: Vec<(ArtifactType, String)>,
    fail: bool,
}

#[async_trait]
impl Source for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }
    fn mode(&self) -> SourceMode {
        self.mode
    }
    fn kind(&self) -> SourceKind {
        SourceKind::Builtin
    }

    async fn run(&self, _cancel: &CancelToken, target: &Target) -> Result<ScanResult, AethonxError> {
        if self.fail {
            return Err(AethonxError::SourceFailed {
                source_name: self.name.clone(),
                message: "synthetic failure".to_string(),
            });
        }
        let mut result = ScanResult::new(target.clone());
        for (artifact_type, value) in &self.artifacts {
            result.add_artifact(Artifact::new(*artifact_type, value, &self.name, confidence::MEDIUM));
        }
        Ok(result)
    }

    async fn close(&self) -> Result<(), AethonxError> {
        Ok(())
    }
}

fn register_fake(
    name: &'static str,
    mode: SourceMode,
    artifacts: Vec<(ArtifactType, String)>,
    fail: bool,
) {
    REGISTRY
        .register(
            name,
            Arc::new(move |_config| {
                Ok(Box::new(FakeSource {
                    name: name.to_string(),
                    mode,
                    artifacts: artifacts.clone(),
                    fail,
                }) as Box<dyn Source>)
            }),
            SourceMetadata::new(name, "fake", mode, SourceKind::Builtin),
        )
        .expect("unique test source name");
}

fn runner() -> Runner {
    let filter = FilterEngine::new(FilterConfig {
        enable_clustering: false,
        enable_pattern_filter: false,
        ..FilterConfig::default()
    })
    .unwrap();
    Runner::new(&REGISTRY, Arc::new(filter))
}

fn configs(names: &[&str]) -> HashMap<String, SourceConfig> {
    names
        .iter()
        .map(|n| (n.to_string(), SourceConfig::enabled()))
        .collect()
}

fn target() -> Target {
    Target::new("example.com", ScanMode::Passive)
}

#[tokio::test]
async fn merges_sources_and_filters_urls() {
    register_fake(
        "subs",
        SourceMode::Passive,
        vec![
            (ArtifactType::Subdomain, "api.example.com".to_string()),
            (ArtifactType::Subdomain, "api.example.com".to_string()),
            (ArtifactType::Subdomain, "out.of-scope.net".to_string()),
        ],
        false,
    );
    register_fake(
        "urls",
        SourceMode::Passive,
        vec![
            (ArtifactType::Url, "https://example.com/.env".to_string()),
            (
                ArtifactType::Url,
                "https://example.com/images/logo.png".to_string(),
            ),
        ],
        false,
    );

    let (result, report) = runner()
        .run(&target(), &configs(&["subs", "urls"]), &CancelToken::new())
        .await
        .unwrap();

    // Duplicate subdomain merged, out-of-scope dropped.
    assert_eq!(result.artifacts_of_type(ArtifactType::Subdomain).len(), 1);
    assert_eq!(report.out_of_scope_dropped, 1);

    // The asset URL scored below zero and was filtered out; the sensitive
    // file survived with its category tag.
    let urls = result.artifacts_of_type(ArtifactType::Url);
    assert_eq!(urls.len(), 1);
    assert!(urls[0].value.ends_with("/.env"));
    assert!(urls[0].tags.contains(&"priority-critical".to_string()));
    assert_eq!(report.urls_in, 2);
    assert_eq!(report.urls_out, 1);
}

#[tokio::test]
async fn partial_failure_is_tolerated() {
    register_fake("broken", SourceMode::Passive, Vec::new(), true);
    register_fake(
        "working",
        SourceMode::Passive,
        vec![(ArtifactType::Subdomain, "ok.example.com".to_string())],
        false,
    );

    let (result, report) = runner()
        .run(&target(), &configs(&["broken", "working"]), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.sources_failed, 1);
    assert_eq!(result.artifacts.len(), 1);
    assert!(result
        .errors
        .iter()
        .any(|e| e.source == "broken" && e.message.contains("synthetic failure")));
}

#[tokio::test]
async fn total_failure_is_an_error() {
    register_fake("doomed", SourceMode::Passive, Vec::new(), true);
    let err = runner()
        .run(&target(), &configs(&["doomed"]), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nothing was produced"));
}

/// Derives endpoint artifacts from the subdomains earlier sources produced.
struct ProbeConsumer;

#[async_trait]
impl Source for ProbeConsumer {
    fn name(&self) -> &str {
        "probe"
    }
    fn mode(&self) -> SourceMode {
        SourceMode::Passive
    }
    fn kind(&self) -> SourceKind {
        SourceKind::Builtin
    }
    async fn run(&self, _cancel: &CancelToken, target: &Target) -> Result<ScanResult, AethonxError> {
        Ok(ScanResult::new(target.clone()))
    }
    async fn close(&self) -> Result<(), AethonxError> {
        Ok(())
    }
    fn input_consumer(&self) -> Option<&dyn aethonx_sources::InputConsumer> {
        Some(self)
    }
}

#[async_trait]
impl aethonx_sources::InputConsumer for ProbeConsumer {
    async fn run_with_input(
        &self,
        _cancel: &CancelToken,
        target: &Target,
        previous: &ScanResult,
    ) -> Result<ScanResult, AethonxError> {
        let mut result = ScanResult::new(target.clone());
        for sub in previous.artifacts_of_type(ArtifactType::Subdomain) {
            result.add_artifact(Artifact::new(
                ArtifactType::Endpoint,
                &format!("https://{}/", sub.value),
                "probe",
                confidence::HIGH,
            ));
        }
        Ok(result)
    }
}

#[tokio::test]
async fn input_consumers_see_the_stage_zero_aggregate() {
    register_fake(
        "seeds",
        SourceMode::Passive,
        vec![(ArtifactType::Subdomain, "app.example.com".to_string())],
        false,
    );
    REGISTRY
        .register(
            "probe",
            Arc::new(|_config| Ok(Box::new(ProbeConsumer) as Box<dyn Source>)),
            SourceMetadata::new("probe", "fake prober", SourceMode::Passive, SourceKind::Builtin),
        )
        .unwrap();

    let (result, report) = runner()
        .run(&target(), &configs(&["seeds", "probe"]), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.sources_run, 2);
    let endpoints = result.artifacts_of_type(ArtifactType::Endpoint);
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].value, "https://app.example.com/");
}

#[tokio::test]
async fn active_sources_skipped_in_passive_mode() {
    register_fake(
        "noisy",
        SourceMode::Active,
        vec![(ArtifactType::Subdomain, "probe.example.com".to_string())],
        false,
    );
    register_fake(
        "quiet",
        SourceMode::Passive,
        vec![(ArtifactType::Subdomain, "calm.example.com".to_string())],
        false,
    );

    let (result, _report) = runner()
        .run(&target(), &configs(&["noisy", "quiet"]), &CancelToken::new())
        .await
        .unwrap();

    let values: Vec<&str> = result.artifacts.iter().map(|a| a.value.as_str()).collect();
    assert_eq!(values, vec!["calm.example.com"]);
}
