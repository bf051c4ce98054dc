//! waybackurls adapter.
//!
//! Historical URLs from the web archives, one per stdout line. The volume
//! cap raises the handler stop signal rather than killing the tool, so the
//! subprocess still drains and exits cleanly; the filter engine downstream
//! does the real reduction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::json;
use tracing::{info, warn};

use aethonx_artifacts::{confidence, Artifact, ArtifactType, ScanResult, Target};
use aethonx_common::config::{self, SourceConfig};
use aethonx_common::{AethonxError, CancelToken};

use crate::cli::{self, CliEngine, ExecInput, LineFlow, LineHandler};
use crate::metadata::{SourceKind, SourceMetadata, SourceMode};
use crate::registry::SourceRegistry;
use crate::source::{AdvancedSource, Source};

const NAME: &str = "waybackurls";
const INSTALL_HINT: &str = "go install github.com/tomnomnom/waybackurls@latest";
const DEFAULT_MAX_URLS: i64 = 100_000;

pub fn metadata() -> SourceMetadata {
    SourceMetadata::new(
        NAME,
        "Historical URLs from the Wayback Machine and friends",
        SourceMode::Passive,
        SourceKind::Cli,
    )
    .with_priority(6)
    .with_outputs(&[ArtifactType::Url])
}

pub fn register(registry: &SourceRegistry) -> Result<(), AethonxError> {
    registry.register(
        NAME,
        Arc::new(|config| Ok(Box::new(WaybackSource::new(config)) as Box<dyn Source>)),
        metadata(),
    )
}

pub struct WaybackSource {
    exec_path: Option<String>,
    timeout: Duration,
    with_dates: bool,
    no_subs: bool,
    max_urls: usize,
    engine: OnceCell<CliEngine>,
}

impl WaybackSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            exec_path: match config::get_string(&config.custom, "exec_path", "") {
                p if p.is_empty() => None,
                p => Some(p),
            },
            timeout: config.timeout,
            with_dates: config::get_bool(&config.custom, "with_dates", false),
            no_subs: config::get_bool(&config.custom, "no_subs", false),
            max_urls: config::get_int(&config.custom, "max_urls", DEFAULT_MAX_URLS).max(1) as usize,
            engine: OnceCell::new(),
        }
    }

    fn engine(&self) -> Result<&CliEngine, AethonxError> {
        self.engine.get().ok_or_else(|| AethonxError::SourceFailed {
            source_name: NAME.to_string(),
            message: "source not initialized".to_string(),
        })
    }

    fn args(&self, target: &Target) -> Vec<String> {
        let mut args = Vec::new();
        if self.with_dates {
            args.push("-dates".to_string());
        }
        if self.no_subs {
            args.push("-no-subs".to_string());
        }
        args.push(target.root.clone());
        args
    }
}

/// Accumulates URL lines up to the volume cap.
struct UrlCollector {
    urls: Vec<String>,
    max: usize,
}

impl LineHandler for UrlCollector {
    fn process_line(&mut self, line: &str) -> Result<LineFlow, AethonxError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(LineFlow::Continue);
        }
        self.urls.push(line.to_string());
        if self.urls.len() >= self.max {
            return Ok(LineFlow::Stop);
        }
        Ok(LineFlow::Continue)
    }
}

#[async_trait]
impl Source for WaybackSource {
    fn name(&self) -> &str {
        NAME
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Passive
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Cli
    }

    async fn run(&self, cancel: &CancelToken, target: &Target) -> Result<ScanResult, AethonxError> {
        let engine = self.engine()?;
        let mut handler = UrlCollector {
            urls: Vec::new(),
            max: self.max_urls,
        };

        let (outcome, stderr) = engine
            .execute(cancel, &self.args(target), ExecInput::None, &mut handler)
            .await?;
        engine.emit_progress(handler.urls.len() as u64, "urls collected");

        let mut result = ScanResult::new(target.clone());
        for url in &handler.urls {
            result.add_artifact(Artifact::new(
                ArtifactType::Url,
                url,
                NAME,
                confidence::MEDIUM,
            ));
        }
        if outcome.stopped_early {
            result.add_warning(NAME, &format!("volume cap hit at {} urls", self.max_urls));
        }
        if !stderr.trim().is_empty() {
            result.add_warning(NAME, stderr.trim());
        }
        result.set_source_metadata(
            NAME,
            json!({
                "lines": outcome.lines,
                "duration_ms": outcome.duration.as_millis() as u64,
                "stopped_early": outcome.stopped_early,
            }),
        );

        // Non-zero exit with artifacts in hand is a warning, not a failure.
        if !outcome.success() {
            if result.artifacts.is_empty() {
                return Err(AethonxError::SourceFailed {
                    source_name: NAME.to_string(),
                    message: format!("exit code {:?}: {}", outcome.exit_code, stderr.trim()),
                });
            }
            warn!(
                source = NAME,
                exit_code = ?outcome.exit_code,
                artifacts = result.artifacts.len(),
                "non-zero exit demoted to warning"
            );
            result.add_warning(NAME, &format!("exit code {:?}", outcome.exit_code));
        }

        info!(
            source = NAME,
            urls = result.artifacts.len(),
            duration = ?outcome.duration,
            "wayback run complete"
        );
        result.finish();
        Ok(result)
    }

    async fn close(&self) -> Result<(), AethonxError> {
        if let Some(engine) = self.engine.get() {
            engine.close().await;
        }
        Ok(())
    }

    fn advanced(&self) -> Option<&dyn AdvancedSource> {
        Some(self)
    }
}

#[async_trait]
impl AdvancedSource for WaybackSource {
    async fn initialize(&self) -> Result<(), AethonxError> {
        if self.engine.get().is_some() {
            return Ok(());
        }
        let path = cli::resolve_executable(NAME, self.exec_path.as_deref(), INSTALL_HINT).await?;
        let engine = CliEngine::new(NAME, path, self.timeout);
        engine.validate()?;
        let _ = self.engine.set(engine);
        Ok(())
    }

    fn validate(&self) -> Result<(), AethonxError> {
        aethonx_common::validate::positive_duration("timeout", self.timeout)?;
        aethonx_common::validate::positive_int("max_urls", self.max_urls as i64)
    }

    async fn health_check(&self, cancel: &CancelToken) -> Result<(), AethonxError> {
        self.engine()?.health_check(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn config_shapes_args() {
        let mut custom = HashMap::new();
        custom.insert("with_dates".to_string(), json!(true));
        custom.insert("no_subs".to_string(), json!("true"));
        let source = WaybackSource::new(SourceConfig {
            custom,
            ..SourceConfig::default()
        });
        let target = Target::new("Example.com", aethonx_artifacts::ScanMode::Passive);
        assert_eq!(source.args(&target), vec!["-dates", "-no-subs", "example.com"]);
    }

    #[test]
    fn collector_stops_at_cap() {
        let mut handler = UrlCollector {
            urls: Vec::new(),
            max: 2,
        };
        assert_eq!(
            handler.process_line("https://example.com/a").unwrap(),
            LineFlow::Continue
        );
        assert_eq!(handler.process_line("   ").unwrap(), LineFlow::Continue);
        assert_eq!(
            handler.process_line("https://example.com/b").unwrap(),
            LineFlow::Stop
        );
        assert_eq!(handler.urls.len(), 2);
    }

    #[tokio::test]
    async fn run_before_initialize_fails() {
        let source = WaybackSource::new(SourceConfig::default());
        let target = Target::new("example.com", aethonx_artifacts::ScanMode::Passive);
        let err = source.run(&CancelToken::new(), &target).await.unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }
}
