//! subfinder adapter.
//!
//! Passive subdomain enumeration, JSONL output. The tool is not entirely
//! consistent across versions (`host` arrives as a scalar or an array, and
//! older builds emit bare hostnames without JSON at all), so parsing
//! tolerates every shape and skips what it cannot read.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use aethonx_artifacts::{confidence, Artifact, ArtifactType, RelationType, ScanResult, Target};
use aethonx_common::config::{self, SourceConfig};
use aethonx_common::validate::{is_valid_domain, is_valid_ip, normalize_domain};
use aethonx_common::{AethonxError, CancelToken};

use crate::cli::{self, CliEngine, ExecInput, LineFlow, LineHandler};
use crate::metadata::{SourceKind, SourceMetadata, SourceMode};
use crate::registry::SourceRegistry;
use crate::source::{default_stream, AdvancedSource, ProgressUpdate, Source, StreamingSource};
use crate::throttle::{AdaptiveThrottle, ThrottleConfig};

const NAME: &str = "subfinder";
const INSTALL_HINT: &str =
    "go install github.com/projectdiscovery/subfinder/v2/cmd/subfinder@latest";

pub fn metadata() -> SourceMetadata {
    SourceMetadata::new(
        NAME,
        "Passive subdomain aggregation across many providers",
        SourceMode::Passive,
        SourceKind::Cli,
    )
    .with_priority(8)
    .with_outputs(&[ArtifactType::Subdomain])
}

pub fn register(registry: &SourceRegistry) -> Result<(), AethonxError> {
    registry.register(
        NAME,
        Arc::new(|config| Ok(Box::new(SubfinderSource::new(config)) as Box<dyn Source>)),
        metadata(),
    )
}

struct Inner {
    exec_path: Option<String>,
    timeout: Duration,
    all_sources: bool,
    sources: Vec<String>,
    threads: i64,
    engine: OnceCell<CliEngine>,
    throttle: AdaptiveThrottle,
}

pub struct SubfinderSource {
    inner: Arc<Inner>,
}

impl SubfinderSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                exec_path: match config::get_string(&config.custom, "exec_path", "") {
                    p if p.is_empty() => None,
                    p => Some(p),
                },
                timeout: config.timeout,
                all_sources: config::get_bool(&config.custom, "all_sources", false),
                sources: config::get_string_slice(&config.custom, "sources", &[]),
                threads: config::get_int(&config.custom, "threads", 0),
                engine: OnceCell::new(),
                throttle: AdaptiveThrottle::new(ThrottleConfig::default()),
            }),
        }
    }
}

impl Inner {
    fn engine(&self) -> Result<&CliEngine, AethonxError> {
        self.engine.get().ok_or_else(|| AethonxError::SourceFailed {
            source_name: NAME.to_string(),
            message: "source not initialized".to_string(),
        })
    }

    fn args(&self, target: &Target) -> Vec<String> {
        let mut args = vec![
            "-d".to_string(),
            target.root.clone(),
            "-silent".to_string(),
            "-json".to_string(),
        ];
        if self.all_sources {
            args.push("-all".to_string());
        }
        if !self.sources.is_empty() {
            args.push("-sources".to_string());
            args.push(self.sources.join(","));
        }
        if self.threads > 0 {
            args.push("-t".to_string());
            args.push(self.threads.to_string());
        }
        args
    }

    async fn collect(&self, cancel: &CancelToken, target: &Target) -> Result<ScanResult, AethonxError> {
        let engine = self.engine()?;
        let mut handler = RecordCollector {
            target: target.clone(),
            artifacts: Vec::new(),
            parse_failures: 0,
        };

        let (outcome, stderr) = engine
            .execute(cancel, &self.args(target), ExecInput::None, &mut handler)
            .await?;
        engine.emit_progress(handler.artifacts.len() as u64, "subdomains collected");
        self.throttle.record(handler.artifacts.len());

        let mut result = ScanResult::new(target.clone());
        let found = handler.artifacts.len();
        for artifact in handler.artifacts {
            result.add_artifact(artifact);
        }
        if handler.parse_failures > 0 {
            result.add_warning(
                NAME,
                &format!("{} unparseable output lines skipped", handler.parse_failures),
            );
        }
        if !stderr.trim().is_empty() {
            result.add_warning(NAME, stderr.trim());
        }
        result.set_source_metadata(
            NAME,
            json!({
                "lines": outcome.lines,
                "duration_ms": outcome.duration.as_millis() as u64,
            }),
        );

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

        info!(source = NAME, subdomains = found, duration = ?outcome.duration, "subfinder run complete");
        result.finish();
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// `host` arrives as a scalar or an array depending on tool version.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum HostField {
    #[default]
    Missing,
    One(String),
    Many(Vec<String>),
}

impl HostField {
    fn hosts(self) -> Vec<String> {
        match self {
            HostField::Missing => Vec::new(),
            HostField::One(host) => vec![host],
            HostField::Many(hosts) => hosts,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubfinderRecord {
    #[serde(default)]
    host: HostField,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    ip: Option<String>,
}

struct RecordCollector {
    target: Target,
    artifacts: Vec<Artifact>,
    parse_failures: u64,
}

impl RecordCollector {
    fn push_host(&mut self, host: &str, tool_source: Option<&str>, ip: Option<&str>) {
        let mut host = normalize_domain(host);
        let mut wildcard = false;
        if let Some(stripped) = host.strip_prefix("*.") {
            host = stripped.to_string();
            wildcard = true;
        }
        if !is_valid_domain(&host) || !self.target.is_in_scope(&host) {
            return;
        }

        let mut artifact = Artifact::new(ArtifactType::Subdomain, &host, NAME, confidence::MEDIUM);
        if wildcard {
            artifact.add_tag("wildcard");
        }
        if host.matches('.').count() >= self.target.root.matches('.').count() + 2 {
            artifact.add_tag("deep-subdomain");
        }
        if let Some(provider) = tool_source {
            artifact.add_tag(provider);
        }
        if let Some(ip) = ip.filter(|ip| is_valid_ip(ip)) {
            artifact.relate_to(ArtifactType::Ip, ip, RelationType::ResolvesTo, confidence::HIGH);
        }
        self.artifacts.push(artifact);
    }
}

impl LineHandler for RecordCollector {
    fn process_line(&mut self, line: &str) -> Result<LineFlow, AethonxError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(LineFlow::Continue);
        }
        match serde_json::from_str::<SubfinderRecord>(line) {
            Ok(record) => {
                let source = record.source;
                let ip = record.ip;
                for host in record.host.hosts() {
                    self.push_host(&host, source.as_deref(), ip.as_deref());
                }
            }
            // Older builds emit bare hostnames without JSON.
            Err(_) if is_valid_domain(line) => self.push_host(line, None, None),
            Err(e) => {
                self.parse_failures += 1;
                debug!(source = NAME, error = %e, "unparseable output line");
            }
        }
        Ok(LineFlow::Continue)
    }
}

// ---------------------------------------------------------------------------
// Source contract
// ---------------------------------------------------------------------------

#[async_trait]
impl Source for SubfinderSource {
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
        self.inner.collect(cancel, target).await
    }

    async fn close(&self) -> Result<(), AethonxError> {
        if let Some(engine) = self.inner.engine.get() {
            engine.close().await;
        }
        Ok(())
    }

    fn streaming(&self) -> Option<&dyn StreamingSource> {
        Some(self)
    }

    fn advanced(&self) -> Option<&dyn AdvancedSource> {
        Some(self)
    }
}

#[async_trait]
impl StreamingSource for SubfinderSource {
    async fn stream(
        &self,
        cancel: &CancelToken,
        target: &Target,
    ) -> (mpsc::Receiver<Artifact>, mpsc::Receiver<AethonxError>) {
        let inner = self.inner.clone();
        let target = target.clone();
        let token = cancel.clone();
        let buffer = self.inner.throttle.threshold();
        default_stream(cancel.clone(), buffer, async move {
            inner.collect(&token, &target).await
        })
    }

    fn progress(&self) -> Option<mpsc::Receiver<ProgressUpdate>> {
        self.inner.engine.get().and_then(|engine| engine.take_progress())
    }
}

#[async_trait]
impl AdvancedSource for SubfinderSource {
    async fn initialize(&self) -> Result<(), AethonxError> {
        if self.inner.engine.get().is_some() {
            return Ok(());
        }
        let path =
            cli::resolve_executable(NAME, self.inner.exec_path.as_deref(), INSTALL_HINT).await?;
        let engine = CliEngine::new(NAME, path, self.inner.timeout);
        engine.validate()?;
        let _ = self.inner.engine.set(engine);
        Ok(())
    }

    fn validate(&self) -> Result<(), AethonxError> {
        aethonx_common::validate::positive_duration("timeout", self.inner.timeout)?;
        aethonx_common::validate::non_negative_int("threads", self.inner.threads)
    }

    async fn health_check(&self, cancel: &CancelToken) -> Result<(), AethonxError> {
        self.inner.engine()?.health_check(cancel).await
    }
}
