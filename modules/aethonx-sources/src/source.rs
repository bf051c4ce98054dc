//! The uniform source contract.
//!
//! `Source` is the mandatory surface; optional capabilities are advertised
//! through the accessor methods (`streaming()`, `advanced()`,
//! `input_consumer()`), which default to None. The registry probes
//! `advanced()` before first use; the runner probes the others.

use async_trait::async_trait;
use tokio::sync::mpsc;

use aethonx_artifacts::{Artifact, ScanResult, Target};
use aethonx_common::{AethonxError, CancelToken};

use crate::metadata::{SourceKind, SourceMode};

/// Best-effort progress signal emitted by long-running sources. Sends are
/// non-blocking and dropped when the channel is full.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub source: String,
    pub count: u64,
    pub message: String,
}

#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;
    fn mode(&self) -> SourceMode;
    fn kind(&self) -> SourceKind;

    /// Run against a target. Partial results are tolerated: return Ok with
    /// warnings/errors accumulated in the result whenever any artifact was
    /// produced.
    async fn run(&self, cancel: &CancelToken, target: &Target) -> Result<ScanResult, AethonxError>;

    /// Idempotent teardown. Safe from any task, including signal handlers.
    async fn close(&self) -> Result<(), AethonxError>;

    // --- Optional capabilities ---

    fn streaming(&self) -> Option<&dyn StreamingSource> {
        None
    }

    fn advanced(&self) -> Option<&dyn AdvancedSource> {
        None
    }

    fn input_consumer(&self) -> Option<&dyn InputConsumer> {
        None
    }
}

/// Emits artifacts as they are produced instead of a single final result.
/// Both channels must close on completion or cancellation.
#[async_trait]
pub trait StreamingSource: Send + Sync {
    async fn stream(
        &self,
        cancel: &CancelToken,
        target: &Target,
    ) -> (mpsc::Receiver<Artifact>, mpsc::Receiver<AethonxError>);

    /// Take the progress channel. Yields once; later calls return None.
    fn progress(&self) -> Option<mpsc::Receiver<ProgressUpdate>>;
}

/// Lifecycle hooks invoked by the registry prior to first use.
#[async_trait]
pub trait AdvancedSource: Send + Sync {
    async fn initialize(&self) -> Result<(), AethonxError>;
    fn validate(&self) -> Result<(), AethonxError>;
    async fn health_check(&self, cancel: &CancelToken) -> Result<(), AethonxError>;
}

/// Consumes artifacts produced by earlier-stage sources.
#[async_trait]
pub trait InputConsumer: Send + Sync {
    async fn run_with_input(
        &self,
        cancel: &CancelToken,
        target: &Target,
        previous: &ScanResult,
    ) -> Result<ScanResult, AethonxError>;
}

/// Wrap a plain `run` future into streaming channels: artifacts are fanned
/// out one by one, the error (if any) goes to the error channel, and both
/// channels close when done or cancelled.
pub fn default_stream<F>(
    cancel: CancelToken,
    buffer: usize,
    run: F,
) -> (mpsc::Receiver<Artifact>, mpsc::Receiver<AethonxError>)
where
    F: std::future::Future<Output = Result<ScanResult, AethonxError>> + Send + 'static,
{
    let (artifact_tx, artifact_rx) = mpsc::channel(buffer.max(1));
    let (error_tx, error_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = run => result,
        };
        match result {
            Ok(scan) => {
                for artifact in scan.artifacts {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = artifact_tx.send(artifact) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                let _ = error_tx.try_send(e);
            }
        }
    });
    (artifact_rx, error_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aethonx_artifacts::{confidence, Artifact, ArtifactType, ScanMode};

    fn target() -> Target {
        Target::new("example.com", ScanMode::Passive)
    }

    #[tokio::test]
    async fn default_stream_fans_out_and_closes() {
        let t = target();
        let mut result = ScanResult::new(t.clone());
        for host in ["a.example.com", "b.example.com"] {
            result.add_artifact(Artifact::new(
                ArtifactType::Subdomain,
                host,
                "test",
                confidence::MEDIUM,
            ));
        }
        let (mut artifacts, mut errors) =
            default_stream(CancelToken::new(), 8, async move { Ok(result) });

        let mut seen = Vec::new();
        while let Some(artifact) = artifacts.recv().await {
            seen.push(artifact.value);
        }
        assert_eq!(seen, vec!["a.example.com", "b.example.com"]);
        assert!(errors.recv().await.is_none(), "error channel closes empty");
    }

    #[tokio::test]
    async fn default_stream_reports_failure() {
        let (mut artifacts, mut errors) = default_stream(CancelToken::new(), 8, async move {
            Err(AethonxError::SourceFailed {
                source_name: "broken".to_string(),
                message: "boom".to_string(),
            })
        });
        assert!(artifacts.recv().await.is_none());
        let err = errors.recv().await.expect("one error expected");
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn default_stream_honours_cancel() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let t = target();
        // The run future never resolves before the token check does.
        let (mut artifacts, _errors) = default_stream(cancel, 1, async move {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            let mut result = ScanResult::new(t);
            result.add_artifact(Artifact::new(
                ArtifactType::Subdomain,
                "x.example.com",
                "test",
                confidence::LOW,
            ));
            Ok(result)
        });
        assert!(artifacts.recv().await.is_none(), "cancelled stream closes");
    }
}
