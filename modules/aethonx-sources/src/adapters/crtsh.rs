//! crt.sh adapter.
//!
//! Certificate-transparency search over the crt.sh JSON endpoint. Every
//! certificate yields a certificate artifact with typed metadata; the
//! `name_value` hosts become in-scope subdomain artifacts related to it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use aethonx_artifacts::{
    confidence, Artifact, ArtifactType, RelationType, ScanResult, Target, TypedMetadata,
};
use aethonx_common::config::{self, SourceConfig};
use aethonx_common::validate::{is_valid_domain, normalize_domain};
use aethonx_common::{AethonxError, CancelToken};

use crate::metadata::{SourceKind, SourceMetadata, SourceMode};
use crate::registry::SourceRegistry;
use crate::source::Source;

const NAME: &str = "crtsh";
const DEFAULT_BASE_URL: &str = "https://crt.sh";

pub fn metadata() -> SourceMetadata {
    SourceMetadata::new(
        NAME,
        "Certificate transparency logs via crt.sh",
        SourceMode::Passive,
        SourceKind::Api,
    )
    .with_priority(9)
    .with_outputs(&[ArtifactType::Certificate, ArtifactType::Subdomain])
}

pub fn register(registry: &SourceRegistry) -> Result<(), AethonxError> {
    registry.register(
        NAME,
        Arc::new(|config| CrtshSource::new(config).map(|s| Box::new(s) as Box<dyn Source>)),
        metadata(),
    )
}

/// One row of the crt.sh JSON response. Fields vary with endpoint version;
/// everything is optional and defaulted.
#[derive(Debug, Deserialize)]
struct CrtshEntry {
    #[serde(default)]
    issuer_name: String,
    #[serde(default)]
    common_name: String,
    #[serde(default)]
    name_value: String,
    #[serde(default)]
    serial_number: String,
    #[serde(default)]
    not_before: Option<String>,
    #[serde(default)]
    not_after: Option<String>,
}

pub struct CrtshSource {
    base_url: String,
    client: reqwest::Client,
}

impl CrtshSource {
    pub fn new(config: SourceConfig) -> Result<Self, AethonxError> {
        let base_url = config::get_string(&config.custom, "base_url", DEFAULT_BASE_URL);
        let client = reqwest::Client::builder()
            .timeout(config.timeout.max(Duration::from_secs(1)))
            .user_agent("aethonx/0.1")
            .build()
            .map_err(|e| AethonxError::Config(format!("crtsh http client: {e}")))?;
        Ok(Self { base_url, client })
    }

    async fn fetch(&self, root: &str) -> Result<Vec<CrtshEntry>, AethonxError> {
        let url = format!("{}/?q=%.{}&output=json", self.base_url, root);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AethonxError::SourceFailed {
                source_name: NAME.to_string(),
                message: format!("request failed: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(AethonxError::SourceFailed {
                source_name: NAME.to_string(),
                message: format!("crt.sh returned {}", response.status()),
            });
        }
        response
            .json::<Vec<CrtshEntry>>()
            .await
            .map_err(|e| AethonxError::Parse(format!("crt.sh response: {e}")))
    }
}

/// Fold one certificate entry into the result.
fn absorb_entry(result: &mut ScanResult, target: &Target, entry: &CrtshEntry) {
    let mut names: Vec<(String, bool)> = Vec::new();
    for raw in entry.name_value.lines().chain(std::iter::once(entry.common_name.as_str())) {
        let mut host = normalize_domain(raw);
        if host.is_empty() {
            continue;
        }
        let wildcard = host.starts_with("*.");
        if wildcard {
            host = host.trim_start_matches("*.").to_string();
        }
        if !is_valid_domain(&host) || !target.is_in_scope(&host) {
            continue;
        }
        if !names.iter().any(|(existing, _)| existing == &host) {
            names.push((host, wildcard));
        }
    }
    if names.is_empty() {
        return;
    }

    let subject = if entry.common_name.is_empty() {
        names[0].0.clone()
    } else {
        entry.common_name.to_ascii_lowercase()
    };
    let cert_value = if entry.serial_number.is_empty() {
        format!("{}/{subject}", entry.issuer_name)
    } else {
        entry.serial_number.clone()
    };

    let cert = Artifact::new(ArtifactType::Certificate, &cert_value, NAME, confidence::HIGH)
        .with_metadata(TypedMetadata::Certificate {
            issuer: entry.issuer_name.clone(),
            subject,
            not_before: entry.not_before.clone(),
            not_after: entry.not_after.clone(),
            san: names.iter().map(|(host, _)| host.clone()).collect(),
        });
    result.add_artifact(cert);

    for (host, wildcard) in names {
        let mut artifact = Artifact::new(ArtifactType::Subdomain, &host, NAME, confidence::HIGH);
        if wildcard {
            artifact.add_tag("wildcard");
        }
        artifact.relate_to(
            ArtifactType::Certificate,
            &cert_value,
            RelationType::UsesCert,
            confidence::HIGH,
        );
        result.add_artifact(artifact);
    }
}

#[async_trait]
impl Source for CrtshSource {
    fn name(&self) -> &str {
        NAME
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Passive
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn run(&self, cancel: &CancelToken, target: &Target) -> Result<ScanResult, AethonxError> {
        let entries = tokio::select! {
            _ = cancel.cancelled() => return Err(AethonxError::Cancelled),
            entries = self.fetch(&target.root) => entries?,
        };

        let mut result = ScanResult::new(target.clone());
        for entry in &entries {
            absorb_entry(&mut result, target, entry);
        }
        result.set_source_metadata(NAME, json!({ "certificates": entries.len() }));
        info!(
            source = NAME,
            certificates = entries.len(),
            artifacts = result.artifacts.len(),
            "crt.sh run complete"
        );
        result.finish();
        Ok(result)
    }

    async fn close(&self) -> Result<(), AethonxError> {
        Ok(())
    }
}
