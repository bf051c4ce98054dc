use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use aethonx_common::validate::normalize_domain;

use crate::artifact::{Artifact, ArtifactType};

// ---------------------------------------------------------------------------
// ScanMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Passive,
    Active,
    Hybrid,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanMode::Passive => "passive",
            ScanMode::Active => "active",
            ScanMode::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ScanMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "passive" => Ok(Self::Passive),
            "active" => Ok(Self::Active),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown ScanMode: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub root: String,
    pub mode: ScanMode,
}

impl Target {
    pub fn new(root: &str, mode: ScanMode) -> Self {
        Self {
            root: normalize_domain(root),
            mode,
        }
    }

    /// A host is in scope when it equals the root or sits under it at a DNS
    /// label boundary. Wildcard hosts are never in scope.
    pub fn is_in_scope(&self, host: &str) -> bool {
        let host = host.trim().to_ascii_lowercase();
        if host.starts_with("*.") || host.contains('*') {
            return false;
        }
        let host = host.trim_end_matches('.');
        host == self.root || host.ends_with(&format!(".{}", self.root))
    }
}

// ---------------------------------------------------------------------------
// ScanResult
// ---------------------------------------------------------------------------

/// A (source, message) pair used for both warnings and non-fatal errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceIssue {
    pub source: String,
    pub message: String,
}

/// Per-target accumulator. Artifacts keep insertion order; adding the same
/// (type, value) twice merges instead of duplicating.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub target: Target,
    pub artifacts: Vec<Artifact>,
    pub warnings: Vec<SourceIssue>,
    pub errors: Vec<SourceIssue>,
    pub source_metadata: HashMap<String, Value>,
    pub environment: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    index: HashMap<Uuid, usize>,
}

impl ScanResult {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            artifacts: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            source_metadata: HashMap::new(),
            environment: HashMap::new(),
            started_at: Utc::now(),
            finished_at: None,
            index: HashMap::new(),
        }
    }

    /// Merge-or-insert. Returns the artifact's id either way.
    pub fn add_artifact(&mut self, artifact: Artifact) -> Uuid {
        let id = artifact.id;
        match self.index.get(&id) {
            Some(&pos) => self.artifacts[pos].merge(&artifact),
            None => {
                self.index.insert(id, self.artifacts.len());
                self.artifacts.push(artifact);
            }
        }
        id
    }

    pub fn get(&self, id: Uuid) -> Option<&Artifact> {
        self.index.get(&id).map(|&pos| &self.artifacts[pos])
    }

    pub fn artifacts_of_type(&self, artifact_type: ArtifactType) -> Vec<&Artifact> {
        self.artifacts
            .iter()
            .filter(|a| a.artifact_type == artifact_type)
            .collect()
    }

    pub fn add_warning(&mut self, source: &str, message: &str) {
        self.warnings.push(SourceIssue {
            source: source.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_error(&mut self, source: &str, message: &str) {
        self.errors.push(SourceIssue {
            source: source.to_string(),
            message: message.to_string(),
        });
    }

    pub fn set_source_metadata(&mut self, source: &str, metadata: Value) {
        self.source_metadata.insert(source.to_string(), metadata);
    }

    /// Fold another result (typically one source's output) into this one.
    pub fn merge_result(&mut self, other: ScanResult) {
        for artifact in other.artifacts {
            self.add_artifact(artifact);
        }
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
        self.source_metadata.extend(other.source_metadata);
        self.environment.extend(other.environment);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Keep only artifacts matching the predicate, rebuilding the id index.
    /// Returns how many were dropped.
    pub fn retain_artifacts<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&Artifact) -> bool,
    {
        let before = self.artifacts.len();
        self.artifacts.retain(|a| keep(a));
        self.index = self
            .artifacts
            .iter()
            .enumerate()
            .map(|(pos, a)| (a.id, pos))
            .collect();
        before - self.artifacts.len()
    }

    /// Mutable access by id, for in-place tag/confidence updates.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Artifact> {
        self.index.get(&id).map(|&pos| &mut self.artifacts[pos])
    }
}

impl<'de> Deserialize<'de> for ScanResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            target: Target,
            #[serde(default)]
            artifacts: Vec<Artifact>,
            #[serde(default)]
            warnings: Vec<SourceIssue>,
            #[serde(default)]
            errors: Vec<SourceIssue>,
            #[serde(default)]
            source_metadata: HashMap<String, Value>,
            #[serde(default)]
            environment: HashMap<String, String>,
            started_at: DateTime<Utc>,
            #[serde(default)]
            finished_at: Option<DateTime<Utc>>,
        }
        let raw = Raw::deserialize(deserializer)?;
        let mut result = ScanResult::new(raw.target);
        result.started_at = raw.started_at;
        result.finished_at = raw.finished_at;
        result.warnings = raw.warnings;
        result.errors = raw.errors;
        result.source_metadata = raw.source_metadata;
        result.environment = raw.environment;
        for artifact in raw.artifacts {
            result.add_artifact(artifact);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::confidence;

    fn target() -> Target {
        Target::new("Example.COM", ScanMode::Passive)
    }

    #[test]
    fn scope_checks_label_boundaries() {
        let t = target();
        assert!(t.is_in_scope("example.com"));
        assert!(t.is_in_scope("API.example.com"));
        assert!(t.is_in_scope("deep.api.example.com"));
        assert!(!t.is_in_scope("notexample.com"));
        assert!(!t.is_in_scope("example.com.evil.net"));
        assert!(!t.is_in_scope("*.example.com"));
    }

    #[test]
    fn add_artifact_is_idempotent() {
        let mut result = ScanResult::new(target());
        let a = Artifact::new(ArtifactType::Subdomain, "api.example.com", "crtsh", confidence::MEDIUM)
            .with_tag("wildcard");
        let b = Artifact::new(ArtifactType::Subdomain, "api.example.com", "subfinder", confidence::HIGH)
            .with_tag("alive");

        let id_a = result.add_artifact(a);
        let id_b = result.add_artifact(b);
        assert_eq!(id_a, id_b);
        assert_eq!(result.artifacts.len(), 1);

        let merged = result.get(id_a).unwrap();
        assert_eq!(merged.confidence, confidence::HIGH);
        assert_eq!(merged.tags, vec!["wildcard", "alive"]);
    }

    #[test]
    fn merge_result_folds_everything() {
        let mut total = ScanResult::new(target());
        total.add_artifact(Artifact::new(
            ArtifactType::Subdomain,
            "api.example.com",
            "crtsh",
            confidence::LOW,
        ));

        let mut part = ScanResult::new(target());
        part.add_artifact(Artifact::new(
            ArtifactType::Subdomain,
            "api.example.com",
            "subfinder",
            confidence::HIGH,
        ));
        part.add_artifact(Artifact::new(
            ArtifactType::Url,
            "https://example.com/login",
            "wayback",
            confidence::MEDIUM,
        ));
        part.add_warning("subfinder", "rate limited");

        total.merge_result(part);
        assert_eq!(total.artifacts.len(), 2);
        assert_eq!(total.warnings.len(), 1);
        let sub = total
            .get(Artifact::derive_id(ArtifactType::Subdomain, "api.example.com"))
            .unwrap();
        assert_eq!(sub.confidence, confidence::HIGH);
    }

    #[test]
    fn ordered_by_insertion() {
        let mut result = ScanResult::new(target());
        for host in ["c.example.com", "a.example.com", "b.example.com"] {
            result.add_artifact(Artifact::new(
                ArtifactType::Subdomain,
                host,
                "test",
                confidence::LOW,
            ));
        }
        let values: Vec<&str> = result.artifacts.iter().map(|a| a.value.as_str()).collect();
        assert_eq!(values, vec!["c.example.com", "a.example.com", "b.example.com"]);
    }
}
