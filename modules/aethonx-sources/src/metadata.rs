use serde::{Deserialize, Serialize};

use aethonx_artifacts::ArtifactType;
use aethonx_common::config::DEFAULT_PRIORITY;

// ---------------------------------------------------------------------------
// SourceMode / SourceKind
// ---------------------------------------------------------------------------

/// Which scan modes a source participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Passive,
    Active,
    Both,
}

impl SourceMode {
    /// True when the source may run under the given scan mode.
    pub fn allows(&self, mode: aethonx_artifacts::ScanMode) -> bool {
        use aethonx_artifacts::ScanMode;
        match (self, mode) {
            (SourceMode::Both, _) => true,
            (_, ScanMode::Hybrid) => true,
            (SourceMode::Passive, ScanMode::Passive) => true,
            (SourceMode::Active, ScanMode::Active) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceMode::Passive => "passive",
            SourceMode::Active => "active",
            SourceMode::Both => "both",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SourceMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "passive" => Ok(Self::Passive),
            "active" => Ok(Self::Active),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown SourceMode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Api,
    Cli,
    Builtin,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceKind::Api => "api",
            SourceKind::Cli => "cli",
            SourceKind::Builtin => "builtin",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "api" => Ok(Self::Api),
            "cli" => Ok(Self::Cli),
            "builtin" => Ok(Self::Builtin),
            other => Err(format!("unknown SourceKind: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// SourceMetadata
// ---------------------------------------------------------------------------

/// Static description a factory registers alongside itself. `input_artifacts`
/// empty means stage 0 (no upstream dependency); `priority` orders builds,
/// higher first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub mode: SourceMode,
    pub kind: SourceKind,
    pub requires_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub input_artifacts: Vec<ArtifactType>,
    #[serde(default)]
    pub output_artifacts: Vec<ArtifactType>,
    pub priority: i32,
    pub stage_hint: u32,
}

impl SourceMetadata {
    pub fn new(name: &str, description: &str, mode: SourceMode, kind: SourceKind) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            version: "0.1.0".to_string(),
            author: "aethonx".to_string(),
            mode,
            kind,
            requires_auth: false,
            rate_limit: None,
            input_artifacts: Vec::new(),
            output_artifacts: Vec::new(),
            priority: DEFAULT_PRIORITY,
            stage_hint: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_outputs(mut self, outputs: &[ArtifactType]) -> Self {
        self.output_artifacts = outputs.to_vec();
        self
    }

    pub fn with_inputs(mut self, inputs: &[ArtifactType]) -> Self {
        self.input_artifacts = inputs.to_vec();
        self.stage_hint = 1;
        self
    }

    /// Stage 0 sources consume nothing produced by other sources.
    pub fn is_stage_zero(&self) -> bool {
        self.input_artifacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aethonx_artifacts::ScanMode;

    #[test]
    fn mode_gating() {
        assert!(SourceMode::Passive.allows(ScanMode::Passive));
        assert!(SourceMode::Passive.allows(ScanMode::Hybrid));
        assert!(!SourceMode::Passive.allows(ScanMode::Active));
        assert!(SourceMode::Both.allows(ScanMode::Active));
        assert!(!SourceMode::Active.allows(ScanMode::Passive));
    }

    #[test]
    fn stage_inference() {
        let meta = SourceMetadata::new("x", "", SourceMode::Passive, SourceKind::Cli);
        assert!(meta.is_stage_zero());
        let staged = meta.with_inputs(&[ArtifactType::Subdomain]);
        assert!(!staged.is_stage_zero());
        assert_eq!(staged.stage_hint, 1);
    }
}
