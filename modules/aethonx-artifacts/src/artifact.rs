use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aethonx_common::validate::normalize_domain;

use crate::metadata::TypedMetadata;

/// Namespace for deriving artifact identity. Fixed so the same (type, value)
/// always collides to the same id, across sources and across processes.
const ARTIFACT_NAMESPACE: Uuid = Uuid::from_u128(0xae7b0a1c_9d4e_4f2b_8c63_51d20a7e9f04);

// ---------------------------------------------------------------------------
// Confidence
// ---------------------------------------------------------------------------

/// Canonical confidence bands. Confidence only moves up on merge; a verified
/// observation is never demoted by a weaker later one.
pub mod confidence {
    pub const LOW: f64 = 0.45;
    pub const MEDIUM: f64 = 0.60;
    pub const HIGH: f64 = 0.85;
    pub const VERIFIED: f64 = 1.0;
}

// ---------------------------------------------------------------------------
// ArtifactType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Domain,
    Subdomain,
    Url,
    Ip,
    Port,
    Service,
    Endpoint,
    Parameter,
    Certificate,
    Technology,
    Vulnerability,
    Javascript,
    SensitiveFile,
    BackupFile,
    Repository,
    Api,
    Asn,
    Cidr,
    CloudResource,
    DnsRecord,
    Email,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Domain => "domain",
            ArtifactType::Subdomain => "subdomain",
            ArtifactType::Url => "url",
            ArtifactType::Ip => "ip",
            ArtifactType::Port => "port",
            ArtifactType::Service => "service",
            ArtifactType::Endpoint => "endpoint",
            ArtifactType::Parameter => "parameter",
            ArtifactType::Certificate => "certificate",
            ArtifactType::Technology => "technology",
            ArtifactType::Vulnerability => "vulnerability",
            ArtifactType::Javascript => "javascript",
            ArtifactType::SensitiveFile => "sensitive_file",
            ArtifactType::BackupFile => "backup_file",
            ArtifactType::Repository => "repository",
            ArtifactType::Api => "api",
            ArtifactType::Asn => "asn",
            ArtifactType::Cidr => "cidr",
            ArtifactType::CloudResource => "cloud_resource",
            ArtifactType::DnsRecord => "dns_record",
            ArtifactType::Email => "email",
        }
    }

    /// Types whose value is a hostname subject to scope checks.
    pub fn is_host_shaped(&self) -> bool {
        matches!(self, ArtifactType::Domain | ArtifactType::Subdomain)
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "domain" => Ok(Self::Domain),
            "subdomain" => Ok(Self::Subdomain),
            "url" => Ok(Self::Url),
            "ip" => Ok(Self::Ip),
            "port" => Ok(Self::Port),
            "service" => Ok(Self::Service),
            "endpoint" => Ok(Self::Endpoint),
            "parameter" => Ok(Self::Parameter),
            "certificate" => Ok(Self::Certificate),
            "technology" => Ok(Self::Technology),
            "vulnerability" => Ok(Self::Vulnerability),
            "javascript" => Ok(Self::Javascript),
            "sensitive_file" => Ok(Self::SensitiveFile),
            "backup_file" => Ok(Self::BackupFile),
            "repository" => Ok(Self::Repository),
            "api" => Ok(Self::Api),
            "asn" => Ok(Self::Asn),
            "cidr" => Ok(Self::Cidr),
            "cloud_resource" => Ok(Self::CloudResource),
            "dns_record" => Ok(Self::DnsRecord),
            "email" => Ok(Self::Email),
            other => Err(format!("unknown ArtifactType: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    HostedOn,
    ResolvesTo,
    UsesTech,
    UsesCert,
    HasCname,
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelationType::HostedOn => "hosted_on",
            RelationType::ResolvesTo => "resolves_to",
            RelationType::UsesTech => "uses_tech",
            RelationType::UsesCert => "uses_cert",
            RelationType::HasCname => "has_cname",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hosted_on" => Ok(Self::HostedOn),
            "resolves_to" => Ok(Self::ResolvesTo),
            "uses_tech" => Ok(Self::UsesTech),
            "uses_cert" => Ok(Self::UsesCert),
            "has_cname" => Ok(Self::HasCname),
            other => Err(format!("unknown RelationType: {other}")),
        }
    }
}

/// Edge to another artifact. The target id may identify an artifact already
/// in the result or one derivable from its (type, value): identity is
/// deterministic, so relation targets can be constructed on use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub target_id: Uuid,
    pub relation: RelationType,
    pub confidence: f64,
    pub source: String,
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub value: String,
    pub source: String,
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TypedMetadata>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl Artifact {
    /// Create an artifact with a canonical value and derived identity.
    pub fn new(artifact_type: ArtifactType, value: &str, source: &str, confidence: f64) -> Self {
        let value = canonical_value(artifact_type, value);
        let id = Self::derive_id(artifact_type, &value);
        Self {
            id,
            artifact_type,
            value,
            source: source.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            tags: Vec::new(),
            metadata: None,
            relations: Vec::new(),
        }
    }

    /// Deterministic identity: two artifacts with equal (type, value) collide.
    pub fn derive_id(artifact_type: ArtifactType, value: &str) -> Uuid {
        let key = format!("{}:{}", artifact_type.as_str(), value);
        Uuid::new_v5(&ARTIFACT_NAMESPACE, key.as_bytes())
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.add_tag(tag);
        self
    }

    pub fn with_metadata(mut self, metadata: TypedMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Append a tag unless already present. Order of first appearance is kept.
    pub fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    /// Relate this artifact to the one identified by (type, value).
    pub fn relate_to(
        &mut self,
        target_type: ArtifactType,
        target_value: &str,
        relation: RelationType,
        confidence: f64,
    ) {
        let target_id = Self::derive_id(target_type, &canonical_value(target_type, target_value));
        if self
            .relations
            .iter()
            .any(|r| r.target_id == target_id && r.relation == relation)
        {
            return;
        }
        self.relations.push(Relation {
            target_id,
            relation,
            confidence: confidence.clamp(0.0, 1.0),
            source: self.source.clone(),
        });
    }

    /// Fold a second observation of the same (type, value) into this one:
    /// tag union keeping first-seen order, max confidence, relation append
    /// deduplicated on (target, relation). Metadata is kept from the first
    /// observation unless it was absent.
    pub fn merge(&mut self, other: &Artifact) {
        debug_assert_eq!(self.id, other.id);
        for tag in &other.tags {
            self.add_tag(tag);
        }
        if other.confidence > self.confidence {
            self.confidence = other.confidence;
        }
        if self.metadata.is_none() {
            self.metadata = other.metadata.clone();
        }
        for rel in &other.relations {
            if !self
                .relations
                .iter()
                .any(|r| r.target_id == rel.target_id && r.relation == rel.relation)
            {
                self.relations.push(rel.clone());
            }
        }
    }
}

/// Canonical string form per type: hostnames and emails are lowered and
/// trimmed, everything else is trimmed as-is.
fn canonical_value(artifact_type: ArtifactType, value: &str) -> String {
    match artifact_type {
        ArtifactType::Domain | ArtifactType::Subdomain => normalize_domain(value),
        ArtifactType::Email => value.trim().to_ascii_lowercase(),
        _ => value.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_type_value_equal_id() {
        let a = Artifact::new(ArtifactType::Subdomain, "API.Example.com", "crtsh", confidence::LOW);
        let b = Artifact::new(ArtifactType::Subdomain, "api.example.com", "subfinder", confidence::HIGH);
        assert_eq!(a.id, b.id);
        assert_eq!(a.value, "api.example.com");

        let c = Artifact::new(ArtifactType::Url, "api.example.com", "wayback", confidence::LOW);
        assert_ne!(a.id, c.id, "type participates in identity");
    }

    #[test]
    fn merge_unions_tags_and_takes_max_confidence() {
        let mut a = Artifact::new(ArtifactType::Subdomain, "api.example.com", "crtsh", confidence::MEDIUM)
            .with_tag("wildcard");
        let mut b = Artifact::new(ArtifactType::Subdomain, "api.example.com", "httpx", confidence::VERIFIED)
            .with_tag("alive");
        b.add_tag("wildcard");

        a.merge(&b);
        assert_eq!(a.tags, vec!["wildcard", "alive"]);
        assert_eq!(a.confidence, confidence::VERIFIED);

        // Merging the weaker observation back in changes nothing.
        let before = a.clone();
        a.merge(&Artifact::new(
            ArtifactType::Subdomain,
            "api.example.com",
            "crtsh",
            confidence::LOW,
        ));
        assert_eq!(a.confidence, before.confidence);
        assert_eq!(a.tags, before.tags);
    }

    #[test]
    fn relations_deduplicate() {
        let mut a = Artifact::new(ArtifactType::Subdomain, "api.example.com", "subfinder", confidence::MEDIUM);
        a.relate_to(ArtifactType::Ip, "203.0.113.9", RelationType::ResolvesTo, confidence::HIGH);
        a.relate_to(ArtifactType::Ip, "203.0.113.9", RelationType::ResolvesTo, confidence::LOW);
        assert_eq!(a.relations.len(), 1);
        assert_eq!(
            a.relations[0].target_id,
            Artifact::derive_id(ArtifactType::Ip, "203.0.113.9")
        );
    }

    #[test]
    fn type_round_trips_through_strings() {
        for t in [
            ArtifactType::Domain,
            ArtifactType::SensitiveFile,
            ArtifactType::CloudResource,
            ArtifactType::DnsRecord,
        ] {
            let s = t.to_string();
            assert_eq!(s.parse::<ArtifactType>().unwrap(), t);
        }
        assert!("gadget".parse::<ArtifactType>().is_err());
    }
}
