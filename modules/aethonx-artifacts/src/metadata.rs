//! Typed artifact metadata.
//!
//! One variant per metadata-bearing artifact family. Every variant round-trips
//! losslessly through a flat string map (`to_map`/`from_map`) so results can
//! cross untyped boundaries (JSON reports, environment captures) without
//! losing fields. Absent optional fields are omitted from the map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use aethonx_common::error::AethonxError;
use aethonx_common::validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypedMetadata {
    Domain {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        registrar: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        created: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires: Option<String>,
        #[serde(default)]
        name_servers: Vec<String>,
    },
    Service {
        port: u16,
        protocol: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        product: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        banner: Option<String>,
    },
    Certificate {
        issuer: String,
        subject: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        not_before: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        not_after: Option<String>,
        #[serde(default)]
        san: Vec<String>,
    },
    Ip {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        asn: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        org: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        country: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ptr: Option<String>,
    },
    Technology {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(default)]
        categories: Vec<String>,
    },
    Vulnerability {
        cve: String,
        severity: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cvss: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Cloud {
        provider: String,
        resource_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
}

const LIST_SEP: char = ',';

impl TypedMetadata {
    pub fn kind(&self) -> &'static str {
        match self {
            TypedMetadata::Domain { .. } => "domain",
            TypedMetadata::Service { .. } => "service",
            TypedMetadata::Certificate { .. } => "certificate",
            TypedMetadata::Ip { .. } => "ip",
            TypedMetadata::Technology { .. } => "technology",
            TypedMetadata::Vulnerability { .. } => "vulnerability",
            TypedMetadata::Cloud { .. } => "cloud",
        }
    }

    /// Flatten to a string map. Lists are comma-joined; None fields omitted.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            map.insert(k.to_string(), v);
        };
        match self {
            TypedMetadata::Domain {
                registrar,
                created,
                expires,
                name_servers,
            } => {
                if let Some(v) = registrar {
                    put("registrar", v.clone());
                }
                if let Some(v) = created {
                    put("created", v.clone());
                }
                if let Some(v) = expires {
                    put("expires", v.clone());
                }
                if !name_servers.is_empty() {
                    put("name_servers", join_list(name_servers));
                }
            }
            TypedMetadata::Service {
                port,
                protocol,
                product,
                version,
                banner,
            } => {
                put("port", port.to_string());
                put("protocol", protocol.clone());
                if let Some(v) = product {
                    put("product", v.clone());
                }
                if let Some(v) = version {
                    put("version", v.clone());
                }
                if let Some(v) = banner {
                    put("banner", v.clone());
                }
            }
            TypedMetadata::Certificate {
                issuer,
                subject,
                not_before,
                not_after,
                san,
            } => {
                put("issuer", issuer.clone());
                put("subject", subject.clone());
                if let Some(v) = not_before {
                    put("not_before", v.clone());
                }
                if let Some(v) = not_after {
                    put("not_after", v.clone());
                }
                if !san.is_empty() {
                    put("san", join_list(san));
                }
            }
            TypedMetadata::Ip {
                asn,
                org,
                country,
                ptr,
            } => {
                if let Some(v) = asn {
                    put("asn", v.to_string());
                }
                if let Some(v) = org {
                    put("org", v.clone());
                }
                if let Some(v) = country {
                    put("country", v.clone());
                }
                if let Some(v) = ptr {
                    put("ptr", v.clone());
                }
            }
            TypedMetadata::Technology {
                name,
                version,
                categories,
            } => {
                put("name", name.clone());
                if let Some(v) = version {
                    put("version", v.clone());
                }
                if !categories.is_empty() {
                    put("categories", join_list(categories));
                }
            }
            TypedMetadata::Vulnerability {
                cve,
                severity,
                cvss,
                description,
            } => {
                put("cve", cve.clone());
                put("severity", severity.clone());
                if let Some(v) = cvss {
                    put("cvss", v.to_string());
                }
                if let Some(v) = description {
                    put("description", v.clone());
                }
            }
            TypedMetadata::Cloud {
                provider,
                resource_type,
                region,
            } => {
                put("provider", provider.clone());
                put("resource_type", resource_type.clone());
                if let Some(v) = region {
                    put("region", v.clone());
                }
            }
        }
        map
    }

    /// Rebuild a variant from its flattened form. Unknown kinds and missing
    /// required fields are parse errors.
    pub fn from_map(kind: &str, map: &BTreeMap<String, String>) -> Result<Self, AethonxError> {
        let opt = |k: &str| map.get(k).cloned();
        let req = |k: &str| {
            map.get(k).cloned().ok_or_else(|| {
                AethonxError::Parse(format!("{kind} metadata missing required field '{k}'"))
            })
        };
        let list = |k: &str| map.get(k).map(|v| split_list(v)).unwrap_or_default();

        match kind {
            "domain" => Ok(TypedMetadata::Domain {
                registrar: opt("registrar"),
                created: opt("created"),
                expires: opt("expires"),
                name_servers: list("name_servers"),
            }),
            "service" => Ok(TypedMetadata::Service {
                port: req("port")?.parse().map_err(|_| {
                    AethonxError::Parse("service metadata has non-numeric port".to_string())
                })?,
                protocol: req("protocol")?,
                product: opt("product"),
                version: opt("version"),
                banner: opt("banner"),
            }),
            "certificate" => Ok(TypedMetadata::Certificate {
                issuer: req("issuer")?,
                subject: req("subject")?,
                not_before: opt("not_before"),
                not_after: opt("not_after"),
                san: list("san"),
            }),
            "ip" => Ok(TypedMetadata::Ip {
                asn: match opt("asn") {
                    Some(v) => Some(v.parse().map_err(|_| {
                        AethonxError::Parse("ip metadata has non-numeric asn".to_string())
                    })?),
                    None => None,
                },
                org: opt("org"),
                country: opt("country"),
                ptr: opt("ptr"),
            }),
            "technology" => Ok(TypedMetadata::Technology {
                name: req("name")?,
                version: opt("version"),
                categories: list("categories"),
            }),
            "vulnerability" => Ok(TypedMetadata::Vulnerability {
                cve: req("cve")?,
                severity: req("severity")?,
                cvss: match opt("cvss") {
                    Some(v) => Some(v.parse().map_err(|_| {
                        AethonxError::Parse("vulnerability metadata has non-numeric cvss".to_string())
                    })?),
                    None => None,
                },
                description: opt("description"),
            }),
            "cloud" => Ok(TypedMetadata::Cloud {
                provider: req("provider")?,
                resource_type: req("resource_type")?,
                region: opt("region"),
            }),
            other => Err(AethonxError::Parse(format!(
                "unknown metadata kind: {other}"
            ))),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            TypedMetadata::Domain { .. } => true,
            TypedMetadata::Service { port, protocol, .. } => {
                *port > 0 && !protocol.trim().is_empty()
            }
            TypedMetadata::Certificate { issuer, subject, .. } => {
                !issuer.trim().is_empty() && !subject.trim().is_empty()
            }
            TypedMetadata::Ip { ptr, .. } => {
                ptr.as_deref().map_or(true, validate::is_valid_domain)
            }
            TypedMetadata::Technology { name, .. } => !name.trim().is_empty(),
            TypedMetadata::Vulnerability { cve, cvss, .. } => {
                cve.to_ascii_uppercase().starts_with("CVE-")
                    && cvss.map_or(true, |v| (0.0..=10.0).contains(&v))
            }
            TypedMetadata::Cloud {
                provider,
                resource_type,
                ..
            } => !provider.trim().is_empty() && !resource_type.trim().is_empty(),
        }
    }
}

fn join_list(items: &[String]) -> String {
    items.join(&LIST_SEP.to_string())
}

fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(LIST_SEP)
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_round_trips() {
        let meta = TypedMetadata::Certificate {
            issuer: "C=US, O=Let's Encrypt".replace(", ", "/ "),
            subject: "CN=example.com".to_string(),
            not_before: Some("2026-01-01".to_string()),
            not_after: None,
            san: vec!["example.com".to_string(), "www.example.com".to_string()],
        };
        let map = meta.to_map();
        assert!(!map.contains_key("not_after"));
        let back = TypedMetadata::from_map(meta.kind(), &map).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn service_round_trips() {
        let meta = TypedMetadata::Service {
            port: 8443,
            protocol: "tcp".to_string(),
            product: Some("nginx".to_string()),
            version: Some("1.25.3".to_string()),
            banner: None,
        };
        let back = TypedMetadata::from_map("service", &meta.to_map()).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn vulnerability_round_trips_and_validates() {
        let meta = TypedMetadata::Vulnerability {
            cve: "CVE-2024-3094".to_string(),
            severity: "critical".to_string(),
            cvss: Some(10.0),
            description: None,
        };
        assert!(meta.is_valid());
        let back = TypedMetadata::from_map("vulnerability", &meta.to_map()).unwrap();
        assert_eq!(back, meta);

        let bad = TypedMetadata::Vulnerability {
            cve: "GHSA-xxxx".to_string(),
            severity: "low".to_string(),
            cvss: None,
            description: None,
        };
        assert!(!bad.is_valid());
    }

    #[test]
    fn missing_required_field_is_err() {
        let map = BTreeMap::new();
        assert!(TypedMetadata::from_map("service", &map).is_err());
        assert!(TypedMetadata::from_map("nonesuch", &map).is_err());
    }

    #[test]
    fn empty_lists_are_omitted() {
        let meta = TypedMetadata::Domain {
            registrar: None,
            created: None,
            expires: None,
            name_servers: Vec::new(),
        };
        assert!(meta.to_map().is_empty());
        let back = TypedMetadata::from_map("domain", &meta.to_map()).unwrap();
        assert_eq!(back, meta);
    }
}
