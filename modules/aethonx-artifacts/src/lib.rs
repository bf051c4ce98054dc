//! Artifact domain model.
//!
//! An `Artifact` is one typed finding produced by a source (a subdomain, a
//! URL, a certificate, ...). Artifacts carry confidence, tags, optional
//! typed metadata, and relations to other artifacts. `ScanResult` is the
//! per-target accumulator with idempotent merge semantics; `Target` owns the
//! scope predicate.

pub mod artifact;
pub mod metadata;
pub mod result;

pub use artifact::{confidence, Artifact, ArtifactType, Relation, RelationType};
pub use metadata::TypedMetadata;
pub use result::{ScanMode, ScanResult, SourceIssue, Target};
