//! Source layer.
//!
//! A source wraps one intelligence feed (an external CLI tool, an HTTP API,
//! or a builtin) behind the uniform `Source` contract. The process-wide
//! registry accepts self-registering factories and builds configured sources
//! in priority order; `CliEngine` is the shared subprocess substrate under
//! every CLI-backed source.

pub mod adapters;
pub mod cli;
pub mod metadata;
pub mod registry;
pub mod source;
pub mod throttle;

pub use cli::{CliEngine, ExecInput, ExecOutcome, LineFlow, LineHandler};
pub use metadata::{SourceKind, SourceMetadata, SourceMode};
pub use registry::{global, SourceFactory, SourceRegistry};
pub use source::{AdvancedSource, InputConsumer, ProgressUpdate, Source, StreamingSource};
pub use throttle::{AdaptiveThrottle, ThrottleConfig};
