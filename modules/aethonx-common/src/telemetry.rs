//! Logging bootstrap.
//!
//! Level comes from `AETHONX_LOG_LEVEL`; short aliases are accepted and
//! anything unknown falls back to info so a typo never silences a run.

use tracing_subscriber::EnvFilter;

/// Map an AETHONX_LOG_LEVEL value onto a tracing level directive.
pub fn level_directive(raw: &str) -> &'static str {
    match raw.trim().to_ascii_lowercase().as_str() {
        "debug" | "dbg" => "debug",
        "warn" | "warning" => "warn",
        "err" | "error" => "error",
        "info" | "inf" | "" => "info",
        _ => "info",
    }
}

/// Initialize the global tracing subscriber. Call once at program start.
pub fn init_logging(raw_level: &str) {
    let directive = level_directive(raw_level);
    let filter = EnvFilter::new(format!("aethonx={directive},{directive}"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve() {
        assert_eq!(level_directive("debug"), "debug");
        assert_eq!(level_directive("DBG"), "debug");
        assert_eq!(level_directive("warning"), "warn");
        assert_eq!(level_directive("err"), "error");
        assert_eq!(level_directive("info"), "info");
        assert_eq!(level_directive(""), "info");
        assert_eq!(level_directive("verbose"), "info");
    }
}
