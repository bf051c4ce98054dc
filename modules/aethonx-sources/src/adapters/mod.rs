//! Bundled source adapters.
//!
//! Thin wrappers over the external tools and APIs the scanner ships with:
//! `waybackurls` (historical URLs), `subfinder` (passive subdomains, JSONL),
//! and crt.sh (certificate transparency, HTTP API). Each registers a factory
//! under its tool name; everything heavier lives in the shared substrates.

pub mod crtsh;
pub mod subfinder;
pub mod wayback;

use tracing::warn;

use crate::registry::SourceRegistry;

/// Register every bundled adapter into `registry`. Called once at program
/// start; re-registration (tests re-running setup) is warned, not fatal.
pub fn register_bundled(registry: &SourceRegistry) {
    let registrations = [
        wayback::register(registry),
        subfinder::register(registry),
        crtsh::register(registry),
    ];
    for result in registrations {
        if let Err(e) = result {
            warn!(error = %e, "bundled source registration skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_sources_register_once() {
        let registry = SourceRegistry::new();
        register_bundled(&registry);
        assert_eq!(registry.list(), vec!["crtsh", "subfinder", "waybackurls"]);
        // Second pass warns but leaves the registry intact.
        register_bundled(&registry);
        assert_eq!(registry.list().len(), 3);
    }
}
