//! Process memory sampling.
//!
//! Linux reads `VmRSS` from `/proc/self/status`; other platforms return
//! None and callers fall back to their own accounting.

/// Resident set size in bytes, when the platform exposes it.
pub fn resident_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
                return Some(kb * 1024);
            }
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn resident_is_nonzero_on_linux() {
        let rss = resident_bytes().expect("VmRSS should be readable");
        assert!(rss > 0);
    }
}
