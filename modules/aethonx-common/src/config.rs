//! Configuration.
//!
//! `Config` is loaded from environment variables at program start.
//! `SourceConfig` is the per-source unit the registry hands to factories:
//! a few well-known fields plus an untyped `custom` map that adapters read
//! through the typed getters below. Getters never fail; malformed values
//! fall back to the caller's default.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default priority assigned to sources that do not declare one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Default per-source run timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw value of AETHONX_LOG_LEVEL (normalized by telemetry::init_logging).
    pub log_level: String,
    /// Default timeout applied to sources that do not set their own.
    pub default_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("AETHONX_LOG_LEVEL").unwrap_or_default(),
            default_timeout: env::var("AETHONX_SOURCE_TIMEOUT")
                .ok()
                .and_then(|v| parse_duration_str(&v))
                .unwrap_or(DEFAULT_TIMEOUT),
        }
    }
}

/// Per-source configuration resolved by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub enabled: bool,
    pub priority: i32,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default)]
    pub custom: HashMap<String, Value>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: DEFAULT_PRIORITY,
            timeout: DEFAULT_TIMEOUT,
            custom: HashMap::new(),
        }
    }
}

impl SourceConfig {
    pub fn enabled() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_custom(mut self, key: &str, value: Value) -> Self {
        self.custom.insert(key.to_string(), value);
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

// ---------------------------------------------------------------------------
// Typed readers over the untyped custom map
// ---------------------------------------------------------------------------

pub fn get_string(map: &HashMap<String, Value>, key: &str, default: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        _ => default.to_string(),
    }
}

/// Integers accept native JSON integers and integral floats (JSON numerics
/// arrive as f64 after a round-trip through some decoders).
pub fn get_int(map: &HashMap<String, Value>, key: &str, default: i64) -> i64 {
    match map.get(key) {
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 {
                    f as i64
                } else {
                    default
                }
            } else {
                default
            }
        }
        _ => default,
    }
}

/// Bools accept native bools and the string forms "true"/"false" (external
/// tools sometimes emit bool-as-string).
pub fn get_bool(map: &HashMap<String, Value>, key: &str, default: bool) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => default,
        },
        _ => default,
    }
}

pub fn get_float(map: &HashMap<String, Value>, key: &str, default: f64) -> f64 {
    match map.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        _ => default,
    }
}

/// Durations accept integer nanoseconds, float nanoseconds, and human
/// strings ("5s", "250ms", "2m", "1h").
pub fn get_duration(map: &HashMap<String, Value>, key: &str, default: Duration) -> Duration {
    match map.get(key) {
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                if i >= 0 {
                    Duration::from_nanos(i as u64)
                } else {
                    default
                }
            } else if let Some(f) = n.as_f64() {
                if f >= 0.0 {
                    Duration::from_nanos(f as u64)
                } else {
                    default
                }
            } else {
                default
            }
        }
        Some(Value::String(s)) => parse_duration_str(s).unwrap_or(default),
        _ => default,
    }
}

/// Slices accept homogeneous string arrays; arrays holding any non-string
/// element fall back to the default.
pub fn get_string_slice(map: &HashMap<String, Value>, key: &str, default: &[&str]) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    _ => return default.iter().map(|s| s.to_string()).collect(),
                }
            }
            out
        }
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Parse a human duration string: integer or decimal value with one of the
/// suffixes ns, us, ms, s, m, h. A bare number is taken as seconds.
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    let nanos = match unit.trim() {
        "ns" => value,
        "us" | "µs" => value * 1e3,
        "ms" => value * 1e6,
        "" | "s" => value * 1e9,
        "m" => value * 60.0 * 1e9,
        "h" => value * 3600.0 * 1e9,
        _ => return None,
    };
    Some(Duration::from_nanos(nanos as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn string_reader_falls_back() {
        let m = map(&[("profile", json!("deep")), ("threads", json!(8))]);
        assert_eq!(get_string(&m, "profile", "normal"), "deep");
        assert_eq!(get_string(&m, "threads", "normal"), "normal");
        assert_eq!(get_string(&m, "missing", "normal"), "normal");
    }

    #[test]
    fn int_reader_accepts_integral_float() {
        let m = map(&[("a", json!(8)), ("b", json!(8.0)), ("c", json!(8.5))]);
        assert_eq!(get_int(&m, "a", 0), 8);
        assert_eq!(get_int(&m, "b", 0), 8);
        assert_eq!(get_int(&m, "c", 0), 0);
    }

    #[test]
    fn float_reader() {
        let m = map(&[("rate", json!(0.25)), ("count", json!(3))]);
        assert_eq!(get_float(&m, "rate", 1.0), 0.25);
        assert_eq!(get_float(&m, "count", 1.0), 3.0);
        assert_eq!(get_float(&m, "missing", 1.0), 1.0);
    }

    #[test]
    fn bool_reader_coerces_strings() {
        let m = map(&[("x", json!("true")), ("y", json!("False")), ("z", json!("yep"))]);
        assert!(get_bool(&m, "x", false));
        assert!(!get_bool(&m, "y", true));
        assert!(get_bool(&m, "z", true));
    }

    #[test]
    fn duration_reader_forms() {
        let m = map(&[
            ("nanos", json!(1_500_000_000i64)),
            ("float_nanos", json!(2_000_000_000.0)),
            ("human", json!("5s")),
            ("millis", json!("250ms")),
            ("bad", json!("soon")),
        ]);
        let d = Duration::from_secs(9);
        assert_eq!(get_duration(&m, "nanos", d), Duration::from_millis(1500));
        assert_eq!(get_duration(&m, "float_nanos", d), Duration::from_secs(2));
        assert_eq!(get_duration(&m, "human", d), Duration::from_secs(5));
        assert_eq!(get_duration(&m, "millis", d), Duration::from_millis(250));
        assert_eq!(get_duration(&m, "bad", d), d);
        assert_eq!(get_duration(&m, "missing", d), d);
    }

    #[test]
    fn slice_reader_rejects_mixed() {
        let m = map(&[
            ("ok", json!(["a", "b"])),
            ("mixed", json!(["a", 1])),
        ]);
        assert_eq!(get_string_slice(&m, "ok", &["d"]), vec!["a", "b"]);
        assert_eq!(get_string_slice(&m, "mixed", &["d"]), vec!["d"]);
        assert_eq!(get_string_slice(&m, "missing", &["d"]), vec!["d"]);
    }

    #[test]
    fn human_duration_units() {
        assert_eq!(parse_duration_str("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration_str("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration_str("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration_str("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration_str("nope"), None);
    }
}
