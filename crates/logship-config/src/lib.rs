//! Environment-driven configuration for the ingestion daemon.
//!
//! Every tunable is read once, at startup, through [`Settings::from_env`].
//! A malformed value is logged and the compiled default is used instead —
//! the service never panics on a bad env var (mirrors the original's
//! `tcp/server.go` `init()`: `strconv.Atoi`/`time.ParseDuration`, fall back
//! silently on parse error).

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub clickhouse_addr: String,
    pub clickhouse_user: String,
    pub clickhouse_pass: String,
    pub clickhouse_db: String,

    /// Path to the embedded schema-cache KV file (spec §6 "persisted state").
    /// Default matches the original's BoltDB filename, `logsvc_config.db`.
    pub kv_path: String,

    pub http_port: u16,
    pub grpc_base_port: u16,
    pub tcp_base_port: u16,
    pub udp_base_port: u16,
    pub ack_port: u16,

    pub batch_size: usize,
    #[serde(with = "duration_millis")]
    pub batch_timeout: Duration,
    pub buffer_capacity: usize,
    #[serde(with = "duration_millis")]
    pub read_timeout: Duration,

    pub log_base_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            clickhouse_addr: "localhost:29000".to_string(),
            clickhouse_user: "default".to_string(),
            clickhouse_pass: String::new(),
            clickhouse_db: "default".to_string(),
            kv_path: "logsvc_config.db".to_string(),
            http_port: 9302,
            grpc_base_port: 50051,
            tcp_base_port: 50053,
            udp_base_port: 50052,
            ack_port: 50054,
            batch_size: 20,
            batch_timeout: Duration::from_millis(1),
            buffer_capacity: 500,
            read_timeout: Duration::from_secs(1),
            log_base_path: None,
        }
    }
}

impl Settings {
    /// Read all tunables from the process environment, falling back to
    /// [`Settings::default`] field-by-field on absence or parse failure.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            clickhouse_addr: env_string("CLICKHOUSE_ADDR", &default.clickhouse_addr),
            clickhouse_user: env_string("CLICKHOUSE_USER", &default.clickhouse_user),
            clickhouse_pass: std::env::var("CLICKHOUSE_PASS").unwrap_or_default(),
            clickhouse_db: env_string("CLICKHOUSE_DB", &default.clickhouse_db),
            kv_path: env_string("KV_PATH", &default.kv_path),

            http_port: env_parsed("HTTP_PORT", default.http_port),
            grpc_base_port: env_parsed("GRPC_BASE_PORT", default.grpc_base_port),
            tcp_base_port: env_parsed("TCP_BASE_PORT", default.tcp_base_port),
            udp_base_port: env_parsed("UDP_BASE_PORT", default.udp_base_port),
            ack_port: env_parsed("ACK_PORT", default.ack_port),

            batch_size: env_parsed_positive("BATCH_SIZE", default.batch_size),
            batch_timeout: env_duration("BATCH_TIMEOUT", default.batch_timeout),
            buffer_capacity: env_parsed_positive("BUFFER_CAPACITY", default.buffer_capacity),
            read_timeout: env_duration("READ_TIMEOUT", default.read_timeout),

            log_base_path: std::env::var("LOG_BASE_PATH").ok(),
        }
    }

    /// Canonical-JSON SHA-256 of this configuration, for correlating a run's
    /// logs with the settings that produced it (teacher's `mqk-config`
    /// `load_layered_yaml` does the same canonicalize-then-hash for its
    /// layered YAML; here it's applied to the resolved `Settings` itself
    /// since there is no layered file config in this service).
    pub fn content_hash(&self) -> String {
        let value = serde_json::to_value(self).expect("Settings always serializes");
        let canonical = canonicalize_json(&value);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %v, "failed to parse env var, using default");
            default
        }),
        _ => default,
    }
}

fn env_parsed_positive(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => match v.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::warn!(var = name, value = %v, "invalid positive integer, using default");
                default
            }
        },
        _ => default,
    }
}

fn env_duration(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => parse_go_duration(&v).unwrap_or_else(|| {
            tracing::warn!(var = name, value = %v, "invalid duration, using default");
            default
        }),
        _ => default,
    }
}

/// Minimal parser for Go-style duration strings (`"1ms"`, `"500us"`, `"1s"`)
/// plus a bare integer treated as milliseconds, since that's what operators
/// migrating env files from the original service will have set.
fn parse_go_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Some(Duration::from_millis(ms));
    }
    let (num_part, unit) = s.split_at(s.find(|c: char| c.is_alphabetic())?);
    let n: f64 = num_part.parse().ok()?;
    let nanos = match unit {
        "ns" => n,
        "us" | "µs" => n * 1_000.0,
        "ms" => n * 1_000_000.0,
        "s" => n * 1_000_000_000.0,
        "m" => n * 60_000_000_000.0,
        "h" => n * 3_600_000_000_000.0,
        _ => return None,
    };
    Some(Duration::from_nanos(nanos as u64))
}

/// Recursively sort object keys so the JSON serialization is stable
/// regardless of struct field declaration order.
fn canonicalize_json(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted = serde_json::Map::new();
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for k in keys {
                    sorted.insert(k.clone(), sort(&map[k]));
                }
                serde_json::Value::Object(sorted)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.batch_size, 20);
        assert_eq!(s.buffer_capacity, 500);
        assert_eq!(s.batch_timeout, Duration::from_millis(1));
        assert_eq!(s.read_timeout, Duration::from_secs(1));
        assert_eq!(s.http_port, 9302);
        assert_eq!(s.ack_port, 50054);
    }

    #[test]
    fn parse_go_duration_handles_ms_and_bare_integers() {
        assert_eq!(parse_go_duration("1ms"), Some(Duration::from_millis(1)));
        assert_eq!(parse_go_duration("500"), Some(Duration::from_millis(500)));
        assert_eq!(parse_go_duration("1s"), Some(Duration::from_secs(1)));
        assert_eq!(parse_go_duration("bogus"), None);
    }

    #[test]
    fn content_hash_is_stable_for_equal_settings() {
        let a = Settings::default();
        let b = Settings::default();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_changes_with_settings() {
        let a = Settings::default();
        let mut b = Settings::default();
        b.batch_size = 100;
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
