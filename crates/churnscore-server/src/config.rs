use std::time::Duration;

use crate::logging::LogFormat;

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: String,
    pub max_body_bytes: usize,
    pub max_batch_items: usize,
    pub read_timeout: Duration,
    pub max_connections: usize,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            max_body_bytes: 1 << 20,
            max_batch_items: 10_000,
            read_timeout: Duration::from_millis(10_000),
            max_connections: 256,
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source; unset or
    /// unparsable values fall back to defaults, numeric knobs are clamped.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let http_addr = lookup("CHURNSCORE_HTTP_ADDR")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.http_addr);
        let max_body_bytes = lookup_usize(
            &lookup,
            "CHURNSCORE_MAX_BODY_BYTES",
            defaults.max_body_bytes,
            1_024,
            64 << 20,
        );
        let max_batch_items = lookup_usize(
            &lookup,
            "CHURNSCORE_MAX_BATCH_ITEMS",
            defaults.max_batch_items,
            1,
            1_000_000,
        );
        let read_timeout_ms = lookup_u64(
            &lookup,
            "CHURNSCORE_READ_TIMEOUT_MS",
            u64::try_from(defaults.read_timeout.as_millis()).unwrap_or(u64::MAX),
            100,
            120_000,
        );
        let max_connections = lookup_usize(
            &lookup,
            "CHURNSCORE_MAX_CONNECTIONS",
            defaults.max_connections,
            1,
            65_536,
        );
        let log_format = lookup("CHURNSCORE_LOG_FORMAT")
            .map(|v| LogFormat::parse(&v))
            .unwrap_or(defaults.log_format);

        Self {
            http_addr,
            max_body_bytes,
            max_batch_items,
            read_timeout: Duration::from_millis(read_timeout_ms),
            max_connections,
            log_format,
        }
    }
}

fn lookup_usize<F>(lookup: &F, name: &str, default: usize, min: usize, max: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

fn lookup_u64<F>(lookup: &F, name: &str, default: u64, min: u64, max: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}
