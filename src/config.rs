use std::time::Duration;

use anyhow::{bail, Context};

use crate::cache::DEFAULT_TTL_VARIANCE;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_CACHE_NAMESPACE: &str = "exam-analytics";
pub const DEFAULT_CACHE_TIMEOUT_MS: u64 = 250;
/// Upper bound for TTL settings: one year.
pub const MAX_CACHE_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub ttl_variance: Duration,
    pub namespace: String,
    pub timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            ttl_variance: DEFAULT_TTL_VARIANCE,
            namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            timeout: Duration::from_millis(DEFAULT_CACHE_TIMEOUT_MS),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .context("DATABASE_URL must be set to the Postgres score record store")?;
        let redis_url = lookup("REDIS_URL").filter(|url| !url.trim().is_empty());

        let defaults = CacheConfig::default();
        let cache = CacheConfig {
            ttl: read_secs(&lookup, "CACHE_TTL_SECS")?.unwrap_or(defaults.ttl),
            ttl_variance: read_secs(&lookup, "CACHE_TTL_VARIANCE_SECS")?
                .unwrap_or(defaults.ttl_variance),
            namespace: lookup("CACHE_NAMESPACE")
                .filter(|namespace| !namespace.trim().is_empty())
                .unwrap_or(defaults.namespace),
            timeout: match lookup("CACHE_TIMEOUT_MS") {
                Some(raw) => Duration::from_millis(
                    raw.trim()
                        .parse::<u64>()
                        .with_context(|| format!("CACHE_TIMEOUT_MS must be an integer, got {raw:?}"))?,
                ),
                None => defaults.timeout,
            },
        };

        Ok(Self {
            database_url,
            redis_url,
            cache,
        })
    }
}

fn read_secs<F>(lookup: &F, name: &str) -> anyhow::Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let secs = raw
        .trim()
        .parse::<u64>()
        .with_context(|| format!("{name} must be a whole number of seconds, got {raw:?}"))?;
    if secs > MAX_CACHE_SECS {
        bail!("{name} must be at most {MAX_CACHE_SECS} seconds, got {secs}");
    }
    Ok(Some(Duration::from_secs(secs)))
}
