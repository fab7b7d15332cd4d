use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    Gemini,
    Disabled,
}

impl std::str::FromStr for AnalyzerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "disabled" | "none" => Ok(Self::Disabled),
            other => anyhow::bail!("unsupported analyzer type: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    pub kind: AnalyzerKind,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_endpoint: String,
    pub timeout: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            kind: AnalyzerKind::Gemini,
            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash".into(),
            gemini_endpoint: "https://generativelanguage.googleapis.com".into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PendingConfig {
    pub ttl: Option<Duration>,
    pub max_entries: Option<usize>,
    pub sweep_every: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Unset means records are kept in memory only.
    pub database_url: Option<String>,
    pub static_dir: String,
    pub analyzer: AnalyzerConfig,
    pub pending: PendingConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

/// Values below one second are raised to one.
fn env_secs_at_least_one(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse::<u64>(key).unwrap_or(default).max(1))
}

/// Zero disables the bound.
fn env_secs_nonzero(key: &str, default: u64) -> Option<Duration> {
    let secs = env_parse::<u64>(key).unwrap_or(default);
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = AnalyzerConfig::default();
        let analyzer = AnalyzerConfig {
            kind: env_or("ANALYZER", "gemini").parse()?,
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            gemini_model: env_or("GEMINI_MODEL", &defaults.gemini_model),
            gemini_endpoint: env_or("GEMINI_ENDPOINT", &defaults.gemini_endpoint),
            timeout: env_secs_at_least_one("ANALYZE_TIMEOUT_SECS", 30),
        };

        let pending = PendingConfig {
            ttl: env_secs_nonzero("PENDING_TTL_SECS", 30 * 60),
            max_entries: env_parse::<usize>("PENDING_MAX_ENTRIES")
                .or(Some(1024))
                .filter(|n| *n > 0),
            sweep_every: env_secs_at_least_one("PENDING_SWEEP_SECS", 60),
        };

        Ok(Self {
            host: env_or("APP_HOST", "0.0.0.0"),
            port: env_parse("APP_PORT").unwrap_or(8080),
            database_url: std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            static_dir: env_or("STATIC_DIR", "./static"),
            analyzer,
            pending,
        })
    }
}
