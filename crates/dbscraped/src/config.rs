//! dbscraped.toml configuration.
//!
//! Every key is optional. Precedence, lowest first: built-in defaults,
//! the TOML file, `DBSCRAPE_USER` / `DBSCRAPE_PASSWORD`, CLI flags.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use dbscrape_api::Credentials;
use dbscrape_collector::{EmptyResultPolicy, RowPolicy, ScrapeConfig};
use dbscrape_trace::Sampler;

pub const ENV_USER: &str = "DBSCRAPE_USER";
pub const ENV_PASSWORD: &str = "DBSCRAPE_PASSWORD";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scrape: ScrapeSection,
    pub trace: TraceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: String,
    /// Prefix of every exposed metric name.
    pub namespace: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9999".to_string(),
            namespace: "hana".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// DSN scheme: `postgres`, `mysql` or `sqlite`.
    pub scheme: String,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    /// Replacement for the family statement; same column contract.
    pub statement: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            scheme: "postgres".to_string(),
            user: String::new(),
            password: String::new(),
            database: None,
            statement: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScrapeSection {
    pub open_timeout: String,
    pub query_timeout: String,
    pub close_timeout: String,
    pub row_policy: RowPolicy,
    pub empty_result: EmptyResultPolicy,
}

impl Default for ScrapeSection {
    fn default() -> Self {
        Self {
            open_timeout: "5s".to_string(),
            query_timeout: "10s".to_string(),
            close_timeout: "5s".to_string(),
            row_policy: RowPolicy::Latest,
            empty_result: EmptyResultPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    Always,
    Never,
    Ratio,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraceConfig {
    pub sampler: SamplerKind,
    /// Only read when `sampler = "ratio"`.
    pub ratio: f64,
    pub recent_spans: usize,
    pub log_spans: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerKind::Always,
            ratio: 1.0,
            recent_spans: 256,
            log_spans: true,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: DaemonConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path` (or defaults) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Credentials from the environment win over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(user) = lookup(ENV_USER) {
            self.database.user = user;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.database.password = password;
        }
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .listen
            .parse()
            .with_context(|| format!("invalid listen address {:?}", self.server.listen))
    }

    pub fn scrape_config(&self) -> anyhow::Result<ScrapeConfig> {
        Ok(ScrapeConfig {
            open_timeout: parse_duration(&self.scrape.open_timeout)
                .context("scrape.open_timeout")?,
            query_timeout: parse_duration(&self.scrape.query_timeout)
                .context("scrape.query_timeout")?,
            close_timeout: parse_duration(&self.scrape.close_timeout)
                .context("scrape.close_timeout")?,
            row_policy: self.scrape.row_policy,
            empty_result: self.scrape.empty_result,
        })
    }

    pub fn sampler(&self) -> anyhow::Result<Sampler> {
        match self.trace.sampler {
            SamplerKind::Always => Ok(Sampler::AlwaysOn),
            SamplerKind::Never => Ok(Sampler::AlwaysOff),
            SamplerKind::Ratio => {
                let ratio = self.trace.ratio;
                if !(0.0..=1.0).contains(&ratio) {
                    bail!("trace.ratio must be within 0.0..=1.0, got {ratio}");
                }
                Ok(Sampler::TraceIdRatioBased(ratio))
            }
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            user: self.database.user.clone(),
            password: self.database.password.clone(),
            database: self.database.database.clone(),
        }
    }
}

/// Parse `"500ms"`, `"5s"`, `"1m"` or bare seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let parse = |n: &str| -> anyhow::Result<u64> {
        n.trim()
            .parse::<u64>()
            .with_context(|| format!("invalid duration {s:?}"))
    };
    let duration = if let Some(ms) = s.strip_suffix("ms") {
        Duration::from_millis(parse(ms)?)
    } else if let Some(secs) = s.strip_suffix('s') {
        Duration::from_secs(parse(secs)?)
    } else if let Some(mins) = s.strip_suffix('m') {
        let Some(secs) = parse(mins)?.checked_mul(60) else {
            bail!("duration {s:?} is too large");
        };
        Duration::from_secs(secs)
    } else {
        Duration::from_secs(parse(s)?)
    };
    if duration.is_zero() {
        bail!("duration {s:?} must be greater than zero");
    }
    Ok(duration)
}
