//! swarmd configuration.
//!
//! Read from an optional TOML file; every value has a default and the
//! command line overrides what the file sets.
//!
//! ```toml
//! [discovery]
//! uri = "consul://10.0.0.5:8500/swarmgrid"
//! heartbeat = "20s"
//!
//! [scheduler]
//! strategy = "spread"
//! filters = ["health", "constraint", "affinity", "port"]
//! overcommit = 0.05
//!
//! [store]
//! path = "/var/lib/swarmgrid/state.redb"
//!
//! [retry]
//! interval = "5s"
//!
//! [engine]
//! timeout = "30s"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use swarmgrid_scheduler::{FILTER_NAMES, FilterChain, STRATEGY_NAMES, Strategy, strategy_by_name};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub discovery: DiscoveryConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub retry: RetryConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// `scheme://addr[,addr]/path`, or a bare address list.
    pub uri: Option<String>,
    pub heartbeat: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            uri: None,
            heartbeat: "20s".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub strategy: String,
    pub filters: Vec<String>,
    /// Fraction of each node's capacity that may be reserved beyond 100%.
    pub overcommit: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: "spread".to_string(),
            filters: FILTER_NAMES.iter().map(|f| f.to_string()).collect(),
            overcommit: 0.05,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Database file. Unset keeps records in memory only.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub interval: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: "5s".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Per-request timeout for container runtime calls.
    pub timeout: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: "30s".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: DaemonConfig =
            toml::from_str(&content).with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn discovery_uri(&self) -> anyhow::Result<&str> {
        match self.discovery.uri.as_deref() {
            Some(uri) if !uri.trim().is_empty() => Ok(uri),
            _ => bail!("no discovery URI configured (set [discovery] uri or pass --discovery)"),
        }
    }

    pub fn heartbeat(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.discovery.heartbeat).context("[discovery] heartbeat")
    }

    pub fn retry_interval(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.retry.interval).context("[retry] interval")
    }

    pub fn engine_timeout(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.engine.timeout).context("[engine] timeout")
    }

    pub fn filter_chain(&self) -> anyhow::Result<FilterChain> {
        FilterChain::from_names(&self.scheduler.filters)
            .with_context(|| format!("[scheduler] filters (known: {})", FILTER_NAMES.join(", ")))
    }

    pub fn strategy(&self) -> anyhow::Result<Box<dyn Strategy>> {
        strategy_by_name(&self.scheduler.strategy)
            .with_context(|| format!("[scheduler] strategy (known: {})", STRATEGY_NAMES.join(", ")))
    }

    /// Check every value up front so a bad setting fails at startup.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.discovery_uri()?;
        if self.heartbeat()?.is_zero() {
            bail!("[discovery] heartbeat must be greater than zero");
        }
        if self.retry_interval()?.is_zero() {
            bail!("[retry] interval must be greater than zero");
        }
        self.engine_timeout()?;
        self.filter_chain()?;
        self.strategy()?;
        let overcommit = self.scheduler.overcommit;
        if overcommit.is_nan() || overcommit < 0.0 {
            bail!("[scheduler] overcommit must be >= 0, got {overcommit}");
        }
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "1m". A bare number is
/// seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().and_then(|m| m.checked_mul(60)).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().and_then(|h| h.checked_mul(3600)).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.with_context(|| format!("invalid duration {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.heartbeat().unwrap(), Duration::from_secs(20));
        assert_eq!(config.retry_interval().unwrap(), Duration::from_secs(5));
        assert_eq!(config.engine_timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(config.scheduler.strategy, "spread");
        assert_eq!(config.filter_chain().unwrap().names(), FILTER_NAMES.to_vec());
        // No discovery URI yet.
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_full_file() {
        let toml_str = r#"
[discovery]
uri = "nodes://10.0.0.1:2375,10.0.0.2:2375"
heartbeat = "500ms"

[scheduler]
strategy = "binpack"
filters = ["health", "port"]
overcommit = 0.5

[store]
path = "/tmp/state.redb"

[retry]
interval = "1m"
"#;
        let config: DaemonConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.heartbeat().unwrap(), Duration::from_millis(500));
        assert_eq!(config.retry_interval().unwrap(), Duration::from_secs(60));
        assert_eq!(config.strategy().unwrap().name(), "binpack");
        assert_eq!(config.filter_chain().unwrap().names(), vec!["health", "port"]);
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/state.redb")));
        // Unset section keeps its default.
        assert_eq!(config.engine.timeout, "30s");
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = DaemonConfig::default();
        config.discovery.uri = Some("nodes://10.0.0.1:2375".to_string());
        config.validate().unwrap();

        let mut bad = config.clone();
        bad.scheduler.strategy = "fastest".to_string();
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.scheduler.filters.push("gpu".to_string());
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.discovery.heartbeat = "0s".to_string();
        assert!(bad.validate().is_err());

        let mut bad = config;
        bad.scheduler.overcommit = -0.1;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<DaemonConfig>("[discovery]\nurl = \"x\"\n").is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn overflowing_duration_is_rejected() {
        assert!(parse_duration(&format!("{}m", u64::MAX / 10)).is_err());
        assert!(parse_duration(&format!("{}h", u64::MAX / 1000)).is_err());
        assert_eq!(
            parse_duration(&format!("{}m", u64::MAX / 60)).unwrap(),
            Duration::from_secs(u64::MAX / 60 * 60)
        );
    }
}
