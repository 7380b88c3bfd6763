//! nodescale.toml configuration parser.

use nodescale_state::MetricSemantics;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default name of the IAM role (and instance profile) nodes boot with.
pub const DEFAULT_NODE_ROLE_NAME: &str = "NodescaleNodeRole";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub cluster: ClusterConfig,
    pub metrics: MetricsConfig,
    pub controller: Option<ControllerConfig>,
    pub api: Option<ApiConfig>,
    pub state: Option<StateConfig>,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub autoscalers: Vec<AutoscalerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    /// Machine image baked into the launch template.
    pub image_id: String,
    pub node_role_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub prometheus_url: String,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub workers: Option<usize>,
    pub resync_interval: Option<String>,
    pub call_timeout: Option<String>,
    pub base_backoff: Option<String>,
    pub max_backoff: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub data_dir: Option<String>,
}

/// Which cloud backs the node groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// In-process control plane, for local runs and demos.
    Simulated(SimulatedProviderConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedProviderConfig {
    pub endpoint: String,
    pub certificate_authority: String,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    pub cluster_security_group_id: Option<String>,
    #[serde(default)]
    pub subnets: Vec<SubnetConfig>,
    #[serde(default)]
    pub node_groups: Vec<NodeGroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetConfig {
    pub id: String,
    pub zone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGroupConfig {
    pub id: String,
    pub replicas: u32,
}

/// A scaling spec seeded into the store at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    pub name: String,
    pub node_group: String,
    pub query: String,
    pub semantics: MetricSemantics,
    pub target: f64,
    pub min_replicas: Option<u32>,
    pub max_replicas: Option<u32>,
}

/// Controller knobs with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub workers: usize,
    pub resync_interval: Duration,
    pub call_timeout: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn node_role_name(&self) -> &str {
        self.cluster
            .node_role_name
            .as_deref()
            .unwrap_or(DEFAULT_NODE_ROLE_NAME)
    }

    pub fn metrics_timeout(&self) -> anyhow::Result<Duration> {
        duration_or(self.metrics.timeout.as_deref(), Duration::from_secs(5))
    }

    pub fn api_port(&self) -> u16 {
        self.api.as_ref().and_then(|a| a.port).unwrap_or(8443)
    }

    pub fn data_dir(&self) -> &str {
        self.state
            .as_ref()
            .and_then(|s| s.data_dir.as_deref())
            .unwrap_or("/var/lib/nodescale")
    }

    /// Resolve the `[controller]` table, filling in defaults.
    pub fn controller_settings(&self) -> anyhow::Result<ControllerSettings> {
        let defaults = ControllerSettings::default();
        let Some(c) = &self.controller else {
            return Ok(defaults);
        };
        Ok(ControllerSettings {
            workers: c.workers.unwrap_or(defaults.workers),
            resync_interval: duration_or(c.resync_interval.as_deref(), defaults.resync_interval)?,
            call_timeout: duration_or(c.call_timeout.as_deref(), defaults.call_timeout)?,
            base_backoff: duration_or(c.base_backoff.as_deref(), defaults.base_backoff)?,
            max_backoff: duration_or(c.max_backoff.as_deref(), defaults.max_backoff)?,
        })
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.cluster.name.trim().is_empty() {
            anyhow::bail!("cluster.name must not be empty");
        }
        if self.metrics.prometheus_url.trim().is_empty() {
            anyhow::bail!("metrics.prometheus_url must not be empty");
        }
        self.metrics_timeout()?;
        let settings = self.controller_settings()?;
        if settings.workers == 0 {
            anyhow::bail!("controller.workers must be at least 1");
        }
        if settings.resync_interval.is_zero() {
            anyhow::bail!("controller.resync_interval must be non-zero");
        }
        if settings.call_timeout.is_zero() {
            anyhow::bail!("controller.call_timeout must be non-zero");
        }
        if settings.base_backoff > settings.max_backoff {
            anyhow::bail!("controller.base_backoff exceeds controller.max_backoff");
        }
        let mut names = HashSet::new();
        for a in &self.autoscalers {
            if !names.insert(a.name.as_str()) {
                anyhow::bail!("duplicate autoscaler name {:?}", a.name);
            }
        }
        Ok(())
    }
}

fn duration_or(value: Option<&str>, default: Duration) -> anyhow::Result<Duration> {
    match value {
        None => Ok(default),
        Some(s) => parse_duration(s).ok_or_else(|| anyhow::anyhow!("invalid duration {s:?}")),
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
