use crate::probe::platform::StrategyChoice;
use crate::probe::{DEFAULT_HOP_BUDGET, DEFAULT_TIMEOUT_MS};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "tracetag.toml";

/// Joins devices with their IP addresses, one row per pair.
pub const DEFAULT_DOQL: &str = "select distinct view_ipaddress_v1.ipaddress_pk, \
view_ipaddress_v1.ip_address, view_ipaddress_v1.tags as ipaddress_tags, \
view_device_v1.device_pk, view_device_v1.name, view_device_v1.tags as device_tags \
from view_device_v1 full outer join view_ipaddress_v1 \
on view_device_v1.device_pk = view_ipaddress_v1.device_fk";

/// Contents of the TOML config file. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inventory: InventoryConfig,
    pub probe: ProbeConfig,
    pub ip_tags: IpTags,
    pub device_tags: DeviceTags,
    pub custom_field: CustomFieldConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub doql: Option<String>,
}

impl InventoryConfig {
    pub fn query(&self) -> &str {
        self.doql.as_deref().unwrap_or(DEFAULT_DOQL)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub hops: u8,
    pub timeout_ms: u64,
    pub strategy: StrategyChoice,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            hops: DEFAULT_HOP_BUDGET,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            strategy: StrategyChoice::Auto,
        }
    }
}

/// Tags written to IP address records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpTags {
    pub success: Option<String>,
    pub failure: Option<String>,
    pub no_device: Option<String>,
}

/// Tags written to device records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceTags {
    pub success: Option<String>,
    pub failure: Option<String>,
    pub no_ipaddress: Option<String>,
}

/// Custom field on IP records that receives the last responding hop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomFieldConfig {
    pub key: Option<String>,
    pub notes: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        log::debug!("[config] load: path={}", path.display());

        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .wrap_err_with(|| format!("Invalid config file {}", path.display()))?;

        log::debug!("[config] loaded: hops={} timeout={}ms strategy={:?} inventory_url={}",
            config.probe.hops, config.probe.timeout_ms, config.probe.strategy, config.inventory.url);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).wrap_err("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.probe.hops == 0 {
            eyre::bail!("probe.hops must be at least 1");
        }
        if self.probe.timeout_ms == 0 {
            eyre::bail!("probe.timeout_ms must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL_CONFIG: &str = r#"
[inventory]
url = "https://inventory.example.com"
user = "admin"
password = "secret"

[probe]
hops = 5
timeout_ms = 250
strategy = "shelled"

[ip_tags]
success = "reachable"
failure = "unreachable"
no_device = "orphan-ip"

[device_tags]
success = "online"
failure = "offline"
no_ipaddress = "no-ip"

[custom_field]
key = "last_hop"
notes = "written by tracetag"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL_CONFIG).unwrap();

        assert_eq!(config.inventory.url, "https://inventory.example.com");
        assert_eq!(config.inventory.user, "admin");
        assert_eq!(config.inventory.query(), DEFAULT_DOQL);
        assert_eq!(config.probe.hops, 5);
        assert_eq!(config.probe.timeout_ms, 250);
        assert_eq!(config.probe.strategy, StrategyChoice::Shelled);
        assert_eq!(config.ip_tags.no_device.as_deref(), Some("orphan-ip"));
        assert_eq!(config.device_tags.no_ipaddress.as_deref(), Some("no-ip"));
        assert_eq!(config.custom_field.key.as_deref(), Some("last_hop"));
    }

    #[test]
    fn test_probe_defaults_when_absent() {
        let config = Config::parse("[inventory]\nurl = \"https://d42\"\n").unwrap();

        assert_eq!(config.probe.hops, 2);
        assert_eq!(config.probe.timeout_ms, 1000);
        assert_eq!(config.probe.strategy, StrategyChoice::Auto);
        assert!(config.ip_tags.success.is_none());
        assert!(config.custom_field.key.is_none());
    }

    #[test]
    fn test_partial_probe_section_keeps_other_defaults() {
        let config = Config::parse("[probe]\ntimeout_ms = 300\n").unwrap();
        assert_eq!(config.probe.hops, 2);
        assert_eq!(config.probe.timeout_ms, 300);
    }

    #[test]
    fn test_custom_doql() {
        let config = Config::parse("[inventory]\ndoql = \"select 1\"\n").unwrap();
        assert_eq!(config.inventory.query(), "select 1");
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(Config::parse("[probe]\nhops = 0\n").is_err());
        assert!(Config::parse("[probe]\ntimeout_ms = 0\n").is_err());
        assert!(Config::parse("[probe]\nhops = 300\n").is_err());
        assert!(Config::parse("[probe]\nstrategy = \"carrier-pigeon\"\n").is_err());
        assert!(Config::parse("not toml at all [").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL_CONFIG.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.probe.hops, 5);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
