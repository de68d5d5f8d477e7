//! Configuration loading and validation.
//!
//! The configuration file is YAML with camelCase keys. Missing fields fall
//! back to defaults before validation runs; validation failures are fatal at
//! startup.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use serde::Deserialize;

use crate::subnets::{InvalidSubnet, Subnet};

/// A single subnet declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetConfig {
    /// IPv4 network in CIDR notation, e.g. `203.0.113.0/27`.
    pub cidr: String,
    /// Host addresses inside the subnet that must never be selected.
    #[serde(default)]
    pub exclude_hosts: Vec<String>,
    /// Interface this subnet mounts on; falls back to `defaultInterface`.
    #[serde(default)]
    pub mount_interface: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub subnets: Vec<SubnetConfig>,
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,
    #[serde(default = "default_ips_per_subnet")]
    pub ips_per_subnet: usize,
    /// Pause between probing runs; `0s` means back-to-back runs.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// Per-probe timeout covering connect, headers and body.
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub http_timeout: Duration,
    /// Run a mount convergence pass before probing starts.
    #[serde(default)]
    pub auto_mount_subnets: bool,
    #[serde(default)]
    pub default_interface: String,
}

fn default_targets() -> Vec<String> {
    vec![
        "https://google.com".to_string(),
        "https://ipinfo.io".to_string(),
        "https://icanhazip.com".to_string(),
    ]
}

fn default_ips_per_subnet() -> usize {
    5
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(15)
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no subnets configured")]
    NoSubnets,
    #[error("ipsPerSubnet must be positive")]
    InvalidIpsPerSubnet,
    #[error("no targets configured")]
    NoTargets,
    #[error(transparent)]
    InvalidSubnet(#[from] InvalidSubnet),
}

impl Config {
    fn apply_defaults(&mut self) {
        if self.targets.is_empty() {
            self.targets = default_targets();
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.subnets.is_empty() {
            return Err(ValidationError::NoSubnets);
        }
        if self.ips_per_subnet == 0 {
            return Err(ValidationError::InvalidIpsPerSubnet);
        }
        if self.targets.is_empty() {
            return Err(ValidationError::NoTargets);
        }
        // Subnet rules (IPv4, prefix <= 30, exclude hosts inside the subnet)
        // live with the subnet model; building the model checks them all.
        Subnet::from_configs(&self.subnets)?;
        Ok(())
    }
}

/// Load, default and validate a configuration from a YAML file.
pub fn load(path: &Path) -> Result<Config> {
    info!("Loading configuration from {}", path.display());
    let file =
        File::open(path).wrap_err_with(|| format!("failed to open config '{}'", path.display()))?;
    let mut config: Config =
        serde_yaml::from_reader(file).wrap_err("failed to parse configuration")?;
    config.apply_defaults();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).expect("config should parse")
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
subnets:
  - cidr: 192.168.10.0/24
    excludeHosts:
      - 192.168.10.1
    mountInterface: eth1
targets:
  - https://example.org
ipsPerSubnet: 3
interval: 30s
httpTimeout: 5s
autoMountSubnets: true
defaultInterface: eth0
"#;
        let config = parse(yaml);
        assert!(config.validate().is_ok());
        assert_eq!(config.subnets.len(), 1);
        assert_eq!(config.subnets[0].exclude_hosts, vec!["192.168.10.1"]);
        assert_eq!(config.subnets[0].mount_interface.as_deref(), Some("eth1"));
        assert_eq!(config.targets, vec!["https://example.org"]);
        assert_eq!(config.ips_per_subnet, 3);
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert!(config.auto_mount_subnets);
        assert_eq!(config.default_interface, "eth0");
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse("subnets:\n  - cidr: 10.0.0.0/24\n");
        assert!(config.validate().is_ok());
        assert_eq!(config.ips_per_subnet, 5);
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.http_timeout, Duration::from_secs(15));
        assert_eq!(config.targets.len(), 3);
        assert!(!config.auto_mount_subnets);
    }

    #[test]
    fn test_rejects_empty_subnets() {
        let config = parse("targets:\n  - https://example.org\n");
        let result = config.validate();
        assert!(matches!(result, Err(ValidationError::NoSubnets)));
    }

    #[test]
    fn test_rejects_zero_ips_per_subnet() {
        let config = parse("subnets:\n  - cidr: 10.0.0.0/24\nipsPerSubnet: 0\n");
        let result = config.validate();
        assert!(matches!(result, Err(ValidationError::InvalidIpsPerSubnet)));
    }

    #[test]
    fn test_rejects_subnet_without_usable_hosts() {
        let config = parse("subnets:\n  - cidr: 10.0.0.0/31\n");
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("too small for host allocation"));
    }

    #[test]
    fn test_rejects_exclude_host_outside_subnet() {
        let yaml = r#"
subnets:
  - cidr: 10.0.0.0/24
    excludeHosts:
      - 10.0.1.1
"#;
        let result = parse(yaml).validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("outside subnet"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "subnets:\n  - cidr: 172.16.0.0/28").expect("write config");
        let config = load(file.path()).expect("config should load");
        assert_eq!(config.subnets[0].cidr, "172.16.0.0/28");
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load(Path::new("/nonexistent/sentinel.yaml")).is_err());
    }
}
