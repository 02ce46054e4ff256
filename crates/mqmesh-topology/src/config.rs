//! Cluster configuration
//!
//! Loaded from TOML or YAML. Every field has a default, so an empty file
//! describes the stock three-region deployment.

use crate::address::MAX_REGIONS;
use crate::region::Region;
use mqmesh_common::{ConfigError, Ordinal};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Cluster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Fixed deployment name; every resource name derives from it
    pub deployment_name: String,
    /// Broker node name prefix (`<node>@<host>`)
    pub node_name: String,
    /// Private forward DNS zone
    pub zone_name: String,
    /// Private reverse DNS zone
    pub reverse_zone_name: String,
    /// Location of the shared resource group holding the DNS zones
    pub common_location: String,
    /// Ordered deployment targets; ordinal = position + 1
    pub regions: Vec<String>,
    /// TTL for every DNS record
    pub dns_ttl: u32,
    /// Broker container settings
    pub container: ContainerSettings,
    /// Cluster cookie generation
    pub cookie: CookieSettings,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            deployment_name: "rabbitmq".into(),
            node_name: "rabbit".into(),
            zone_name: "example.com".into(),
            reverse_zone_name: "10.in-addr.arpa".into(),
            common_location: "eastus2".into(),
            regions: vec!["centralus".into(), "eastus".into(), "westus".into()],
            dns_ttl: 300,
            container: ContainerSettings::default(),
            cookie: CookieSettings::default(),
        }
    }
}

impl ClusterConfig {
    /// Load from file; `.yaml`/`.yml` parse as YAML, anything else as TOML
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&content),
            _ => Self::from_toml(&content),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Builder-style region list
    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    /// Reject anything that would make synthesis ill-defined
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("deployment_name", &self.deployment_name),
            ("node_name", &self.node_name),
            ("zone_name", &self.zone_name),
            ("reverse_zone_name", &self.reverse_zone_name),
            ("common_location", &self.common_location),
        ];
        if let Some(&(name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ConfigError::MissingSetting(name));
        }

        if self.regions.is_empty() {
            return Err(ConfigError::NoRegions);
        }
        if self.regions.len() > MAX_REGIONS {
            return Err(ConfigError::TooManyRegions {
                requested: self.regions.len(),
                max: MAX_REGIONS,
            });
        }

        let mut seen = HashSet::new();
        for (index, location) in self.regions.iter().enumerate() {
            if location.trim().is_empty() {
                return Err(ConfigError::EmptyRegion(index + 1));
            }
            if !seen.insert(location.as_str()) {
                return Err(ConfigError::DuplicateRegion(location.clone()));
            }
        }

        // rg-<deployment>-<region> must not shadow rg-<deployment>-common-<location>
        let shared_group = format!("common-{}", self.common_location);
        if let Some(location) = self.regions.iter().find(|l| **l == shared_group) {
            return Err(ConfigError::NameCollision(format!(
                "region {location} names the shared resource group"
            )));
        }
        if self.zone_name == self.reverse_zone_name {
            return Err(ConfigError::NameCollision(format!(
                "zone {} is both the forward and the reverse zone",
                self.zone_name
            )));
        }

        if self.cookie.length == 0 {
            return Err(ConfigError::MissingSetting("cookie.length"));
        }
        Ok(())
    }

    /// Regions with their ordinals
    pub fn regions(&self) -> Vec<Region> {
        self.regions
            .iter()
            .enumerate()
            .map(|(i, location)| Region::new(Ordinal::from_index(i), location))
            .collect()
    }
}

/// Broker container settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    pub image: String,
    pub cpu: f64,
    pub memory_gb: f64,
    /// Seconds the broker waits before starting, so DNS and firewall rules settle
    pub startup_delay_secs: u32,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            image: "rabbitmq".into(),
            cpu: 1.0,
            memory_gb: 1.5,
            startup_delay_secs: 60,
        }
    }
}

/// Cluster cookie shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub length: u32,
    pub upper: bool,
    pub lower: bool,
    pub number: bool,
    pub special: bool,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            length: 20,
            upper: true,
            lower: false,
            number: false,
            special: false,
        }
    }
}
