//! Resource naming
//!
//! Names are pure functions of the deployment settings and the 1-based region
//! ordinal. Re-synthesis with the same settings must reproduce them exactly.

use crate::config::ClusterConfig;
use mqmesh_common::{Ordinal, ResourceId};

/// Name of the cluster-wide discovery record
pub const DISCOVERY_RECORD_NAME: &str = "discovery";

/// Logical name of the cluster cookie
pub const COOKIE_ID: &str = "rabbit-cookie";

/// Provider name the firewall subnet must carry
pub const FIREWALL_SUBNET_NAME: &str = "AzureFirewallSubnet";

/// Which network of a region's pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkSide {
    /// Workload-hosting network
    Internal,
    /// Firewall-hosting network
    External,
}

impl NetworkSide {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Internal => "in",
            Self::External => "ex",
        }
    }
}

/// Deterministic names for one deployment
#[derive(Debug, Clone)]
pub struct Naming {
    deployment: String,
    node: String,
    zone: String,
}

impl Naming {
    pub fn new(deployment: &str, node: &str, zone: &str) -> Self {
        Self {
            deployment: deployment.to_string(),
            node: node.to_string(),
            zone: zone.to_string(),
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(&config.deployment_name, &config.node_name, &config.zone_name)
    }

    fn id(name: String) -> ResourceId {
        ResourceId::new(name)
    }

    pub fn common_resource_group(&self, location: &str) -> ResourceId {
        Self::id(format!("rg-{}-common-{}", self.deployment, location))
    }

    pub fn resource_group(&self, location: &str) -> ResourceId {
        Self::id(format!("rg-{}-{}", self.deployment, location))
    }

    pub fn cookie(&self) -> ResourceId {
        ResourceId::new(COOKIE_ID)
    }

    pub fn vnet(&self, side: NetworkSide, n: Ordinal) -> ResourceId {
        Self::id(format!("vnet-{}-{}-{}", self.deployment, side.tag(), n))
    }

    pub fn subnet(&self, side: NetworkSide, n: Ordinal) -> ResourceId {
        Self::id(format!("snet-{}-{}-{}", self.deployment, side.tag(), n))
    }

    pub fn subnet_delegation(&self, n: Ordinal) -> String {
        format!("snet-delegation-{}-{}", self.deployment, n)
    }

    pub fn network_profile(&self, n: Ordinal) -> ResourceId {
        Self::id(format!("np-{}-{}", self.deployment, n))
    }

    pub fn network_interface(&self, n: Ordinal) -> String {
        format!("nic-{}-{}", self.deployment, n)
    }

    pub fn ip_configuration(&self, n: Ordinal) -> String {
        format!("ipconfig-{}-{}", self.deployment, n)
    }

    pub fn public_ip(&self, n: Ordinal) -> ResourceId {
        Self::id(format!("ip-fw-{}{}", self.deployment, n))
    }

    pub fn firewall(&self, n: Ordinal) -> ResourceId {
        Self::id(format!("fw-{}{}", self.deployment, n))
    }

    pub fn firewall_ip_configuration(&self, n: Ordinal) -> String {
        format!("fw-config-{}{}", self.deployment, n)
    }

    pub fn storage_account(&self, n: Ordinal) -> ResourceId {
        Self::id(format!("strg{}{}", self.deployment, n))
    }

    pub fn file_share(&self, share: &str, n: Ordinal) -> ResourceId {
        Self::id(format!("{share}{n}"))
    }

    pub fn volume(&self, share: &str, n: Ordinal) -> String {
        format!("vol-{}-{}-{}", self.deployment, share, n)
    }

    pub fn container_group(&self, n: Ordinal) -> ResourceId {
        Self::id(format!("aci-{}-{}", self.deployment, n))
    }

    pub fn zone_link(&self, reverse: bool, n: Ordinal) -> ResourceId {
        let prefix = if reverse { "rdns" } else { "dns" };
        Self::id(format!("{prefix}-link-{n}"))
    }

    /// Intra-region peering, named after the network it originates from
    pub fn region_peering(&self, from: NetworkSide, n: Ordinal) -> ResourceId {
        Self::id(format!("peer-vnet{}-{}", n, from.tag()))
    }

    pub fn global_peering(&self, from: Ordinal, to: Ordinal) -> ResourceId {
        Self::id(format!("peer-vnet{from}-vnet{to}"))
    }

    pub fn route_table(&self, side: NetworkSide, n: Ordinal) -> ResourceId {
        Self::id(format!("route-{}-{}", n, side.tag()))
    }

    pub fn route_association(&self, side: NetworkSide, n: Ordinal) -> ResourceId {
        Self::id(format!("route-assoc-{}-{}", n, side.tag()))
    }

    pub fn inbound_route(&self, n: Ordinal, to: Ordinal) -> String {
        format!("route-{n}-to-{to}")
    }

    pub fn outbound_route(&self, n: Ordinal, to: Ordinal) -> String {
        format!("route-{n}-to-fw{to}")
    }

    pub fn internet_route(&self, n: Ordinal) -> String {
        format!("route-{n}-to-internet")
    }

    pub fn rule_collection(&self, n: Ordinal) -> ResourceId {
        Self::id(format!("fw-rules-{n}-in"))
    }

    pub fn rule_from(&self, n: Ordinal) -> String {
        format!("rule-from-{n}-in")
    }

    pub fn rule_to(&self, n: Ordinal) -> String {
        format!("rule-to-{n}-in")
    }

    /// Host label of a node, e.g. `rabbitmq2`
    pub fn host(&self, n: Ordinal) -> String {
        format!("{}{}", self.deployment, n)
    }

    /// Fully-qualified node host name
    pub fn fqdn(&self, n: Ordinal) -> String {
        format!("{}.{}", self.host(n), self.zone)
    }

    /// Broker node name, e.g. `rabbit@rabbitmq2.example.com`
    pub fn node_name(&self, n: Ordinal) -> String {
        format!("{}@{}", self.node, self.fqdn(n))
    }

    pub fn a_record(&self, n: Ordinal) -> ResourceId {
        Self::id(format!("a-{}", self.host(n)))
    }

    pub fn ptr_record(&self, n: Ordinal) -> ResourceId {
        Self::id(format!("ptr-{}", self.host(n)))
    }

    pub fn discovery_record(&self) -> ResourceId {
        Self::id(format!("a-{DISCOVERY_RECORD_NAME}"))
    }

    pub fn discovery_fqdn(&self) -> String {
        format!("{}.{}", DISCOVERY_RECORD_NAME, self.zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> Naming {
        Naming::new("rabbitmq", "rabbit", "example.com")
    }

    #[test]
    fn test_network_names() {
        let n = naming();
        let two = Ordinal::from_index(1);
        assert_eq!(n.vnet(NetworkSide::Internal, two).as_str(), "vnet-rabbitmq-in-2");
        assert_eq!(n.vnet(NetworkSide::External, two).as_str(), "vnet-rabbitmq-ex-2");
        assert_eq!(n.subnet(NetworkSide::External, two).as_str(), "snet-rabbitmq-ex-2");
        assert_eq!(n.firewall(two).as_str(), "fw-rabbitmq2");
        assert_eq!(n.public_ip(two).as_str(), "ip-fw-rabbitmq2");
        assert_eq!(n.global_peering(two, Ordinal::from_index(0)).as_str(), "peer-vnet2-vnet1");
        assert_eq!(n.region_peering(NetworkSide::Internal, two).as_str(), "peer-vnet2-in");
    }

    #[test]
    fn test_dns_names() {
        let n = naming();
        let three = Ordinal::from_index(2);
        assert_eq!(n.host(three), "rabbitmq3");
        assert_eq!(n.fqdn(three), "rabbitmq3.example.com");
        assert_eq!(n.node_name(three), "rabbit@rabbitmq3.example.com");
        assert_eq!(n.a_record(three).as_str(), "a-rabbitmq3");
        assert_eq!(n.ptr_record(three).as_str(), "ptr-rabbitmq3");
        assert_eq!(n.discovery_record().as_str(), "a-discovery");
        assert_eq!(n.discovery_fqdn(), "discovery.example.com");
    }

    #[test]
    fn test_route_names() {
        let n = naming();
        let one = Ordinal::from_index(0);
        let three = Ordinal::from_index(2);
        assert_eq!(n.route_table(NetworkSide::Internal, one).as_str(), "route-1-in");
        assert_eq!(n.route_association(NetworkSide::External, one).as_str(), "route-assoc-1-ex");
        assert_eq!(n.inbound_route(one, three), "route-1-to-3");
        assert_eq!(n.outbound_route(one, three), "route-1-to-fw3");
        assert_eq!(n.internet_route(one), "route-1-to-internet");
        assert_eq!(n.rule_collection(one).as_str(), "fw-rules-1-in");
    }
}
