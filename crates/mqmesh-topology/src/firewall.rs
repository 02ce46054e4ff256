//! Firewall rules
//!
//! Every region's firewall allows TCP on all ports between its own broker and
//! every other broker, in both directions. Rules name regions by ordinal and
//! only turn into addresses once the containers report theirs.

use crate::deferred::{Deferred, Outputs};
use crate::graph::{name_of, Properties, Resource, ResourceGraph, ResourceKind};
use crate::naming::Naming;
use crate::region::RegionTopology;
use mqmesh_common::{Ordinal, ResourceId, TopologyError, TopologyResult};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::debug;

/// Priority of every rule collection
pub const RULE_PRIORITY: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleAction {
    Allow,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "Allow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
        }
    }
}

/// A rule over region workloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallRule {
    pub name: String,
    pub sources: Vec<Ordinal>,
    pub destinations: Vec<Ordinal>,
    pub protocol: Protocol,
    pub ports: String,
}

impl FirewallRule {
    /// Provider representation, once every workload address is known
    fn to_json(&self, addresses: &BTreeMap<Ordinal, Ipv4Addr>) -> Option<Value> {
        let lookup = |ordinals: &[Ordinal]| -> Option<Vec<String>> {
            ordinals
                .iter()
                .map(|n| addresses.get(n).map(ToString::to_string))
                .collect()
        };
        Some(json!({
            "name": self.name,
            "sourceAddresses": lookup(&self.sources)?,
            "destinationAddresses": lookup(&self.destinations)?,
            "protocols": [self.protocol.as_str()],
            "destinationPorts": [self.ports],
        }))
    }
}

/// One region's rule collection
#[derive(Debug, Clone, Serialize)]
pub struct RuleCollection {
    pub id: ResourceId,
    pub region: Ordinal,
    pub firewall: ResourceId,
    pub action: RuleAction,
    pub priority: u32,
    pub rules: Vec<FirewallRule>,
}

impl RuleCollection {
    /// Every other region named in either direction
    pub fn peers(&self) -> Vec<Ordinal> {
        let mut peers: Vec<Ordinal> = self
            .rules
            .iter()
            .flat_map(|r| r.sources.iter().chain(&r.destinations))
            .copied()
            .filter(|&n| n != self.region)
            .collect();
        peers.sort();
        peers.dedup();
        peers
    }

    /// Rules with concrete addresses
    pub fn resolve(&self, workloads: &Deferred<BTreeMap<Ordinal, Ipv4Addr>>, outputs: &Outputs) -> Option<Value> {
        render_rules(&self.rules, &workloads.resolve(outputs)?)
    }
}

/// Builds the allow rules of every region
pub struct FirewallRuleBuilder<'a> {
    naming: &'a Naming,
}

impl<'a> FirewallRuleBuilder<'a> {
    pub fn new(naming: &'a Naming) -> Self {
        Self { naming }
    }

    /// Collection for one region over the given set of regions
    pub fn plan(&self, region: Ordinal, all: &[Ordinal]) -> TopologyResult<RuleCollection> {
        if !all.contains(&region) {
            return Err(TopologyError::invariant(format!(
                "firewall rules for unallocated region {region}"
            )));
        }
        let others: Vec<Ordinal> = all.iter().copied().filter(|&n| n != region).collect();

        Ok(RuleCollection {
            id: self.naming.rule_collection(region),
            region,
            firewall: self.naming.firewall(region),
            action: RuleAction::Allow,
            priority: RULE_PRIORITY,
            rules: vec![
                FirewallRule {
                    name: self.naming.rule_from(region),
                    sources: vec![region],
                    destinations: others.clone(),
                    protocol: Protocol::Tcp,
                    ports: "*".into(),
                },
                FirewallRule {
                    name: self.naming.rule_to(region),
                    sources: others,
                    destinations: vec![region],
                    protocol: Protocol::Tcp,
                    ports: "*".into(),
                },
            ],
        })
    }

    /// Add one collection per region
    pub fn build(&self, graph: &mut ResourceGraph, regions: &[RegionTopology]) -> TopologyResult<Vec<RuleCollection>> {
        let ordinals: Vec<Ordinal> = regions.iter().map(RegionTopology::ordinal).collect();
        let workloads = workload_addresses(regions);
        let mut collections = Vec::with_capacity(regions.len());

        for region in regions {
            let collection = self.plan(region.ordinal(), &ordinals)?;
            let rules = deferred_rules(collection.rules.clone(), &workloads);

            graph.add(Resource::new(
                collection.id.clone(),
                ResourceKind::FirewallNetworkRuleCollection,
                Properties::new()
                    .with("name", collection.id.as_str())
                    .with("action", collection.action.as_str())
                    .with("priority", collection.priority)
                    .with_deferred("resourceGroupName", &name_of(&region.resource_group))
                    .with_deferred("azureFirewallName", &name_of(&region.firewall.firewall))
                    .with_deferred("rules", &rules),
            ))?;
            collections.push(collection);
        }

        debug!(collections = collections.len(), "firewall rules built");
        Ok(collections)
    }
}

fn render_rules(rules: &[FirewallRule], addresses: &BTreeMap<Ordinal, Ipv4Addr>) -> Option<Value> {
    rules
        .iter()
        .map(|r| r.to_json(addresses))
        .collect::<Option<Vec<Value>>>()
        .map(Value::Array)
}

/// Rendered rules; unresolved until every referenced workload has an address
fn deferred_rules(
    rules: Vec<FirewallRule>,
    workloads: &Deferred<BTreeMap<Ordinal, Ipv4Addr>>,
) -> Deferred<Value> {
    workloads.and_then(move |addresses| render_rules(&rules, &addresses))
}

/// Every region's workload address, keyed by ordinal
pub fn workload_addresses(regions: &[RegionTopology]) -> Deferred<BTreeMap<Ordinal, Ipv4Addr>> {
    let ordinals: Vec<Ordinal> = regions.iter().map(RegionTopology::ordinal).collect();
    Deferred::all(regions.iter().map(|r| r.workload.address.clone()))
        .map(move |addresses| ordinals.iter().copied().zip(addresses).collect())
}
