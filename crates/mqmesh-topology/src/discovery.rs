//! Discovery records
//!
//! Brokers find each other through DNS: one A record per node, one multi-value
//! discovery record listing every node, and a PTR record per node. Forward
//! records are only published once every firewall rule collection exists, so a
//! broker never resolves a peer it cannot reach yet.

use crate::config::ClusterConfig;
use crate::deferred::Deferred;
use crate::firewall::RuleCollection;
use crate::graph::{name_of, Properties, Resource, ResourceGraph, ResourceKind};
use crate::naming::{Naming, DISCOVERY_RECORD_NAME};
use crate::region::{RegionTopology, SharedResources};
use mqmesh_common::{ResourceId, TopologyResult};
use std::net::Ipv4Addr;
use tracing::debug;

/// Segments kept in reverse record names
pub const REVERSE_SEGMENTS: usize = 3;

/// Reverse the dotted octets of `address` and keep the first `segments`.
///
/// `reverse_ip("10.3.0.4", 3) == "4.0.3"`: the leading `10` is dropped, which
/// matches a reverse zone rooted at `10.in-addr.arpa`.
pub fn reverse_ip(address: &str, segments: usize) -> String {
    address
        .split('.')
        .rev()
        .take(segments)
        .collect::<Vec<_>>()
        .join(".")
}

/// What the builder produced
#[derive(Debug, Clone)]
pub struct DiscoveryRecords {
    pub discovery: ResourceId,
    pub forward: Vec<ResourceId>,
    pub reverse: Vec<ResourceId>,
}

/// Builds forward, reverse and discovery records
pub struct DiscoveryRecordBuilder<'a> {
    config: &'a ClusterConfig,
    naming: &'a Naming,
    shared: &'a SharedResources,
}

impl<'a> DiscoveryRecordBuilder<'a> {
    pub fn new(config: &'a ClusterConfig, naming: &'a Naming, shared: &'a SharedResources) -> Self {
        Self { config, naming, shared }
    }

    pub fn build(
        &self,
        graph: &mut ResourceGraph,
        regions: &[RegionTopology],
        rules: &[RuleCollection],
    ) -> TopologyResult<DiscoveryRecords> {
        let rule_ids: Vec<&ResourceId> = rules.iter().map(|c| &c.id).collect();
        let rg = name_of(&self.shared.resource_group);
        let zone = name_of(&self.shared.zone);
        let reverse_zone = name_of(&self.shared.reverse_zone);
        let ttl = self.config.dns_ttl;

        let addresses = Deferred::all(regions.iter().map(|r| r.workload.address.clone()))
            .map(|addresses| addresses.iter().map(Ipv4Addr::to_string).collect::<Vec<_>>());
        let discovery = graph.add(
            Resource::new(
                self.naming.discovery_record(),
                ResourceKind::ARecord,
                Properties::new()
                    .with("name", DISCOVERY_RECORD_NAME)
                    .with("ttl", ttl)
                    .with_deferred("resourceGroupName", &rg)
                    .with_deferred("zoneName", &zone)
                    .with_deferred("records", &addresses),
            )
            .depends_on(rule_ids.iter().copied()),
        )?;

        let mut forward = Vec::with_capacity(regions.len());
        let mut reverse = Vec::with_capacity(regions.len());

        for region in regions {
            let n = region.ordinal();
            let address = &region.workload.address;

            let records = address.map(|a| vec![a.to_string()]);
            forward.push(graph.add(
                Resource::new(
                    self.naming.a_record(n),
                    ResourceKind::ARecord,
                    Properties::new()
                        .with("name", self.naming.host(n))
                        .with("ttl", ttl)
                        .with_deferred("resourceGroupName", &rg)
                        .with_deferred("zoneName", &zone)
                        .with_deferred("records", &records),
                )
                .depends_on(rule_ids.iter().copied().chain([&discovery])),
            )?);

            let reverse_name = address.map(|a| reverse_ip(&a.to_string(), REVERSE_SEGMENTS));
            reverse.push(graph.add(Resource::new(
                self.naming.ptr_record(n),
                ResourceKind::PtrRecord,
                Properties::new()
                    .with("records", vec![self.naming.fqdn(n)])
                    .with("ttl", ttl)
                    .with_deferred("name", &reverse_name)
                    .with_deferred("resourceGroupName", &rg)
                    .with_deferred("zoneName", &reverse_zone),
            ))?);
        }

        debug!(
            forward = forward.len(),
            reverse = reverse.len(),
            "discovery records built"
        );
        Ok(DiscoveryRecords {
            discovery,
            forward,
            reverse,
        })
    }
}
