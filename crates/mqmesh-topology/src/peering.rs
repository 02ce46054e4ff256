//! Peering mesh
//!
//! Two kinds of edge: within a region the internal and external networks peer
//! both ways, and across regions every external network peers with every other
//! external network. Peerings are directed, so the global mesh has N(N-1) edges.

use crate::graph::{id_of, name_of, Properties, Resource, ResourceGraph, ResourceKind};
use crate::naming::{Naming, NetworkSide};
use crate::region::{Network, RegionTopology};
use mqmesh_common::{ResourceId, TopologyError, TopologyResult};
use serde::Serialize;
use tracing::debug;

/// Where a peering edge sits in the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeeringScope {
    /// Internal <-> external of one region
    IntraRegion,
    /// External <-> external across regions
    Global,
}

/// A directed peering between two networks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeeringEdge {
    pub id: ResourceId,
    pub from: ResourceId,
    pub to: ResourceId,
    pub scope: PeeringScope,
    pub allow_forwarded_traffic: bool,
}

/// Builds the peering mesh over already-built regions
pub struct PeeringMeshBuilder<'a> {
    naming: &'a Naming,
}

impl<'a> PeeringMeshBuilder<'a> {
    pub fn new(naming: &'a Naming) -> Self {
        Self { naming }
    }

    /// Plan every edge without touching a graph
    pub fn plan(&self, regions: &[RegionTopology]) -> Vec<PeeringEdge> {
        let mut edges = Vec::with_capacity(regions.len() * (regions.len() + 1));

        for region in regions {
            let n = region.ordinal();
            let (internal, external) = (&region.networks.internal, &region.networks.external);
            edges.push(self.edge(
                self.naming.region_peering(NetworkSide::Internal, n),
                internal,
                external,
                PeeringScope::IntraRegion,
            ));
            edges.push(self.edge(
                self.naming.region_peering(NetworkSide::External, n),
                external,
                internal,
                PeeringScope::IntraRegion,
            ));
        }

        for source in regions {
            for target in regions {
                if source.ordinal() == target.ordinal() {
                    continue;
                }
                edges.push(self.edge(
                    self.naming.global_peering(source.ordinal(), target.ordinal()),
                    &source.networks.external,
                    &target.networks.external,
                    PeeringScope::Global,
                ));
            }
        }

        edges
    }

    fn edge(&self, id: ResourceId, from: &Network, to: &Network, scope: PeeringScope) -> PeeringEdge {
        PeeringEdge {
            id,
            from: from.id.clone(),
            to: to.id.clone(),
            scope,
            allow_forwarded_traffic: true,
        }
    }

    /// Add every edge to the graph. The peering lives in the source network's
    /// resource group.
    pub fn build(&self, graph: &mut ResourceGraph, regions: &[RegionTopology]) -> TopologyResult<Vec<PeeringEdge>> {
        let edges = self.plan(regions);

        for edge in &edges {
            let rg = owning_group(regions, &edge.from)?;
            graph.add(Resource::new(
                edge.id.clone(),
                ResourceKind::VirtualNetworkPeering,
                Properties::new()
                    .with("name", edge.id.as_str())
                    .with("allowForwardedTraffic", edge.allow_forwarded_traffic)
                    .with_deferred("resourceGroupName", &name_of(rg))
                    .with_deferred("virtualNetworkName", &name_of(&edge.from))
                    .with_deferred("remoteVirtualNetworkId", &id_of(&edge.to)),
            ))?;
        }

        debug!(
            edges = edges.len(),
            global = edges.iter().filter(|e| e.scope == PeeringScope::Global).count(),
            "peering mesh built"
        );
        Ok(edges)
    }
}

fn owning_group<'r>(regions: &'r [RegionTopology], network: &ResourceId) -> TopologyResult<&'r ResourceId> {
    regions
        .iter()
        .find(|r| &r.networks.internal.id == network || &r.networks.external.id == network)
        .map(|r| &r.resource_group)
        .ok_or_else(|| TopologyError::invariant(format!("network {network} belongs to no region")))
}

/// Global edges leaving one region
pub fn global_edges_from(edges: &[PeeringEdge], from: &ResourceId) -> usize {
    edges
        .iter()
        .filter(|e| e.scope == PeeringScope::Global && &e.from == from)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressSpaceAllocator;
    use crate::config::ClusterConfig;
    use crate::region::{RegionTopologyBuilder, SharedResources};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn regions(count: usize) -> (ResourceGraph, Naming, Vec<RegionTopology>) {
        let config = ClusterConfig::default().with_regions((0..count).map(|i| format!("loc{i}")));
        let naming = Naming::from_config(&config);
        let mut graph = ResourceGraph::new();
        let shared = SharedResources::build(&mut graph, &config, &naming).unwrap();
        let builder = RegionTopologyBuilder::new(&config, &naming, &shared);
        let blocks = AddressSpaceAllocator::allocate(count).unwrap();

        let mut built = Vec::new();
        for (region, blocks) in config.regions().iter().zip(blocks) {
            let topology = builder.build(&mut graph, region, blocks, &built).unwrap();
            built.push(topology);
        }
        (graph, naming, built)
    }

    #[test]
    fn test_three_region_mesh() {
        let (mut graph, naming, built) = regions(3);
        let edges = PeeringMeshBuilder::new(&naming).build(&mut graph, &built).unwrap();

        let global: Vec<&PeeringEdge> = edges.iter().filter(|e| e.scope == PeeringScope::Global).collect();
        assert_eq!(global.len(), 6);
        assert_eq!(edges.len(), 12);
        assert!(edges.iter().all(|e| e.allow_forwarded_traffic));

        let names: Vec<&str> = global.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "peer-vnet1-vnet2",
                "peer-vnet1-vnet3",
                "peer-vnet2-vnet1",
                "peer-vnet2-vnet3",
                "peer-vnet3-vnet1",
                "peer-vnet3-vnet2"
            ]
        );
        assert_eq!(global[0].from.as_str(), "vnet-rabbitmq-ex-1");
        assert_eq!(global[0].to.as_str(), "vnet-rabbitmq-ex-2");
        assert_eq!(global_edges_from(&edges, &built[1].networks.external.id), 2);

        graph.validate().unwrap();
    }

    #[test]
    fn test_intra_region_edges() {
        let (_, naming, built) = regions(1);
        let edges = PeeringMeshBuilder::new(&naming).plan(&built);

        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].id.as_str(), "peer-vnet1-in");
        assert_eq!(edges[0].from.as_str(), "vnet-rabbitmq-in-1");
        assert_eq!(edges[0].to.as_str(), "vnet-rabbitmq-ex-1");
        assert_eq!(edges[1].id.as_str(), "peer-vnet1-ex");
        assert_eq!(edges[1].from.as_str(), "vnet-rabbitmq-ex-1");
    }

    #[test]
    fn test_peering_reads_source_group() {
        let (mut graph, naming, built) = regions(2);
        PeeringMeshBuilder::new(&naming).build(&mut graph, &built).unwrap();

        let edge = graph.get(&ResourceId::new("peer-vnet2-vnet1")).unwrap();
        let deps = edge.dependencies();
        assert!(deps.contains(&built[1].resource_group));
        assert!(deps.contains(&built[1].networks.external.id));
        assert!(deps.contains(&built[0].networks.external.id));
        assert!(!deps.contains(&built[0].resource_group));
    }

    proptest! {
        #[test]
        fn prop_mesh_cardinality(n in 1usize..12) {
            let (_, naming, built) = regions(n);
            let edges = PeeringMeshBuilder::new(&naming).plan(&built);
            let global: Vec<&PeeringEdge> = edges.iter().filter(|e| e.scope == PeeringScope::Global).collect();

            prop_assert_eq!(global.len(), n * (n - 1));
            prop_assert!(global.iter().all(|e| e.from != e.to));

            let unique: HashSet<(&ResourceId, &ResourceId)> = global.iter().map(|e| (&e.from, &e.to)).collect();
            prop_assert_eq!(unique.len(), global.len());
        }
    }
}
