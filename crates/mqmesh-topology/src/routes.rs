//! Route tables
//!
//! Each region gets two tables. The inbound table sits on the workload subnet
//! and sends traffic for every other region's workload block to this region's
//! own firewall. The outbound table sits on the firewall subnet and sends the
//! same blocks to the firewall of the region that owns them, with a single
//! catch-all route to the internet.

use crate::deferred::{Deferred, Outputs};
use crate::graph::{id_of, name_of, Properties, Resource, ResourceGraph, ResourceKind};
use crate::naming::{Naming, NetworkSide};
use crate::region::RegionTopology;
use ipnetwork::Ipv4Network;
use mqmesh_common::{Ordinal, ResourceId, TopologyError, TopologyResult};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::debug;

/// Where a route sends matching traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "address")]
pub enum NextHop {
    ViaAppliance(Ipv4Addr),
    ViaInternet,
}

impl NextHop {
    /// Provider next-hop type
    pub fn hop_type(&self) -> &'static str {
        match self {
            Self::ViaAppliance(_) => "VirtualAppliance",
            Self::ViaInternet => "Internet",
        }
    }
}

/// A resolved route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub destination: Ipv4Network,
    pub next_hop: NextHop,
}

impl Route {
    /// Provider representation
    pub fn to_json(&self) -> Value {
        let mut route = json!({
            "name": self.name,
            "addressPrefix": self.destination.to_string(),
            "nextHopType": self.next_hop.hop_type(),
        });
        if let NextHop::ViaAppliance(address) = self.next_hop {
            route["nextHopInIpAddress"] = json!(address.to_string());
        }
        route
    }
}

/// Next hop before the firewall address is known
#[derive(Debug, Clone)]
pub enum PlannedHop {
    Appliance {
        firewall: ResourceId,
        address: Deferred<Ipv4Addr>,
    },
    Internet,
}

/// A route whose next hop may still be pending
#[derive(Debug, Clone)]
pub struct PlannedRoute {
    pub name: String,
    pub destination: Ipv4Network,
    pub hop: PlannedHop,
}

impl PlannedRoute {
    /// The route once its next hop resolves
    pub fn resolve(&self, outputs: &Outputs) -> Option<Route> {
        let next_hop = match &self.hop {
            PlannedHop::Appliance { address, .. } => NextHop::ViaAppliance(address.resolve(outputs)?),
            PlannedHop::Internet => NextHop::ViaInternet,
        };
        Some(Route {
            name: self.name.clone(),
            destination: self.destination,
            next_hop,
        })
    }

    /// Deferred provider representation
    pub fn deferred(&self) -> Deferred<Value> {
        match &self.hop {
            PlannedHop::Appliance { address, .. } => {
                let (name, destination) = (self.name.clone(), self.destination);
                address.map(move |address| {
                    Route {
                        name: name.clone(),
                        destination,
                        next_hop: NextHop::ViaAppliance(address),
                    }
                    .to_json()
                })
            }
            PlannedHop::Internet => Deferred::known(
                Route {
                    name: self.name.clone(),
                    destination: self.destination,
                    next_hop: NextHop::ViaInternet,
                }
                .to_json(),
            ),
        }
    }
}

/// One table and the subnet it is attached to
#[derive(Debug, Clone)]
pub struct RouteTablePlan {
    pub table: ResourceId,
    pub association: ResourceId,
    pub side: NetworkSide,
    pub region: Ordinal,
    pub subnet: ResourceId,
    pub routes: Vec<PlannedRoute>,
}

impl RouteTablePlan {
    pub fn appliance_routes(&self) -> impl Iterator<Item = &PlannedRoute> {
        self.routes
            .iter()
            .filter(|r| matches!(r.hop, PlannedHop::Appliance { .. }))
    }

    pub fn internet_routes(&self) -> impl Iterator<Item = &PlannedRoute> {
        self.routes.iter().filter(|r| matches!(r.hop, PlannedHop::Internet))
    }
}

/// Builds both route tables of every region
pub struct RouteTableBuilder<'a> {
    naming: &'a Naming,
    region_count: usize,
}

impl<'a> RouteTableBuilder<'a> {
    /// `region_count` is the number of allocated regions; every ordinal up to
    /// it must be present when building.
    pub fn new(naming: &'a Naming, region_count: usize) -> Self {
        Self { naming, region_count }
    }

    fn others(&self, n: Ordinal) -> impl Iterator<Item = Ordinal> {
        (0..self.region_count)
            .map(Ordinal::from_index)
            .filter(move |&m| m != n)
    }

    /// Workload subnet table: other regions' workload blocks via this
    /// region's own firewall. No internet route.
    pub fn inbound(&self, region: &RegionTopology, regions: &[RegionTopology]) -> TopologyResult<RouteTablePlan> {
        let n = region.ordinal();
        let mut routes = Vec::new();
        for m in self.others(n) {
            let target = lookup(regions, m)?;
            routes.push(PlannedRoute {
                name: self.naming.inbound_route(n, m),
                destination: target.blocks.internal.network(),
                hop: appliance(region),
            });
        }
        self.table(region, NetworkSide::Internal, routes)
    }

    /// Firewall subnet table: other regions' workload blocks via their own
    /// firewalls, plus the internet catch-all.
    pub fn outbound(&self, region: &RegionTopology, regions: &[RegionTopology]) -> TopologyResult<RouteTablePlan> {
        let n = region.ordinal();
        let mut routes = Vec::new();
        for m in self.others(n) {
            let target = lookup(regions, m)?;
            routes.push(PlannedRoute {
                name: self.naming.outbound_route(n, m),
                destination: target.blocks.internal.network(),
                hop: appliance(target),
            });
        }
        routes.push(PlannedRoute {
            name: self.naming.internet_route(n),
            destination: Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0)
                .map_err(|e| TopologyError::invariant(e.to_string()))?,
            hop: PlannedHop::Internet,
        });
        self.table(region, NetworkSide::External, routes)
    }

    fn table(&self, region: &RegionTopology, side: NetworkSide, routes: Vec<PlannedRoute>) -> TopologyResult<RouteTablePlan> {
        let n = region.ordinal();
        let mut seen = HashSet::new();
        if let Some(dup) = routes.iter().find(|r| !seen.insert(r.destination)) {
            return Err(TopologyError::invariant(format!(
                "route table {} has two routes to {}",
                self.naming.route_table(side, n),
                dup.destination
            )));
        }

        Ok(RouteTablePlan {
            table: self.naming.route_table(side, n),
            association: self.naming.route_association(side, n),
            side,
            region: n,
            subnet: region.networks.side(side).subnet.clone(),
            routes,
        })
    }

    /// Plan and add every table and association
    pub fn build(&self, graph: &mut ResourceGraph, regions: &[RegionTopology]) -> TopologyResult<Vec<RouteTablePlan>> {
        let mut plans = Vec::with_capacity(regions.len() * 2);

        for region in regions {
            for plan in [self.inbound(region, regions)?, self.outbound(region, regions)?] {
                let routes = Deferred::all(plan.routes.iter().map(PlannedRoute::deferred));
                graph.add(Resource::new(
                    plan.table.clone(),
                    ResourceKind::RouteTable,
                    Properties::new()
                        .with("name", plan.table.as_str())
                        .with("location", region.region.location.as_str())
                        .with_deferred("resourceGroupName", &name_of(&region.resource_group))
                        .with_deferred("routes", &routes),
                ))?;
                graph.add(Resource::new(
                    plan.association.clone(),
                    ResourceKind::SubnetRouteTableAssociation,
                    Properties::new()
                        .with_deferred("routeTableId", &id_of(&plan.table))
                        .with_deferred("subnetId", &id_of(&plan.subnet)),
                ))?;
                plans.push(plan);
            }
        }

        debug!(tables = plans.len(), "route tables built");
        Ok(plans)
    }
}

fn appliance(region: &RegionTopology) -> PlannedHop {
    PlannedHop::Appliance {
        firewall: region.firewall.firewall.clone(),
        address: region.firewall.private_address.clone(),
    }
}

fn lookup(regions: &[RegionTopology], ordinal: Ordinal) -> TopologyResult<&RegionTopology> {
    regions
        .iter()
        .find(|r| r.ordinal() == ordinal)
        .ok_or_else(|| TopologyError::invariant(format!("route references unallocated region {ordinal}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressSpaceAllocator;
    use crate::config::ClusterConfig;
    use crate::graph::attr;
    use crate::region::{RegionTopologyBuilder, SharedResources};

    fn regions(count: usize) -> (ResourceGraph, Naming, Vec<RegionTopology>) {
        let config = ClusterConfig::default().with_regions((0..count).map(|i| format!("loc{i}")));
        let naming = Naming::from_config(&config);
        let mut graph = ResourceGraph::new();
        let shared = SharedResources::build(&mut graph, &config, &naming).unwrap();
        let builder = RegionTopologyBuilder::new(&config, &naming, &shared);

        let mut built = Vec::new();
        for (region, blocks) in config.regions().iter().zip(AddressSpaceAllocator::allocate(count).unwrap()) {
            let topology = builder.build(&mut graph, region, blocks, &built).unwrap();
            built.push(topology);
        }
        (graph, naming, built)
    }

    fn firewall_addresses(built: &[RegionTopology]) -> Outputs {
        let mut outputs = Outputs::new();
        for region in built {
            let address = format!("10.{}.0.4", region.blocks.external.base());
            outputs.record(&region.firewall.firewall, attr::PRIVATE_IP_ADDRESS, address);
        }
        outputs
    }

    #[test]
    fn test_outbound_table() {
        let (_, naming, built) = regions(3);
        let plan = RouteTableBuilder::new(&naming, 3).outbound(&built[0], &built).unwrap();

        assert_eq!(plan.table.as_str(), "route-1-ex");
        assert_eq!(plan.association.as_str(), "route-assoc-1-ex");
        assert_eq!(plan.subnet, built[0].networks.external.subnet);
        assert_eq!(plan.appliance_routes().count(), 2);
        assert_eq!(plan.internet_routes().count(), 1);

        let outputs = firewall_addresses(&built);
        let routes: Vec<Route> = plan.routes.iter().map(|r| r.resolve(&outputs).unwrap()).collect();
        assert_eq!(routes[0].name, "route-1-to-fw2");
        assert_eq!(routes[0].destination.to_string(), "10.3.0.0/16");
        assert_eq!(routes[0].next_hop, NextHop::ViaAppliance(Ipv4Addr::new(10, 4, 0, 4)));
        assert_eq!(routes[1].name, "route-1-to-fw3");
        assert_eq!(routes[1].next_hop, NextHop::ViaAppliance(Ipv4Addr::new(10, 6, 0, 4)));
        assert_eq!(routes[2].name, "route-1-to-internet");
        assert_eq!(routes[2].destination.to_string(), "0.0.0.0/0");
        assert_eq!(routes[2].next_hop, NextHop::ViaInternet);
    }

    #[test]
    fn test_inbound_table_uses_own_firewall() {
        let (_, naming, built) = regions(3);
        let plan = RouteTableBuilder::new(&naming, 3).inbound(&built[1], &built).unwrap();

        assert_eq!(plan.table.as_str(), "route-2-in");
        assert_eq!(plan.internet_routes().count(), 0);

        let outputs = firewall_addresses(&built);
        let routes: Vec<Route> = plan.routes.iter().map(|r| r.resolve(&outputs).unwrap()).collect();
        let names: Vec<&str> = routes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["route-2-to-1", "route-2-to-3"]);
        assert_eq!(routes[0].destination.to_string(), "10.1.0.0/16");
        assert_eq!(routes[1].destination.to_string(), "10.5.0.0/16");
        assert!(routes
            .iter()
            .all(|r| r.next_hop == NextHop::ViaAppliance(Ipv4Addr::new(10, 4, 0, 4))));
    }

    #[test]
    fn test_unresolved_firewall_is_never_emitted() {
        let (mut graph, naming, built) = regions(2);
        let plans = RouteTableBuilder::new(&naming, 2).build(&mut graph, &built).unwrap();

        let mut outputs = firewall_addresses(&built[..1]);
        let table = graph.get(&plans[1].table).unwrap();
        outputs.record(&built[0].resource_group, attr::NAME, "rg");
        assert!(table.properties.resolve(&outputs).is_none());
        assert!(table.dependencies().contains(&built[1].firewall.firewall));

        outputs = firewall_addresses(&built);
        outputs.record(&built[0].resource_group, attr::NAME, "rg");
        let props = table.properties.resolve(&outputs).unwrap();
        assert_eq!(props["routes"][0]["nextHopType"], "VirtualAppliance");
        assert_eq!(props["routes"][0]["nextHopInIpAddress"], "10.4.0.4");
        assert_eq!(props["routes"][1]["nextHopType"], "Internet");
        assert!(props["routes"][1].get("nextHopInIpAddress").is_none());
    }

    #[test]
    fn test_unallocated_region() {
        let (_, naming, built) = regions(2);
        let err = RouteTableBuilder::new(&naming, 3).outbound(&built[0], &built).unwrap_err();
        assert!(err.is_invariant());
        assert!(err.to_string().contains("unallocated region 3"));
    }

    #[test]
    fn test_single_region() {
        let (mut graph, naming, built) = regions(1);
        let plans = RouteTableBuilder::new(&naming, 1).build(&mut graph, &built).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].routes.len(), 0);
        assert_eq!(plans[1].routes.len(), 1);
        graph.validate().unwrap();
    }
}
