//! Region topology
//!
//! Per region: an internal network whose single subnet hosts the broker
//! container, an external network whose single subnet hosts the firewall, and
//! the resources that hang off them (network profile, firewall, storage,
//! container group, DNS zone links).

use crate::address::RegionBlocks;
use crate::config::ClusterConfig;
use crate::deferred::Deferred;
use crate::graph::{attr, id_of, name_of, Properties, Resource, ResourceGraph, ResourceKind};
use crate::naming::{Naming, NetworkSide, FIREWALL_SUBNET_NAME};
use mqmesh_common::{Ordinal, ResourceId, TopologyError, TopologyResult};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::Ipv4Addr;
use tracing::debug;

const CONTAINER_DELEGATION: &str = "Microsoft.ContainerInstance/containerGroups";
const STORAGE_SERVICE_ENDPOINT: &str = "Microsoft.Storage";

/// File shares mounted into every broker container
pub const SHARES: [&str; 3] = ["config", "mnesia", "schema"];

/// Broker ports: management, inter-node, AMQP, epmd
pub const BROKER_PORTS: [u16; 4] = [15672, 25672, 5672, 4369];

/// A deployment target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    pub ordinal: Ordinal,
    pub location: String,
}

impl Region {
    pub fn new(ordinal: Ordinal, location: impl Into<String>) -> Self {
        Self {
            ordinal,
            location: location.into(),
        }
    }
}

/// One network of a region's pair
#[derive(Debug, Clone)]
pub struct Network {
    pub id: ResourceId,
    pub side: NetworkSide,
    pub block: crate::address::AddressBlock,
    pub subnet: ResourceId,
}

/// (internal, external) networks of one region
#[derive(Debug, Clone)]
pub struct NetworkPair {
    pub internal: Network,
    pub external: Network,
}

impl NetworkPair {
    pub fn side(&self, side: NetworkSide) -> &Network {
        match side {
            NetworkSide::Internal => &self.internal,
            NetworkSide::External => &self.external,
        }
    }
}

/// A region's firewall and its late-bound addresses
#[derive(Debug, Clone)]
pub struct FirewallEndpoint {
    pub firewall: ResourceId,
    pub public_ip: ResourceId,
    pub public_address: Deferred<Ipv4Addr>,
    /// Resolves only once the firewall is ready
    pub private_address: Deferred<Ipv4Addr>,
}

/// The broker container's late-bound private address
#[derive(Debug, Clone)]
pub struct WorkloadEndpoint {
    pub container: ResourceId,
    pub address: Deferred<Ipv4Addr>,
}

/// Cluster-wide resources every region links to
#[derive(Debug, Clone)]
pub struct SharedResources {
    pub resource_group: ResourceId,
    pub zone: ResourceId,
    pub reverse_zone: ResourceId,
    pub cookie: ResourceId,
}

impl SharedResources {
    /// Declare the common resource group, both private zones and the cookie
    pub fn build(graph: &mut ResourceGraph, config: &ClusterConfig, naming: &Naming) -> TopologyResult<Self> {
        let rg = naming.common_resource_group(&config.common_location);
        graph.add(Resource::new(
            rg.clone(),
            ResourceKind::ResourceGroup,
            Properties::new()
                .with("name", rg.as_str())
                .with("location", config.common_location.as_str()),
        ))?;

        let zone = graph.add(private_zone(&config.zone_name, &rg))?;
        let reverse_zone = graph.add(private_zone(&config.reverse_zone_name, &rg))?;

        let cookie = naming.cookie();
        let shape = &config.cookie;
        graph.add(Resource::new(
            cookie.clone(),
            ResourceKind::RandomString,
            Properties::new()
                .with("length", shape.length)
                .with("upper", shape.upper)
                .with("lower", shape.lower)
                .with("number", shape.number)
                .with("special", shape.special),
        ))?;

        Ok(Self {
            resource_group: rg,
            zone,
            reverse_zone,
            cookie,
        })
    }

    /// The cookie value, once generated
    pub fn cookie_value(&self) -> Deferred<String> {
        Deferred::output(&self.cookie, attr::RESULT)
    }
}

fn private_zone(name: &str, rg: &ResourceId) -> Resource {
    Resource::new(
        name,
        ResourceKind::PrivateDnsZone,
        Properties::new()
            .with("name", name)
            .with_deferred("resourceGroupName", &name_of(rg)),
    )
}

/// Everything built for one region
#[derive(Debug, Clone)]
pub struct RegionTopology {
    pub region: Region,
    pub blocks: RegionBlocks,
    pub resource_group: ResourceId,
    pub networks: NetworkPair,
    pub network_profile: ResourceId,
    pub firewall: FirewallEndpoint,
    pub workload: WorkloadEndpoint,
    pub storage: ResourceId,
    pub zone_links: Vec<ResourceId>,
}

impl RegionTopology {
    pub fn ordinal(&self) -> Ordinal {
        self.region.ordinal
    }
}

/// Builds the per-region part of the graph
pub struct RegionTopologyBuilder<'a> {
    config: &'a ClusterConfig,
    naming: &'a Naming,
    shared: &'a SharedResources,
}

impl<'a> RegionTopologyBuilder<'a> {
    pub fn new(config: &'a ClusterConfig, naming: &'a Naming, shared: &'a SharedResources) -> Self {
        Self { config, naming, shared }
    }

    /// Build one region. `built` holds the regions already in the graph; any
    /// address overlap with them aborts synthesis.
    pub fn build(
        &self,
        graph: &mut ResourceGraph,
        region: &Region,
        blocks: RegionBlocks,
        built: &[RegionTopology],
    ) -> TopologyResult<RegionTopology> {
        if blocks.internal.overlaps(&blocks.external) {
            return Err(TopologyError::invariant(format!(
                "region {} internal and external blocks overlap ({})",
                region.ordinal, blocks.internal
            )));
        }
        if let Some(other) = built.iter().find(|t| t.blocks.overlaps(&blocks)) {
            return Err(TopologyError::invariant(format!(
                "region {} blocks overlap region {} ({} / {})",
                region.ordinal, other.region.ordinal, blocks.internal, blocks.external
            )));
        }

        let n = region.ordinal;
        let naming = self.naming;
        let location = region.location.as_str();

        let rg = naming.resource_group(location);
        graph.add(Resource::new(
            rg.clone(),
            ResourceKind::ResourceGroup,
            Properties::new().with("name", rg.as_str()).with("location", location),
        ))?;

        let internal = self.network(graph, region, &rg, NetworkSide::Internal, blocks)?;
        let network_profile = self.network_profile(graph, region, &rg, &internal)?;
        let external = self.network(graph, region, &rg, NetworkSide::External, blocks)?;
        let firewall = self.firewall(graph, region, &rg, &external)?;
        let storage = self.storage(graph, region, &rg)?;
        let workload = self.container(graph, region, &rg, &network_profile, &storage, &firewall)?;

        let zone_links = vec![
            self.zone_link(graph, &self.shared.zone, &internal, n, false)?,
            self.zone_link(graph, &self.shared.reverse_zone, &internal, n, true)?,
        ];

        debug!(
            region = %location,
            ordinal = n.get(),
            internal = %blocks.internal,
            external = %blocks.external,
            "region topology built"
        );

        Ok(RegionTopology {
            region: region.clone(),
            blocks,
            resource_group: rg,
            networks: NetworkPair { internal, external },
            network_profile,
            firewall,
            workload,
            storage,
            zone_links,
        })
    }

    fn network(
        &self,
        graph: &mut ResourceGraph,
        region: &Region,
        rg: &ResourceId,
        side: NetworkSide,
        blocks: RegionBlocks,
    ) -> TopologyResult<Network> {
        let n = region.ordinal;
        let block = match side {
            NetworkSide::Internal => blocks.internal,
            NetworkSide::External => blocks.external,
        };
        let cidr = block.to_string();

        let vnet = self.naming.vnet(side, n);
        graph.add(Resource::new(
            vnet.clone(),
            ResourceKind::VirtualNetwork,
            Properties::new()
                .with("name", vnet.as_str())
                .with("location", region.location.as_str())
                .with("addressSpaces", vec![cidr.clone()])
                .with_deferred("resourceGroupName", &name_of(rg)),
        ))?;

        // Both subnets span their whole block
        let subnet = self.naming.subnet(side, n);
        let props = Properties::new()
            .with("addressPrefixes", vec![cidr])
            .with_deferred("resourceGroupName", &name_of(rg))
            .with_deferred("virtualNetworkName", &name_of(&vnet));
        let props = match side {
            NetworkSide::Internal => props
                .with("name", subnet.as_str())
                .with("serviceEndpoints", vec![STORAGE_SERVICE_ENDPOINT])
                .with(
                    "delegations",
                    json!([{
                        "name": self.naming.subnet_delegation(n),
                        "serviceDelegation": { "name": CONTAINER_DELEGATION },
                    }]),
                ),
            NetworkSide::External => props.with("name", FIREWALL_SUBNET_NAME),
        };
        graph.add(Resource::new(subnet.clone(), ResourceKind::Subnet, props))?;

        Ok(Network {
            id: vnet,
            side,
            block,
            subnet,
        })
    }

    fn network_profile(
        &self,
        graph: &mut ResourceGraph,
        region: &Region,
        rg: &ResourceId,
        internal: &Network,
    ) -> TopologyResult<ResourceId> {
        let n = region.ordinal;
        let nic = self.naming.network_interface(n);
        let ip_config = self.naming.ip_configuration(n);
        let interface = id_of(&internal.subnet).map(move |subnet_id| {
            json!({
                "name": nic,
                "ipConfigurations": [{ "name": ip_config, "subnetId": subnet_id }],
            })
        });

        let id = self.naming.network_profile(n);
        graph.add(Resource::new(
            id.clone(),
            ResourceKind::NetworkProfile,
            Properties::new()
                .with("name", id.as_str())
                .with("location", region.location.as_str())
                .with_deferred("resourceGroupName", &name_of(rg))
                .with_deferred("containerNetworkInterface", &interface),
        ))
    }

    fn firewall(
        &self,
        graph: &mut ResourceGraph,
        region: &Region,
        rg: &ResourceId,
        external: &Network,
    ) -> TopologyResult<FirewallEndpoint> {
        let n = region.ordinal;

        let public_ip = self.naming.public_ip(n);
        graph.add(Resource::new(
            public_ip.clone(),
            ResourceKind::PublicIp,
            Properties::new()
                .with("name", public_ip.as_str())
                .with("location", region.location.as_str())
                .with("sku", "Standard")
                .with("allocationMethod", "Static")
                .with_deferred("resourceGroupName", &name_of(rg)),
        ))?;

        let config_name = self.naming.firewall_ip_configuration(n);
        let ip_configurations = id_of(&external.subnet).zip_with(&id_of(&public_ip), move |subnet_id, ip_id| {
            json!([{
                "name": config_name,
                "subnetId": subnet_id,
                "publicIpAddressId": ip_id,
            }])
        });

        let firewall = self.naming.firewall(n);
        graph.add(Resource::new(
            firewall.clone(),
            ResourceKind::Firewall,
            Properties::new()
                .with("name", firewall.as_str())
                .with("location", region.location.as_str())
                .with_deferred("resourceGroupName", &name_of(rg))
                .with_deferred("ipConfigurations", &ip_configurations),
        ))?;

        Ok(FirewallEndpoint {
            public_address: Deferred::output(&public_ip, attr::IP_ADDRESS),
            private_address: Deferred::output(&firewall, attr::PRIVATE_IP_ADDRESS),
            firewall,
            public_ip,
        })
    }

    fn storage(&self, graph: &mut ResourceGraph, region: &Region, rg: &ResourceId) -> TopologyResult<ResourceId> {
        let account = self.naming.storage_account(region.ordinal);
        graph.add(Resource::new(
            account.clone(),
            ResourceKind::StorageAccount,
            Properties::new()
                .with("name", account.as_str())
                .with("location", region.location.as_str())
                .with("accountKind", "StorageV2")
                .with("accountReplicationType", "LRS")
                .with("accountTier", "Standard")
                .with_deferred("resourceGroupName", &name_of(rg)),
        ))?;

        for share in SHARES {
            let id = self.naming.file_share(share, region.ordinal);
            graph.add(Resource::new(
                id.clone(),
                ResourceKind::FileShare,
                Properties::new()
                    .with("name", id.as_str())
                    .with_deferred("storageAccountName", &name_of(&account)),
            ))?;
        }

        Ok(account)
    }

    fn volume(&self, storage: &ResourceId, share: &str, n: Ordinal) -> Deferred<Value> {
        let name = self.naming.volume(share, n);
        let mount_path = format!("/var/lib/rabbitmq/{share}");
        let share_id = self.naming.file_share(share, n);
        let key: Deferred<String> = Deferred::output(storage, attr::PRIMARY_ACCESS_KEY);

        name_of(storage)
            .zip_with(&key, |account, key| (account, key))
            .zip_with(&name_of(&share_id), move |(account, key), share_name| {
                json!({
                    "name": name,
                    "mountPath": mount_path,
                    "storageAccountName": account,
                    "storageAccountKey": key,
                    "shareName": share_name,
                })
            })
    }

    fn container(
        &self,
        graph: &mut ResourceGraph,
        region: &Region,
        rg: &ResourceId,
        network_profile: &ResourceId,
        storage: &ResourceId,
        firewall: &FirewallEndpoint,
    ) -> TopologyResult<WorkloadEndpoint> {
        let n = region.ordinal;
        let settings = &self.config.container;

        let volumes = Deferred::all(SHARES.iter().map(|share| self.volume(storage, share, n)));
        let erl_args = format!(
            "-rabbit cluster_formation [{{peer_discovery_backend,rabbit_peer_discovery_dns}},\
             {{peer_discovery_dns,[{{hostname,\"{}\"}}]}}]",
            self.naming.discovery_fqdn()
        );
        let node_name = self.naming.node_name(n);
        let environment = self.shared.cookie_value().map(move |cookie| {
            json!({
                "RABBITMQ_ERLANG_COOKIE": cookie,
                "RABBITMQ_SERVER_ADDITIONAL_ERL_ARGS": erl_args,
                "RABBITMQ_NODENAME": node_name,
                "RABBITMQ_USE_LONGNAME": "true",
            })
        });

        let ports: Vec<Value> = BROKER_PORTS
            .iter()
            .map(|port| json!({ "port": port, "protocol": "TCP" }))
            .collect();
        let command = vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            format!(
                "(sleep {} && docker-entrypoint.sh rabbitmq-server) & wait",
                settings.startup_delay_secs
            ),
        ];
        let image = settings.image.clone();
        let (cpu, memory) = (settings.cpu, settings.memory_gb);

        let containers = volumes.zip_with(&environment, move |volumes, environment| {
            json!([{
                "name": "rabbitmq",
                "image": image,
                "commands": command,
                "cpu": cpu,
                "memory": memory,
                "volumes": volumes,
                "ports": ports,
                "environmentVariables": environment,
            }])
        });

        let id = self.naming.container_group(n);
        // The broker must not start before its firewall exists
        graph.add(
            Resource::new(
                id.clone(),
                ResourceKind::ContainerGroup,
                Properties::new()
                    .with("name", id.as_str())
                    .with("location", region.location.as_str())
                    .with("ipAddressType", "Private")
                    .with("osType", "Linux")
                    .with_deferred("resourceGroupName", &name_of(rg))
                    .with_deferred("networkProfileId", &id_of(network_profile))
                    .with_deferred("containers", &containers),
            )
            .depends_on([&firewall.firewall]),
        )?;

        Ok(WorkloadEndpoint {
            address: Deferred::output(&id, attr::IP_ADDRESS),
            container: id,
        })
    }

    fn zone_link(
        &self,
        graph: &mut ResourceGraph,
        zone: &ResourceId,
        internal: &Network,
        n: Ordinal,
        reverse: bool,
    ) -> TopologyResult<ResourceId> {
        let id = self.naming.zone_link(reverse, n);
        graph.add(Resource::new(
            id.clone(),
            ResourceKind::DnsZoneLink,
            Properties::new()
                .with("name", id.as_str())
                .with("registrationEnabled", false)
                .with_deferred("resourceGroupName", &name_of(&self.shared.resource_group))
                .with_deferred("privateDnsZoneName", &name_of(zone))
                .with_deferred("virtualNetworkId", &id_of(&internal.id)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{AddressBlock, AddressSpaceAllocator};

    fn setup() -> (ClusterConfig, Naming, ResourceGraph, SharedResources) {
        let config = ClusterConfig::default();
        let naming = Naming::from_config(&config);
        let mut graph = ResourceGraph::new();
        let shared = SharedResources::build(&mut graph, &config, &naming).unwrap();
        (config, naming, graph, shared)
    }

    #[test]
    fn test_region_resources() {
        let (config, naming, mut graph, shared) = setup();
        let builder = RegionTopologyBuilder::new(&config, &naming, &shared);
        let region = Region::new(Ordinal::from_index(1), "eastus");
        let blocks = AddressSpaceAllocator::blocks_for(1).unwrap();

        let topology = builder.build(&mut graph, &region, blocks, &[]).unwrap();
        assert_eq!(topology.networks.internal.id.as_str(), "vnet-rabbitmq-in-2");
        assert_eq!(topology.networks.external.id.as_str(), "vnet-rabbitmq-ex-2");
        assert_eq!(topology.networks.internal.block.to_string(), "10.3.0.0/16");
        assert_eq!(topology.networks.external.block.to_string(), "10.4.0.0/16");
        assert_eq!(topology.firewall.firewall.as_str(), "fw-rabbitmq2");
        assert_eq!(topology.workload.container.as_str(), "aci-rabbitmq-2");
        assert_eq!(topology.resource_group.as_str(), "rg-rabbitmq-eastus");

        assert_eq!(graph.of_kind(ResourceKind::VirtualNetwork).count(), 2);
        assert_eq!(graph.of_kind(ResourceKind::Subnet).count(), 2);
        assert_eq!(graph.of_kind(ResourceKind::FileShare).count(), 3);
        assert_eq!(graph.of_kind(ResourceKind::DnsZoneLink).count(), 2);
        graph.validate().unwrap();
    }

    #[test]
    fn test_container_waits_for_firewall_and_profile() {
        let (config, naming, mut graph, shared) = setup();
        let builder = RegionTopologyBuilder::new(&config, &naming, &shared);
        let region = Region::new(Ordinal::from_index(0), "centralus");
        let topology = builder
            .build(&mut graph, &region, AddressSpaceAllocator::blocks_for(0).unwrap(), &[])
            .unwrap();

        let container = graph.get(&topology.workload.container).unwrap();
        let deps = container.dependencies();
        assert!(deps.contains(&topology.firewall.firewall));
        assert!(deps.contains(&topology.network_profile));
        assert!(deps.contains(&shared.cookie));
        assert!(deps.contains(&ResourceId::new("mnesia1")));
    }

    #[test]
    fn test_subnets_span_blocks() {
        let (config, naming, mut graph, shared) = setup();
        let builder = RegionTopologyBuilder::new(&config, &naming, &shared);
        let region = Region::new(Ordinal::from_index(0), "centralus");
        let topology = builder
            .build(&mut graph, &region, AddressSpaceAllocator::blocks_for(0).unwrap(), &[])
            .unwrap();

        let mut outputs = crate::deferred::Outputs::new();
        outputs.record(&topology.resource_group, attr::NAME, "rg");
        outputs.record(&topology.networks.external.id, attr::NAME, "vnet");

        let subnet = graph.get(&topology.networks.external.subnet).unwrap();
        let props = subnet.properties.resolve(&outputs).unwrap();
        assert_eq!(props["name"], FIREWALL_SUBNET_NAME);
        assert_eq!(props["addressPrefixes"][0], "10.2.0.0/16");
    }

    #[test]
    fn test_overlap_aborts() {
        let (config, naming, mut graph, shared) = setup();
        let builder = RegionTopologyBuilder::new(&config, &naming, &shared);
        let first = builder
            .build(
                &mut graph,
                &Region::new(Ordinal::from_index(0), "centralus"),
                AddressSpaceAllocator::blocks_for(0).unwrap(),
                &[],
            )
            .unwrap();

        let clash = RegionBlocks {
            internal: AddressBlock::from_base(9).unwrap(),
            external: AddressBlock::from_base(2).unwrap(),
        };
        let err = builder
            .build(&mut graph, &Region::new(Ordinal::from_index(1), "eastus"), clash, &[first])
            .unwrap_err();
        assert!(err.is_invariant());
    }
}
