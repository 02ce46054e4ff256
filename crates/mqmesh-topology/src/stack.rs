//! Stack synthesis
//!
//! Runs the builders in dependency order:
//!
//! ```text
//! allocate -> regions -> { peering, routes, firewall rules } -> discovery
//! ```
//!
//! The result is a validated [`ResourceGraph`] plus the typed plan of each
//! stage. Nothing is created here; see [`crate::executor`] for that.

use crate::address::{ensure_disjoint, AddressBlock, AddressSpaceAllocator};
use crate::config::ClusterConfig;
use crate::deferred::{Deferred, Outputs};
use crate::discovery::{DiscoveryRecordBuilder, DiscoveryRecords};
use crate::executor::{ApplyReport, GraphExecutor, Provisioner};
use crate::firewall::{FirewallRuleBuilder, RuleCollection};
use crate::graph::ResourceGraph;
use crate::naming::Naming;
use crate::peering::{PeeringEdge, PeeringMeshBuilder};
use crate::region::{RegionTopology, RegionTopologyBuilder, SharedResources};
use crate::routes::{RouteTableBuilder, RouteTablePlan};
use mqmesh_common::{TopologyError, TopologyResult};
use std::sync::Arc;
use tracing::info;

/// Everything synthesis produced
#[derive(Debug)]
pub struct Synthesis {
    pub config: ClusterConfig,
    pub graph: ResourceGraph,
    pub shared: SharedResources,
    pub regions: Vec<RegionTopology>,
    pub peering: Vec<PeeringEdge>,
    pub routes: Vec<RouteTablePlan>,
    pub rules: Vec<RuleCollection>,
    pub discovery: DiscoveryRecords,
}

impl Synthesis {
    /// The stack's single published output
    pub fn cookie(&self) -> Deferred<String> {
        self.shared.cookie_value()
    }

    /// Every allocated block, internal then external per region
    pub fn blocks(&self) -> Vec<AddressBlock> {
        self.regions
            .iter()
            .flat_map(|r| [r.blocks.internal, r.blocks.external])
            .collect()
    }
}

/// Build and validate the full graph for `config`
pub fn synthesize(config: &ClusterConfig) -> TopologyResult<Synthesis> {
    config.validate()?;

    let naming = Naming::from_config(config);
    let regions = config.regions();
    let blocks = AddressSpaceAllocator::allocate(regions.len())?;

    let mut graph = ResourceGraph::new();
    let shared = SharedResources::build(&mut graph, config, &naming)?;

    let builder = RegionTopologyBuilder::new(config, &naming, &shared);
    let mut built: Vec<RegionTopology> = Vec::with_capacity(regions.len());
    for (region, blocks) in regions.iter().zip(blocks) {
        let topology = builder.build(&mut graph, region, blocks, &built)?;
        built.push(topology);
    }

    let flat: Vec<AddressBlock> = built
        .iter()
        .flat_map(|r| [r.blocks.internal, r.blocks.external])
        .collect();
    ensure_disjoint(&flat)?;

    let peering = PeeringMeshBuilder::new(&naming).build(&mut graph, &built)?;
    let routes = RouteTableBuilder::new(&naming, regions.len()).build(&mut graph, &built)?;
    let rules = FirewallRuleBuilder::new(&naming).build(&mut graph, &built)?;
    let discovery = DiscoveryRecordBuilder::new(config, &naming, &shared).build(&mut graph, &built, &rules)?;

    graph.validate()?;

    info!(
        deployment = %config.deployment_name,
        regions = built.len(),
        resources = graph.len(),
        peerings = peering.len(),
        "topology synthesized"
    );

    Ok(Synthesis {
        config: config.clone(),
        graph,
        shared,
        regions: built,
        peering,
        routes,
        rules,
        discovery,
    })
}

/// Result of provisioning a stack
#[derive(Debug)]
pub struct StackOutputs {
    pub cookie: String,
    pub report: ApplyReport,
}

/// Synthesize and create everything through `provisioner`
pub async fn provision(config: &ClusterConfig, provisioner: Arc<dyn Provisioner>) -> TopologyResult<(Synthesis, StackOutputs)> {
    let synthesis = synthesize(config)?;
    let report = GraphExecutor::new(provisioner).apply(&synthesis.graph).await?;
    let cookie = resolve_cookie(&synthesis, &report.outputs)?;

    info!(run_id = %report.run_id, created = report.created.len(), "stack provisioned");
    Ok((synthesis, StackOutputs { cookie, report }))
}

fn resolve_cookie(synthesis: &Synthesis, outputs: &Outputs) -> TopologyResult<String> {
    synthesis.cookie().resolve(outputs).ok_or_else(|| TopologyError::MissingOutput {
        resource: synthesis.shared.cookie.to_string(),
        attribute: crate::graph::attr::RESULT.to_string(),
    })
}
