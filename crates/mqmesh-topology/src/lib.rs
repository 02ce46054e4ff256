//! mqmesh topology synthesis
//!
//! Turns an ordered list of regions into the full network graph of a
//! multi-region message-broker cluster:
//! - Non-overlapping address blocks per region
//! - Internal (broker) and external (firewall) network pairs
//! - Full peering mesh between regions
//! - Hub routing through each region's firewall
//! - Pairwise allow rules and DNS-based peer discovery
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          TOPOLOGY SYNTHESIS                             │
//! │                                                                         │
//! │  ┌─────────────┐      ┌──────────────────────────────────────────┐      │
//! │  │   Address   │─────►│          Region Topology Builder         │      │
//! │  │  Allocator  │      │  vnet in/ex │ firewall │ storage │ aci    │      │
//! │  └─────────────┘      └────────────────────┬─────────────────────┘      │
//! │                                            │                            │
//! │               ┌────────────────────────────┼───────────────────┐        │
//! │               ▼                            ▼                   ▼        │
//! │  ┌─────────────────────┐   ┌─────────────────────┐   ┌────────────────┐ │
//! │  │    Peering Mesh     │   │    Route Tables     │   │ Firewall Rules │ │
//! │  │ intra + N(N-1) glob │   │  in: own fw  ex: fw │   │  from / to     │ │
//! │  └─────────────────────┘   └─────────────────────┘   └───────┬────────┘ │
//! │                                                              ▼          │
//! │                                                  ┌──────────────────┐   │
//! │                                                  │ Discovery DNS    │   │
//! │                                                  │ A / PTR / multi  │   │
//! │                                                  └──────────────────┘   │
//! │                                                                         │
//! │  ResourceGraph ──► GraphExecutor ──► Provisioner (cloud / local)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod address;
pub mod config;
pub mod deferred;
pub mod discovery;
pub mod executor;
pub mod firewall;
pub mod graph;
pub mod local;
pub mod naming;
pub mod peering;
pub mod region;
pub mod render;
pub mod routes;
pub mod stack;

pub use address::{AddressBlock, AddressSpaceAllocator, RegionBlocks, MAX_REGIONS};
pub use config::ClusterConfig;
pub use deferred::{Deferred, OutputRef, Outputs};
pub use discovery::{reverse_ip, DiscoveryRecordBuilder};
pub use executor::{ApplyReport, CreateRequest, GraphExecutor, Provisioner};
pub use firewall::{FirewallRule, FirewallRuleBuilder, RuleCollection};
pub use graph::{Resource, ResourceGraph, ResourceKind};
pub use local::LocalProvisioner;
pub use naming::Naming;
pub use peering::{PeeringEdge, PeeringMeshBuilder, PeeringScope};
pub use region::{Region, RegionTopology, RegionTopologyBuilder};
pub use render::{PlanDocument, PlanRenderer, RenderError};
pub use routes::{NextHop, Route, RouteTableBuilder};
pub use stack::{provision, synthesize, StackOutputs, Synthesis};
