//! Resource graph
//!
//! Every entity the collaborator must create is a [`Resource`]. Its dependency
//! set is the union of its explicit `depends_on` edges and every resource its
//! deferred properties read, so ordering never relies on insertion order.

use crate::deferred::{Deferred, OutputRef};
use mqmesh_common::{ResourceId, TopologyError, TopologyResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Attribute names reported by the collaborator
pub mod attr {
    /// Provider-side resource id
    pub const ID: &str = "id";
    /// Provider-side resource name
    pub const NAME: &str = "name";
    /// Private address of a firewall
    pub const PRIVATE_IP_ADDRESS: &str = "private_ip_address";
    /// Address of a public IP or a container group
    pub const IP_ADDRESS: &str = "ip_address";
    /// Storage account access key
    pub const PRIMARY_ACCESS_KEY: &str = "primary_access_key";
    /// Generated value of a random string
    pub const RESULT: &str = "result";
}

/// Provider-side name of a resource, once created
pub fn name_of(resource: &ResourceId) -> Deferred<String> {
    Deferred::output(resource, attr::NAME)
}

/// Provider-side id of a resource, once created
pub fn id_of(resource: &ResourceId) -> Deferred<String> {
    Deferred::output(resource, attr::ID)
}

/// Kind of resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    ResourceGroup,
    PrivateDnsZone,
    DnsZoneLink,
    RandomString,
    VirtualNetwork,
    Subnet,
    NetworkProfile,
    PublicIp,
    Firewall,
    StorageAccount,
    FileShare,
    ContainerGroup,
    VirtualNetworkPeering,
    RouteTable,
    SubnetRouteTableAssociation,
    FirewallNetworkRuleCollection,
    ARecord,
    PtrRecord,
}

impl ResourceKind {
    /// Provider type token
    pub fn type_token(&self) -> &'static str {
        match self {
            Self::ResourceGroup => "azure:core/resourceGroup:ResourceGroup",
            Self::PrivateDnsZone => "azure:privatedns/zone:Zone",
            Self::DnsZoneLink => "azure:privatedns/zoneVirtualNetworkLink:ZoneVirtualNetworkLink",
            Self::RandomString => "random:index/randomString:RandomString",
            Self::VirtualNetwork => "azure:network/virtualNetwork:VirtualNetwork",
            Self::Subnet => "azure:network/subnet:Subnet",
            Self::NetworkProfile => "azure:network/profile:Profile",
            Self::PublicIp => "azure:network/publicIp:PublicIp",
            Self::Firewall => "azure:network/firewall:Firewall",
            Self::StorageAccount => "azure:storage/account:Account",
            Self::FileShare => "azure:storage/share:Share",
            Self::ContainerGroup => "azure:containerservice/group:Group",
            Self::VirtualNetworkPeering => "azure:network/virtualNetworkPeering:VirtualNetworkPeering",
            Self::RouteTable => "azure:network/routeTable:RouteTable",
            Self::SubnetRouteTableAssociation => {
                "azure:network/subnetRouteTableAssociation:SubnetRouteTableAssociation"
            }
            Self::FirewallNetworkRuleCollection => {
                "azure:network/firewallNetworkRuleCollection:FirewallNetworkRuleCollection"
            }
            Self::ARecord => "azure:privatedns/aRecord:ARecord",
            Self::PtrRecord => "azure:privatedns/pTRRecord:PTRRecord",
        }
    }

    /// Attributes the collaborator reports once the resource is ready
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            Self::RandomString => &[attr::ID, attr::RESULT],
            Self::PublicIp => &[attr::ID, attr::NAME, attr::IP_ADDRESS],
            Self::Firewall => &[attr::ID, attr::NAME, attr::PRIVATE_IP_ADDRESS],
            Self::ContainerGroup => &[attr::ID, attr::NAME, attr::IP_ADDRESS],
            Self::StorageAccount => &[attr::ID, attr::NAME, attr::PRIMARY_ACCESS_KEY],
            _ => &[attr::ID, attr::NAME],
        }
    }

    /// Whether `attribute` is one this kind reports
    pub fn reports(&self, attribute: &str) -> bool {
        self.outputs().contains(&attribute)
    }
}

/// Property bag under construction: known values plus deferred ones
#[derive(Debug, Default)]
pub struct Properties {
    known: Map<String, Value>,
    deferred: Vec<(String, Deferred<Value>)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value known at synthesis time
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.known.insert(key.to_string(), value.into());
        self
    }

    /// Set a value that resolves later
    pub fn with_deferred<T>(mut self, key: &str, value: &Deferred<T>) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        let value = value.map(|v| serde_json::to_value(v).unwrap_or(Value::Null));
        self.deferred.push((key.to_string(), value));
        self
    }

    /// Known values, with every deferred value shown as the outputs it awaits
    pub fn preview(&self) -> Map<String, Value> {
        let mut preview = self.known.clone();
        for (key, value) in &self.deferred {
            let reads: Vec<String> = value.reads().iter().map(ToString::to_string).collect();
            preview.insert(key.clone(), Value::String(format!("${{{}}}", reads.join(", "))));
        }
        preview
    }

    /// Fold into a single deferred object
    pub fn build(self) -> Deferred<Value> {
        let known = self.known;
        let (keys, values): (Vec<String>, Vec<Deferred<Value>>) = self.deferred.into_iter().unzip();

        Deferred::all(values).map(move |values| {
            let mut object = known.clone();
            for (key, value) in keys.iter().zip(values) {
                object.insert(key.clone(), value);
            }
            Value::Object(object)
        })
    }
}

/// A resource to be created by the collaborator
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub properties: Deferred<Value>,
    /// Properties as far as they are known before anything is created
    pub preview: Map<String, Value>,
    /// Explicit ordering edges beyond what the properties read
    pub depends_on: BTreeSet<ResourceId>,
}

impl Resource {
    pub fn new(id: impl Into<ResourceId>, kind: ResourceKind, properties: Properties) -> Self {
        Self {
            id: id.into(),
            kind,
            preview: properties.preview(),
            properties: properties.build(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Add explicit ordering edges
    pub fn depends_on<'a>(mut self, ids: impl IntoIterator<Item = &'a ResourceId>) -> Self {
        self.depends_on.extend(ids.into_iter().cloned());
        self
    }

    /// Explicit edges plus every resource the properties read
    pub fn dependencies(&self) -> BTreeSet<ResourceId> {
        let mut deps = self.properties.dependencies();
        deps.extend(self.depends_on.iter().cloned());
        deps
    }

    /// Attributes the properties read
    pub fn reads(&self) -> &BTreeSet<OutputRef> {
        self.properties.reads()
    }
}

/// The entity graph handed to the collaborator
#[derive(Debug, Default)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource. Duplicate ids are an invariant violation.
    pub fn add(&mut self, resource: Resource) -> TopologyResult<ResourceId> {
        if self.index.contains_key(&resource.id) {
            return Err(TopologyError::invariant(format!(
                "resource {} declared twice",
                resource.id
            )));
        }
        let id = resource.id.clone();
        self.index.insert(id.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.resources[i])
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Resources of one kind, in declaration order
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    /// Count of resources per kind
    pub fn kind_counts(&self) -> BTreeMap<ResourceKind, usize> {
        let mut counts = BTreeMap::new();
        for resource in &self.resources {
            *counts.entry(resource.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Check that every edge points at a declared resource, every read names an
    /// attribute its resource reports, and the graph is acyclic.
    pub fn validate(&self) -> TopologyResult<()> {
        for resource in &self.resources {
            for dep in resource.dependencies() {
                if dep == resource.id {
                    return Err(TopologyError::invariant(format!(
                        "{} depends on itself",
                        resource.id
                    )));
                }
                if !self.contains(&dep) {
                    return Err(TopologyError::invariant(format!(
                        "{} depends on undeclared resource {}",
                        resource.id, dep
                    )));
                }
            }
            for read in resource.reads() {
                let Some(source) = self.get(&read.resource) else {
                    continue;
                };
                if !source.kind.reports(&read.attribute) {
                    return Err(TopologyError::invariant(format!(
                        "{} reads {}, which a {:?} never reports",
                        resource.id, read, source.kind
                    )));
                }
            }
        }

        self.layers().map(|_| ())
    }

    /// Topological layers (Kahn). Resources within a layer are independent of
    /// each other; each layer only depends on earlier ones. Ids are sorted within
    /// a layer so the order is reproducible.
    pub fn layers(&self) -> TopologyResult<Vec<Vec<ResourceId>>> {
        let mut remaining: BTreeMap<&ResourceId, usize> = BTreeMap::new();
        let mut dependents: HashMap<ResourceId, Vec<&ResourceId>> = HashMap::new();

        for resource in &self.resources {
            let deps = resource.dependencies();
            for dep in &deps {
                if !self.contains(dep) {
                    return Err(TopologyError::invariant(format!(
                        "{} depends on undeclared resource {}",
                        resource.id, dep
                    )));
                }
                dependents.entry(dep.clone()).or_default().push(&resource.id);
            }
            remaining.insert(&resource.id, deps.len());
        }

        let mut layers = Vec::new();
        let mut ready: Vec<&ResourceId> = remaining
            .iter()
            .filter(|&(_, &n)| n == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut placed = 0;

        while !ready.is_empty() {
            ready.sort();
            let mut next = Vec::new();
            for id in &ready {
                for dependent in dependents.get(*id).into_iter().flatten() {
                    if let Some(n) = remaining.get_mut(*dependent) {
                        *n -= 1;
                        if *n == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            placed += ready.len();
            layers.push(ready.iter().map(|id| (*id).clone()).collect());
            ready = next;
        }

        if placed != self.resources.len() {
            let stuck: Vec<String> = remaining
                .iter()
                .filter(|&(_, &n)| n > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(TopologyError::invariant(format!(
                "dependency cycle among: {}",
                stuck.join(", ")
            )));
        }

        Ok(layers)
    }
}
