//! Late-bound values
//!
//! A [`Deferred<T>`] is a promise of a `T` that can only be computed once the
//! resources it reads have been created. Every deferred value carries the set of
//! `(resource, attribute)` pairs it reads, so the graph can lift those reads into
//! explicit dependency edges. Nothing here blocks or spawns: a deferred value is a
//! pure function of the [`Outputs`] reported so far.

use mqmesh_common::ResourceId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Attributes reported by the collaborator for one resource
pub type ResourceOutputs = serde_json::Map<String, Value>;

/// One attribute of one resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    /// Resource that reports the attribute
    pub resource: ResourceId,
    /// Attribute name
    pub attribute: String,
}

impl OutputRef {
    /// Reference `attribute` of `resource`
    pub fn new(resource: ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            resource,
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// Outputs reported so far, keyed by resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outputs {
    values: BTreeMap<ResourceId, ResourceOutputs>,
}

impl Outputs {
    /// Empty output table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record everything a resource reported
    pub fn insert(&mut self, resource: ResourceId, outputs: ResourceOutputs) {
        self.values.insert(resource, outputs);
    }

    /// Record one attribute
    pub fn record(&mut self, resource: &ResourceId, attribute: &str, value: impl Into<Value>) {
        self.values
            .entry(resource.clone())
            .or_default()
            .insert(attribute.to_string(), value.into());
    }

    /// Look up one attribute
    pub fn get(&self, resource: &ResourceId, attribute: &str) -> Option<&Value> {
        self.values.get(resource).and_then(|attrs| attrs.get(attribute))
    }

    /// Whether `output` has been reported
    pub fn contains(&self, output: &OutputRef) -> bool {
        self.get(&output.resource, &output.attribute).is_some()
    }

    /// All attributes of one resource
    pub fn resource(&self, resource: &ResourceId) -> Option<&ResourceOutputs> {
        self.values.get(resource)
    }

    /// Number of resources with outputs
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing has been reported
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

type Eval<T> = dyn Fn(&Outputs) -> Option<T> + Send + Sync;

/// Whether a reported value decodes as the type a read expects
type Check = dyn Fn(&Value) -> bool + Send + Sync;

/// Promise of a `T`, resolved against reported outputs
pub struct Deferred<T> {
    reads: BTreeSet<OutputRef>,
    checks: Vec<(OutputRef, Arc<Check>)>,
    eval: Arc<Eval<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            reads: self.reads.clone(),
            checks: self.checks.clone(),
            eval: Arc::clone(&self.eval),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("reads", &self.reads).finish()
    }
}

impl<T: Send + Sync + 'static> Deferred<T> {
    /// Value that is known at synthesis time
    pub fn known(value: T) -> Self
    where
        T: Clone,
    {
        Self {
            reads: BTreeSet::new(),
            checks: Vec::new(),
            eval: Arc::new(move |_| Some(value.clone())),
        }
    }

    /// Transform the value once it resolves
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let eval = Arc::clone(&self.eval);
        Deferred {
            reads: self.reads.clone(),
            checks: self.checks.clone(),
            eval: Arc::new(move |outputs| eval(outputs).map(&f)),
        }
    }

    /// Like [`map`](Self::map), but stays unresolved when `f` yields `None`
    pub fn and_then<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Send + Sync + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let eval = Arc::clone(&self.eval);
        Deferred {
            reads: self.reads.clone(),
            checks: self.checks.clone(),
            eval: Arc::new(move |outputs| eval(outputs).and_then(&f)),
        }
    }

    /// Combine with another deferred value; resolves when both do
    pub fn zip_with<U, V, F>(&self, other: &Deferred<U>, f: F) -> Deferred<V>
    where
        U: Send + Sync + 'static,
        V: Send + Sync + 'static,
        F: Fn(T, U) -> V + Send + Sync + 'static,
    {
        let left = Arc::clone(&self.eval);
        let right = Arc::clone(&other.eval);
        let mut reads = self.reads.clone();
        reads.extend(other.reads.iter().cloned());
        let mut checks = self.checks.clone();
        checks.extend(other.checks.iter().cloned());

        Deferred {
            reads,
            checks,
            eval: Arc::new(move |outputs| {
                let a = left(outputs)?;
                let b = right(outputs)?;
                Some(f(a, b))
            }),
        }
    }

    /// Collect many deferred values; resolves when every one does
    pub fn all(items: impl IntoIterator<Item = Deferred<T>>) -> Deferred<Vec<T>> {
        let items: Vec<Deferred<T>> = items.into_iter().collect();
        let reads = items
            .iter()
            .flat_map(|item| item.reads.iter().cloned())
            .collect();
        let checks = items.iter().flat_map(|item| item.checks.iter().cloned()).collect();

        Deferred {
            reads,
            checks,
            eval: Arc::new(move |outputs| items.iter().map(|item| (item.eval)(outputs)).collect()),
        }
    }

    /// Resolve against reported outputs. `None` while any read is missing.
    pub fn resolve(&self, outputs: &Outputs) -> Option<T> {
        (self.eval)(outputs)
    }

    /// Every attribute this value reads
    pub fn reads(&self) -> &BTreeSet<OutputRef> {
        &self.reads
    }

    /// Resources this value reads from
    pub fn dependencies(&self) -> BTreeSet<ResourceId> {
        self.reads.iter().map(|r| r.resource.clone()).collect()
    }

    /// Reads not yet present in `outputs`
    pub fn pending<'a>(&'a self, outputs: &'a Outputs) -> impl Iterator<Item = &'a OutputRef> + 'a {
        self.reads.iter().filter(move |r| !outputs.contains(r))
    }

    /// Reads that were reported but do not decode as the expected type
    pub fn malformed<'a>(&'a self, outputs: &'a Outputs) -> impl Iterator<Item = &'a OutputRef> + 'a {
        self.checks
            .iter()
            .filter(move |(read, check)| {
                outputs
                    .get(&read.resource, &read.attribute)
                    .is_some_and(|value| !check(value))
            })
            .map(|(read, _)| read)
    }

    /// Whether the value needs no provisioning to resolve
    pub fn is_known(&self) -> bool {
        self.reads.is_empty()
    }
}

impl<T: DeserializeOwned + Send + Sync + 'static> Deferred<T> {
    /// Attribute of a resource, available after the resource is created
    pub fn output(resource: &ResourceId, attribute: &str) -> Self {
        let key = OutputRef::new(resource.clone(), attribute);
        let lookup = key.clone();
        let check: Arc<Check> = Arc::new(|value| T::deserialize(value).is_ok());

        Self {
            reads: BTreeSet::from([key.clone()]),
            checks: vec![(key, check)],
            eval: Arc::new(move |outputs| {
                outputs
                    .get(&lookup.resource, &lookup.attribute)
                    .and_then(|value| serde_json::from_value(value.clone()).ok())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn fw() -> ResourceId {
        ResourceId::new("fw-rabbitmq1")
    }

    #[test]
    fn test_known_resolves_without_outputs() {
        let value = Deferred::known(5u32);
        assert!(value.is_known());
        assert_eq!(value.resolve(&Outputs::new()), Some(5));
    }

    #[test]
    fn test_output_waits_for_resource() {
        let ip: Deferred<Ipv4Addr> = Deferred::output(&fw(), "private_ip_address");
        let mut outputs = Outputs::new();
        assert_eq!(ip.resolve(&outputs), None);
        assert_eq!(ip.pending(&outputs).count(), 1);

        outputs.record(&fw(), "private_ip_address", "10.2.0.4");
        assert_eq!(ip.resolve(&outputs), Some(Ipv4Addr::new(10, 2, 0, 4)));
        assert_eq!(ip.pending(&outputs).count(), 0);
    }

    #[test]
    fn test_and_then_stays_unresolved_on_none() {
        let port: Deferred<u16> = Deferred::output(&fw(), "port");
        let even = port.and_then(|p| (p % 2 == 0).then_some(p));
        assert_eq!(even.reads().len(), 1);

        let mut outputs = Outputs::new();
        outputs.record(&fw(), "port", 5671);
        assert_eq!(even.resolve(&outputs), None);
        assert_eq!(even.pending(&outputs).count(), 0);

        outputs.record(&fw(), "port", 5672);
        assert_eq!(even.resolve(&outputs), Some(5672));
    }

    #[test]
    fn test_malformed_names_the_bad_read() {
        let name: Deferred<String> = Deferred::output(&ResourceId::new("rg"), "name");
        let ip: Deferred<Ipv4Addr> = Deferred::output(&fw(), "private_ip_address");
        let joined = name.zip_with(&ip, |name, ip| format!("{name}/{ip}"));

        let mut outputs = Outputs::new();
        outputs.record(&ResourceId::new("rg"), "name", "rg-real");
        assert_eq!(joined.malformed(&outputs).count(), 0);

        outputs.record(&fw(), "private_ip_address", "garbage");
        assert_eq!(joined.resolve(&outputs), None);
        assert_eq!(joined.pending(&outputs).count(), 0);
        let bad: Vec<_> = joined.malformed(&outputs).collect();
        assert_eq!(bad, vec![&OutputRef::new(fw(), "private_ip_address")]);
    }

    #[test]
    fn test_combinators_merge_reads() {
        let a: Deferred<String> = Deferred::output(&ResourceId::new("a"), "name");
        let b: Deferred<String> = Deferred::output(&ResourceId::new("b"), "name");
        let joined = a.zip_with(&b, |a, b| format!("{a}-{b}")).map(|s| s.to_uppercase());

        let deps: Vec<_> = joined.dependencies().into_iter().collect();
        assert_eq!(deps, vec![ResourceId::new("a"), ResourceId::new("b")]);

        let mut outputs = Outputs::new();
        outputs.record(&ResourceId::new("a"), "name", "left");
        assert_eq!(joined.resolve(&outputs), None);

        outputs.record(&ResourceId::new("b"), "name", "right");
        assert_eq!(joined.resolve(&outputs).as_deref(), Some("LEFT-RIGHT"));
    }

    #[test]
    fn test_all_preserves_order() {
        let items: Vec<Deferred<u8>> = (0..3)
            .map(|i| Deferred::output(&ResourceId::new(format!("r{i}")), "n"))
            .collect();
        let collected = Deferred::all(items);
        assert_eq!(collected.reads().len(), 3);

        let mut outputs = Outputs::new();
        for (i, n) in [7u8, 8, 9].iter().enumerate() {
            outputs.record(&ResourceId::new(format!("r{i}")), "n", *n);
        }
        assert_eq!(collected.resolve(&outputs), Some(vec![7, 8, 9]));
    }

    #[test]
    fn test_wrong_type_does_not_resolve() {
        let ip: Deferred<Ipv4Addr> = Deferred::output(&fw(), "private_ip_address");
        let mut outputs = Outputs::new();
        outputs.record(&fw(), "private_ip_address", "not-an-ip");
        assert_eq!(ip.resolve(&outputs), None);
    }
}
