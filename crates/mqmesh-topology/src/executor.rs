//! Graph execution
//!
//! The [`Provisioner`] trait is the seam to whatever actually creates cloud
//! resources. [`GraphExecutor`] walks the graph in topological layers: every
//! resource of a layer is created concurrently, and a resource's properties are
//! only resolved once every resource it reads has reported its outputs.
//!
//! A failure anywhere aborts the run. Creations still in flight in the same
//! layer are cancelled and no further layer starts. There are no retries.

use crate::deferred::{Deferred, Outputs, ResourceOutputs};
use crate::graph::{Resource, ResourceGraph, ResourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mqmesh_common::{ResourceId, TopologyError, TopologyResult};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One create operation handed to the collaborator
#[derive(Debug, Clone, Serialize)]
pub struct CreateRequest {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub type_token: &'static str,
    /// Fully resolved properties
    pub properties: Value,
    /// Resources that were created before this one
    pub depends_on: Vec<ResourceId>,
}

/// Creates resources and reports their outputs
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create one resource. The returned map must contain every attribute the
    /// resource's kind reports.
    async fn create(&self, request: CreateRequest) -> anyhow::Result<ResourceOutputs>;
}

/// Record of one created resource
#[derive(Debug, Clone, Serialize)]
pub struct CreatedResource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub layer: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Result of a successful apply
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub layers: usize,
    pub created: Vec<CreatedResource>,
    pub outputs: Outputs,
}

impl ApplyReport {
    /// Resolve a deferred value against everything that was created
    pub fn resolve<T: Send + Sync + 'static>(&self, value: &Deferred<T>) -> Option<T> {
        value.resolve(&self.outputs)
    }

    /// One reported attribute
    pub fn output(&self, resource: &ResourceId, attribute: &str) -> Option<&Value> {
        self.outputs.get(resource, attribute)
    }
}

/// Walks a graph layer by layer through a [`Provisioner`]
pub struct GraphExecutor {
    provisioner: Arc<dyn Provisioner>,
}

type Completion = (ResourceId, ResourceKind, DateTime<Utc>, anyhow::Result<ResourceOutputs>);

impl GraphExecutor {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner }
    }

    /// Create every resource in `graph`
    pub async fn apply(&self, graph: &ResourceGraph) -> TopologyResult<ApplyReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let layers = graph.layers()?;
        let mut outputs = Outputs::new();
        let mut created = Vec::with_capacity(graph.len());

        info!(%run_id, resources = graph.len(), layers = layers.len(), "apply started");

        for (index, layer) in layers.iter().enumerate() {
            let mut tasks: JoinSet<Completion> = JoinSet::new();

            for id in layer {
                let resource = graph
                    .get(id)
                    .ok_or_else(|| TopologyError::invariant(format!("layer lists undeclared resource {id}")))?;
                let request = match prepare(resource, &outputs) {
                    Ok(request) => request,
                    Err(e) => {
                        tasks.shutdown().await;
                        return Err(e);
                    }
                };

                let provisioner = Arc::clone(&self.provisioner);
                tasks.spawn(async move {
                    let started = Utc::now();
                    let (id, kind) = (request.id.clone(), request.kind);
                    let result = provisioner.create(request).await;
                    (id, kind, started, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let failure = match joined {
                    Ok((id, kind, started, Ok(reported))) => {
                        debug!(resource = %id, ?kind, layer = index, "resource created");
                        outputs.insert(id.clone(), reported);
                        created.push(CreatedResource {
                            id,
                            kind,
                            layer: index,
                            started_at: started,
                            completed_at: Utc::now(),
                        });
                        continue;
                    }
                    Ok((id, _, _, Err(e))) => TopologyError::Provisioning {
                        resource: id.to_string(),
                        message: format!("{e:#}"),
                    },
                    Err(e) => TopologyError::Provisioning {
                        resource: format!("layer {index}"),
                        message: e.to_string(),
                    },
                };

                warn!(%run_id, layer = index, error = %failure, "apply aborted");
                tasks.shutdown().await;
                return Err(failure);
            }

            debug!(layer = index, size = layer.len(), "layer complete");
        }

        let report = ApplyReport {
            run_id,
            started_at,
            completed_at: Utc::now(),
            layers: layers.len(),
            created,
            outputs,
        };
        info!(%run_id, created = report.created.len(), "apply complete");
        Ok(report)
    }
}

/// Resolve a resource's properties into a create request
fn prepare(resource: &Resource, outputs: &Outputs) -> TopologyResult<CreateRequest> {
    let properties = resource
        .properties
        .resolve(outputs)
        .ok_or_else(|| unresolved(resource, outputs))?;

    Ok(CreateRequest {
        id: resource.id.clone(),
        kind: resource.kind,
        type_token: resource.kind.type_token(),
        properties,
        depends_on: resource.dependencies().into_iter().collect(),
    })
}

/// Why a resource's properties did not resolve
fn unresolved(resource: &Resource, outputs: &Outputs) -> TopologyError {
    if let Some(read) = resource.properties.pending(outputs).next() {
        return TopologyError::MissingOutput {
            resource: read.resource.to_string(),
            attribute: read.attribute.clone(),
        };
    }
    if let Some(read) = resource.properties.malformed(outputs).next() {
        return TopologyError::MalformedOutput {
            resource: read.resource.to_string(),
            attribute: read.attribute.clone(),
        };
    }
    TopologyError::invariant(format!("{} has unresolvable properties", resource.id))
}
