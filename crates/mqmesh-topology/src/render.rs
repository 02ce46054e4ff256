//! Plan rendering
//!
//! A plan is the synthesized graph laid out by layer. It renders as a JSON
//! document (for tooling) or as text through a handlebars template (for
//! operators). When outputs from an apply are supplied, properties are shown
//! resolved; otherwise pending values appear as `${resource.attribute}`.

use crate::deferred::Outputs;
use crate::graph::ResourceKind;
use crate::stack::Synthesis;
use handlebars::Handlebars;
use mqmesh_common::ResourceId;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] handlebars::TemplateError),

    #[error("render error: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error(transparent)]
    Topology(#[from] mqmesh_common::TopologyError),
}

/// One region's address plan
#[derive(Debug, Clone, Serialize)]
pub struct RegionSummary {
    pub ordinal: usize,
    pub location: String,
    pub resource_group: ResourceId,
    pub internal: String,
    pub external: String,
}

/// One resource in the plan
#[derive(Debug, Clone, Serialize)]
pub struct PlannedResource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub type_token: &'static str,
    pub depends_on: Vec<ResourceId>,
    /// Outputs still to be reported before the resource can be created
    pub awaiting: Vec<String>,
    pub properties: Map<String, Value>,
}

/// Resources created together
#[derive(Debug, Clone, Serialize)]
pub struct PlanLayer {
    pub index: usize,
    pub resources: Vec<PlannedResource>,
}

/// The full plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanDocument {
    pub deployment: String,
    pub resource_count: usize,
    pub layer_count: usize,
    pub regions: Vec<RegionSummary>,
    pub kinds: Vec<(ResourceKind, usize)>,
    pub layers: Vec<PlanLayer>,
}

const TEXT_TEMPLATE: &str = "\
Plan: {{deployment}} ({{resource_count}} resources in {{layer_count}} layers)

Regions:
{{#each regions}}
  {{ordinal}}. {{location}}  internal {{internal}}  external {{external}}  [{{resource_group}}]
{{/each}}

{{#each layers}}
Layer {{index}}:
{{#each resources}}
  + {{id}} ({{kind}}){{#if awaiting}} <- {{#each awaiting}}{{#unless @first}}, {{/unless}}{{this}}{{/each}}{{/if}}
{{/each}}
{{/each}}";

/// Renders synthesized graphs
pub struct PlanRenderer {
    handlebars: Handlebars<'static>,
}

impl PlanRenderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut hb = Handlebars::new();
        hb.register_escape_fn(handlebars::no_escape);
        hb.set_strict_mode(true);
        hb.register_template_string("plan", TEXT_TEMPLATE)?;
        Ok(Self { handlebars: hb })
    }

    /// Lay the graph out by layer; resolve properties against `outputs` when given
    pub fn document(&self, synthesis: &Synthesis, outputs: Option<&Outputs>) -> Result<PlanDocument, RenderError> {
        let graph = &synthesis.graph;
        let empty = Outputs::new();
        let outputs = outputs.unwrap_or(&empty);

        let mut layers = Vec::new();
        for (index, ids) in graph.layers()?.into_iter().enumerate() {
            let resources = ids
                .iter()
                .filter_map(|id| graph.get(id))
                .map(|resource| {
                    let properties = match resource.properties.resolve(outputs) {
                        Some(Value::Object(resolved)) => resolved,
                        _ => resource.preview.clone(),
                    };
                    PlannedResource {
                        id: resource.id.clone(),
                        kind: resource.kind,
                        type_token: resource.kind.type_token(),
                        depends_on: resource.dependencies().into_iter().collect(),
                        awaiting: resource.properties.pending(outputs).map(ToString::to_string).collect(),
                        properties,
                    }
                })
                .collect();
            layers.push(PlanLayer { index, resources });
        }

        let regions = synthesis
            .regions
            .iter()
            .map(|r| RegionSummary {
                ordinal: r.ordinal().get(),
                location: r.region.location.clone(),
                resource_group: r.resource_group.clone(),
                internal: r.blocks.internal.to_string(),
                external: r.blocks.external.to_string(),
            })
            .collect();

        Ok(PlanDocument {
            deployment: synthesis.config.deployment_name.clone(),
            resource_count: graph.len(),
            layer_count: layers.len(),
            regions,
            kinds: graph.kind_counts().into_iter().collect(),
            layers,
        })
    }

    pub fn render_json(&self, document: &PlanDocument) -> Result<String, RenderError> {
        serde_json::to_string_pretty(document)
            .map_err(|e| RenderError::Topology(e.into()))
    }

    pub fn render_text(&self, document: &PlanDocument) -> Result<String, RenderError> {
        Ok(self.handlebars.render("plan", document)?)
    }

    /// Render an arbitrary template against the plan
    pub fn render_template(&self, template: &str, document: &PlanDocument) -> Result<String, RenderError> {
        Ok(self.handlebars.render_template(template, document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::stack::synthesize;

    #[test]
    fn test_document_layers() {
        let synthesis = synthesize(&ClusterConfig::default()).unwrap();
        let renderer = PlanRenderer::new().unwrap();
        let document = renderer.document(&synthesis, None).unwrap();

        assert_eq!(document.resource_count, synthesis.graph.len());
        let total: usize = document.layers.iter().map(|l| l.resources.len()).sum();
        assert_eq!(total, synthesis.graph.len());

        let first = &document.layers[0];
        assert!(first.resources.iter().all(|r| r.awaiting.is_empty()));
        assert!(first.resources.iter().any(|r| r.id.as_str() == "rabbit-cookie"));

        assert_eq!(document.regions[2].internal, "10.5.0.0/16");
        assert!(document.kinds.contains(&(ResourceKind::VirtualNetworkPeering, 12)));
    }

    #[test]
    fn test_pending_values_previewed() {
        let synthesis = synthesize(&ClusterConfig::default()).unwrap();
        let document = PlanRenderer::new().unwrap().document(&synthesis, None).unwrap();

        let firewall = document
            .layers
            .iter()
            .flat_map(|l| &l.resources)
            .find(|r| r.id.as_str() == "fw-rabbitmq1")
            .unwrap();
        assert_eq!(firewall.properties["resourceGroupName"], "${rg-rabbitmq-centralus.name}");
        assert_eq!(firewall.properties["location"], "centralus");
        assert!(firewall.awaiting.contains(&"ip-fw-rabbitmq1.id".to_string()));
    }

    #[test]
    fn test_text_plan() {
        let synthesis = synthesize(&ClusterConfig::default().with_regions(["uksouth", "ukwest"])).unwrap();
        let renderer = PlanRenderer::new().unwrap();
        let document = renderer.document(&synthesis, None).unwrap();
        let text = renderer.render_text(&document).unwrap();

        assert!(text.starts_with("Plan: rabbitmq ("));
        assert!(text.contains("1. uksouth  internal 10.1.0.0/16  external 10.2.0.0/16"));
        assert!(text.contains("Layer 0:"));
        assert!(text.contains("+ peer-vnet1-vnet2 (VirtualNetworkPeering)"));

        let json = renderer.render_json(&document).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["deployment"], "rabbitmq");
    }

    #[test]
    fn test_custom_template() {
        let synthesis = synthesize(&ClusterConfig::default()).unwrap();
        let renderer = PlanRenderer::new().unwrap();
        let document = renderer.document(&synthesis, None).unwrap();

        let out = renderer
            .render_template("{{#each regions}}{{location}};{{/each}}", &document)
            .unwrap();
        assert_eq!(out, "centralus;eastus;westus;");
    }
}
