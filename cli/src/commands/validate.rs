//! Validate command

use crate::output::OutputFormat;
use colored::Colorize;
use mqmesh_topology::{synthesize, ClusterConfig};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Validation {
    valid: bool,
    regions: usize,
    resources: usize,
    layers: usize,
    blocks: Vec<String>,
}

pub fn handle(config: &ClusterConfig, format: OutputFormat) -> anyhow::Result<()> {
    config.validate()?;
    let synthesis = synthesize(config)?;

    let validation = Validation {
        valid: true,
        regions: synthesis.regions.len(),
        resources: synthesis.graph.len(),
        layers: synthesis.graph.layers()?.len(),
        blocks: synthesis.blocks().iter().map(ToString::to_string).collect(),
    };

    if format.print_structured(&validation)? {
        return Ok(());
    }

    println!(
        "{} {} regions, {} resources, {} layers",
        "✓ valid:".green().bold(),
        validation.regions,
        validation.resources,
        validation.layers
    );
    for region in &synthesis.regions {
        println!(
            "  {}. {:<16} {} / {}",
            region.ordinal(),
            region.region.location,
            region.blocks.internal,
            region.blocks.external
        );
    }
    Ok(())
}
