//! Simulate command

use crate::output::{self, OutputFormat};
use colored::Colorize;
use mqmesh_topology::{provision, ClusterConfig, LocalProvisioner};
use serde::Serialize;
use std::sync::Arc;
use tabled::Tabled;

#[derive(Debug, Serialize, Tabled)]
struct NodeRow {
    #[tabled(rename = "Region")]
    ordinal: usize,
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Broker IP")]
    broker: String,
    #[tabled(rename = "Firewall IP")]
    firewall: String,
    #[tabled(rename = "Public IP")]
    public: String,
}

#[derive(Debug, Serialize)]
struct Summary {
    run_id: String,
    seed: u64,
    created: usize,
    layers: usize,
    cookie: String,
    nodes: Vec<NodeRow>,
}

pub async fn handle(
    config: &ClusterConfig,
    seed: Option<u64>,
    fail_on: Vec<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let seed = seed.unwrap_or_else(rand::random);
    let provisioner = fail_on
        .into_iter()
        .fold(LocalProvisioner::new(seed), |p, id| p.fail_on(id));

    let (synthesis, outputs) = provision(config, Arc::new(provisioner)).await?;
    let report = &outputs.report;
    let unresolved = || "-".to_string();

    let nodes = synthesis
        .regions
        .iter()
        .map(|r| NodeRow {
            ordinal: r.ordinal().get(),
            location: r.region.location.clone(),
            node: format!("{}{}", config.deployment_name, r.ordinal()),
            broker: report
                .resolve(&r.workload.address)
                .map_or_else(unresolved, |a| a.to_string()),
            firewall: report
                .resolve(&r.firewall.private_address)
                .map_or_else(unresolved, |a| a.to_string()),
            public: report
                .resolve(&r.firewall.public_address)
                .map_or_else(unresolved, |a| a.to_string()),
        })
        .collect();

    let summary = Summary {
        run_id: report.run_id.to_string(),
        seed,
        created: report.created.len(),
        layers: report.layers,
        cookie: outputs.cookie.clone(),
        nodes,
    };

    if format.print_structured(&summary)? {
        return Ok(());
    }

    println!(
        "{} created {} resources in {} layers (run {}, seed {})",
        "✓".green().bold(),
        summary.created,
        summary.layers,
        summary.run_id,
        summary.seed
    );
    println!("{}", output::table(&summary.nodes));
    println!("cookie: {}", summary.cookie.bold());
    Ok(())
}
