//! Plan command

use crate::output::{self, OutputFormat};
use anyhow::Context;
use mqmesh_topology::{synthesize, ClusterConfig, PlanRenderer};
use std::path::Path;
use tabled::Tabled;

#[derive(Tabled)]
struct KindRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Count")]
    count: usize,
}

pub fn handle(config: &ClusterConfig, template: Option<&Path>, format: OutputFormat) -> anyhow::Result<()> {
    let synthesis = synthesize(config)?;
    let renderer = PlanRenderer::new()?;
    let document = renderer.document(&synthesis, None)?;

    if let Some(path) = template {
        let template = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        print!("{}", renderer.render_template(&template, &document)?);
        return Ok(());
    }

    if format.print_structured(&document)? {
        return Ok(());
    }

    println!("{}", renderer.render_text(&document)?);
    let rows = document.kinds.iter().map(|(kind, count)| KindRow {
        kind: format!("{kind:?}"),
        count: *count,
    });
    println!("{}", output::table(rows));
    Ok(())
}
