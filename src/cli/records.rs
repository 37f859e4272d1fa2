use anyhow::{bail, Context, Result};
use dialoguer::Confirm;

use hostforge::deploy::Orchestrator;
use hostforge::store::Store;

use crate::output;

pub fn show(store: &dyn Store, domain: &str, lines: usize, json: bool) -> Result<()> {
    let record = store
        .record(domain)?
        .with_context(|| format!("No deployment record for {}", domain))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    output::header(&record.domain);
    output::field("state", record.state.as_str());
    output::field(
        "topology",
        record.topology.map(|t| t.as_str()).unwrap_or("-"),
    );
    output::field("created", &record.created_at.to_rfc3339());
    output::field("updated", &record.updated_at.to_rfc3339());
    if let Some(error) = &record.last_error {
        output::field("last error", error);
    }

    let handles = &record.handles;
    for (key, value) in [
        ("namespace", handles.namespace.as_deref()),
        ("deployment", handles.deployment.as_deref()),
        ("project", handles.compose_project.as_deref()),
        ("network", handles.network.as_deref()),
        ("vhost", handles.vhost_path.as_deref()),
        ("docroot", handles.document_root.as_deref()),
    ] {
        if let Some(value) = value {
            output::field(key, value);
        }
    }
    if !handles.containers.is_empty() {
        output::field("containers", &handles.containers.join(", "));
    }

    println!();
    let start = record.log.len().saturating_sub(lines);
    for entry in &record.log[start..] {
        println!(
            "  {} {}",
            console::style(entry.at.format("%Y-%m-%d %H:%M:%S")).dim(),
            entry.message
        );
    }
    Ok(())
}

pub async fn reset(orchestrator: &Orchestrator, domain: &str, yes: bool) -> Result<()> {
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Mark {} as failed? Only do this if no other hostforge run is working on it",
                domain
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            output::info("Aborted");
            return Ok(());
        }
    }

    let report = orchestrator.reset(domain).await?;
    if report.success {
        output::success(&report.message);
        Ok(())
    } else {
        output::error(&report.message);
        bail!("record was not reset");
    }
}
