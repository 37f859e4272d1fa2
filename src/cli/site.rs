use anyhow::{bail, Result};
use dialoguer::Confirm;

use hostforge::deploy::{Orchestrator, Report};
use hostforge::strategy::SiteState;

use crate::output;

#[derive(Clone, Copy)]
pub enum Lifecycle {
    Deploy,
    Update,
    Restart,
    Delete,
}

impl Lifecycle {
    fn progress(self) -> &'static str {
        match self {
            Lifecycle::Deploy => "Provisioning",
            Lifecycle::Update => "Updating",
            Lifecycle::Restart => "Restarting",
            Lifecycle::Delete => "Deleting",
        }
    }
}

pub async fn run(orchestrator: &Orchestrator, domain: &str, op: Lifecycle) -> Result<()> {
    output::header(&format!("{} {}", op.progress(), domain));

    // Only the entries this run appends are shown.
    let before = orchestrator
        .record(domain)
        .await?
        .map(|r| r.appended)
        .unwrap_or(0);

    let spinner = output::create_spinner(&format!("{} {}...", op.progress(), domain));
    let result = match op {
        Lifecycle::Deploy => orchestrator.deploy(domain).await,
        Lifecycle::Update => orchestrator.update(domain).await,
        Lifecycle::Restart => orchestrator.restart(domain).await,
        Lifecycle::Delete => orchestrator.delete(domain).await,
    };
    spinner.finish_and_clear();
    orchestrator.manager().close_all().await;
    let report = result?;

    if let Some(record) = orchestrator.record(domain).await? {
        let lines: Vec<&str> = record
            .entries_since(before)
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        output::log_lines(&lines);
    }

    finish(report)
}

fn finish(report: Report) -> Result<()> {
    println!();
    if report.success {
        output::success(&report.message);
        Ok(())
    } else {
        output::error(&report.message);
        bail!("operation did not complete");
    }
}

pub async fn delete(orchestrator: &Orchestrator, domain: &str, yes: bool) -> Result<()> {
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete {} and all of its data? This cannot be undone",
                domain
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            output::info("Aborted");
            return Ok(());
        }
    }
    run(orchestrator, domain, Lifecycle::Delete).await
}

pub async fn status(orchestrator: &Orchestrator, domain: &str) -> Result<()> {
    let report = orchestrator.status(domain).await;
    orchestrator.manager().close_all().await;
    let report = report?;

    output::header(domain);
    let state = match report.state {
        SiteState::Running => console::style(report.state.to_string()).green(),
        SiteState::Degraded => console::style(report.state.to_string()).yellow(),
        SiteState::Stopped | SiteState::Unknown => console::style(report.state.to_string()).red(),
    };
    output::field("state", &state.to_string());
    output::field("detail", &report.detail);

    if let Some(record) = orchestrator.record(domain).await? {
        output::field("lifecycle", record.state.as_str());
        if let Some(topology) = record.topology {
            output::field("topology", topology.as_str());
        }
    }
    Ok(())
}
