use anyhow::{bail, Result};

use hostforge::deploy::Orchestrator;
use hostforge::store::Store;

use crate::output;

pub async fn check(orchestrator: &Orchestrator, host: Option<&str>) -> Result<()> {
    output::header("Host reachability");
    let spinner = output::create_spinner("Connecting...");
    let results = orchestrator.check_hosts(host).await;
    spinner.finish_and_clear();
    orchestrator.manager().close_all().await;

    let results = results?;
    let unreachable = results.iter().filter(|(_, ok)| !ok).count();
    for (id, reachable) in &results {
        if *reachable {
            output::success(id);
        } else {
            output::error(&format!("{} is unreachable", id));
        }
    }

    if unreachable > 0 {
        bail!("{} of {} host(s) unreachable", unreachable, results.len());
    }
    Ok(())
}

pub fn list(store: &dyn Store) -> Result<()> {
    for host in store.hosts()? {
        output::header(&host.id);
        output::field("address", &format!("{}@{}", host.user, host.address()));
        output::field(
            "topology",
            host.topology.map(|t| t.as_str()).unwrap_or("detect"),
        );
        let active = host
            .active_credential()
            .map(|c| c.id.as_str())
            .unwrap_or("none");
        output::field("credential", active);
    }
    Ok(())
}

pub async fn activate(orchestrator: &Orchestrator, host: &str, credential: &str) -> Result<()> {
    let previous = orchestrator.activate_credential(host, credential).await?;
    match previous {
        Some(previous) if previous != credential => output::success(&format!(
            "{}: switched from {} to {}",
            host, previous, credential
        )),
        Some(_) => output::info(&format!("{}: {} was already active", host, credential)),
        None => output::success(&format!("{}: activated {}", host, credential)),
    }
    Ok(())
}
