pub mod apply;
pub mod catalog;
pub mod import;
pub mod plan;
pub mod state;

use crate::project::Project;
use colored::Colorize;
use std::collections::HashSet;
use std::sync::Arc;
use stratoflow_engine::{ResourceAddress, ResourceDefinition, StateStore};
use tokio_util::sync::CancellationToken;

/// Token cancelled on the first Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                "Interrupted: stopping after the calls in flight...".yellow()
            );
            child.cancel();
        }
    });
    token
}

/// Managed resources that are no longer declared in the config
pub async fn undeclared(
    project: &Project,
) -> anyhow::Result<Vec<(ResourceAddress, Arc<ResourceDefinition>)>> {
    let declared: HashSet<String> = project
        .config
        .resources
        .iter()
        .map(|r| r.address())
        .collect();

    let mut out = Vec::new();
    for (address, _) in project.store().list().await? {
        if declared.contains(&address.to_string()) {
            continue;
        }
        let definition = project.definition(&address.resource_type)?;
        out.push((address, definition));
    }
    Ok(out)
}
