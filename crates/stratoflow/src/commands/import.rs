use crate::project::Project;
use anyhow::Context;
use colored::Colorize;
use stratoflow_engine::{ResourceAddress, StateLock};

pub async fn handle(project: &Project, address: &str, remote_id: &str) -> anyhow::Result<()> {
    let address: ResourceAddress = address.parse()?;
    let definition = project.definition(&address.resource_type)?;

    let lock = StateLock::acquire(&project.state_dir)
        .await
        .context("another strato run holds the state lock")?;
    let orchestrator = project.orchestrator()?;
    let cancel = super::cancel_on_ctrl_c();

    let state = orchestrator
        .import(&definition, &address, remote_id, &cancel)
        .await?;
    lock.release().await?;

    println!(
        "{} {} as {}",
        "✓ Imported".green(),
        state.id.cyan(),
        address.to_string().bold()
    );
    if project.config.resource(&address.to_string()).is_none() {
        println!(
            "{}",
            format!(
                "  {} is not declared in {}; the next apply will destroy it",
                address,
                project.config_path.display()
            )
            .yellow()
        );
    }
    Ok(())
}
