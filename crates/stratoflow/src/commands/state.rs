use crate::project::Project;
use colored::Colorize;
use stratoflow_engine::{ResourceAddress, StateStore, attributes_to_json};

pub async fn handle_list(project: &Project) -> anyhow::Result<()> {
    let states = project.store().list().await?;
    if states.is_empty() {
        println!("{}", "No managed resources".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<40} {:<24} {:<12} {:<20}",
            "ADDRESS", "ID", "LIFECYCLE", "UPDATED"
        )
        .bold()
    );
    println!("{}", "─".repeat(96).dimmed());
    for (address, state) in states {
        println!(
            "{:<40} {:<24} {:<12} {:<20}",
            address.to_string(),
            state.id,
            state.lifecycle.to_string(),
            state.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn handle_show(project: &Project, address: &str) -> anyhow::Result<()> {
    let address: ResourceAddress = address.parse()?;
    let Some(state) = project.store().load(&address).await? else {
        anyhow::bail!("{} is not in the state", address);
    };

    let attributes = match project.definition(&state.resource_type) {
        Ok(definition) => attributes_to_json(&state.attributes, &definition.schema),
        Err(_) => serde_json::to_value(&state.attributes)?,
    };
    let view = serde_json::json!({
        "address": address.to_string(),
        "id": state.id,
        "type": state.resource_type,
        "lifecycle": state.lifecycle,
        "owner": state.owner,
        "created_at": state.created_at,
        "updated_at": state.updated_at,
        "attributes": attributes,
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
