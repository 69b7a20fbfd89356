use crate::catalog;
use colored::Colorize;
use stratoflow_engine::{DeleteWait, ResourceDefinition};

pub fn handle(type_name: Option<&str>) -> anyhow::Result<()> {
    let definitions = catalog::builtin()?;
    let selected: Vec<&ResourceDefinition> = definitions
        .iter()
        .filter(|d| type_name.is_none_or(|t| d.type_name() == t))
        .collect();

    if selected.is_empty() {
        anyhow::bail!("unknown resource type '{}'", type_name.unwrap_or_default());
    }

    for definition in selected {
        print_definition(definition);
        println!();
    }
    Ok(())
}

fn print_definition(definition: &ResourceDefinition) {
    println!("{}", definition.type_name().bold().cyan());
    println!("  create: {}", definition.create);
    println!("  read:   {}", definition.read);
    for update in &definition.updates {
        println!("  update: {} ({})", update.action, update.group);
    }
    let delete: Vec<String> = definition
        .delete
        .iter()
        .map(|step| match &step.wait {
            DeleteWait::Status(wait) => format!("{} → {}", step.action, wait.target.join("|")),
            DeleteWait::Absent => step.action.clone(),
        })
        .collect();
    println!("  delete: {}", delete.join(", "));

    println!();
    println!(
        "  {}",
        format!("{:<18} {:<28} {:<18} {}", "ATTRIBUTE", "KIND", "MUTABILITY", "NOTES").bold()
    );
    for (name, attr) in definition.schema.iter() {
        let mut notes = Vec::new();
        if attr.force_replace {
            notes.push("forces replacement".to_string());
        }
        if let Some(default) = &attr.default {
            notes.push(format!("default {}", default));
        }
        if attr.is_settable() && attr.group_name() != stratoflow_engine::schema::DEFAULT_UPDATE_GROUP {
            notes.push(format!("group {}", attr.group_name()));
        }
        if attr.sensitive {
            notes.push("sensitive".to_string());
        }
        println!(
            "  {:<18} {:<28} {:<18} {}",
            name,
            attr.kind.to_string(),
            attr.mutability.to_string(),
            notes.join(", ").dimmed()
        );
    }
}
