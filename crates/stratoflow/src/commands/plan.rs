use crate::project::Project;
use colored::Colorize;
use stratoflow_engine::{Action, ActionType, Plan, Value};

pub async fn handle(project: &Project, target: Option<&str>) -> anyhow::Result<()> {
    println!("{}", "Refreshing state...".blue());
    let orchestrator = project.orchestrator()?;

    let mut actions = Vec::new();
    for declared in project.declared(target)? {
        let action = orchestrator
            .plan(&declared.definition, &declared.address, Some(&declared.desired))
            .await?;
        actions.push(action);
    }
    if target.is_none() {
        for (address, definition) in super::undeclared(project).await? {
            actions.push(orchestrator.plan(&definition, &address, None).await?);
        }
    }

    let plan = Plan::new(actions);
    println!();
    for action in &plan.actions {
        print_action(action);
    }
    println!();

    if plan.has_changes {
        println!("{} {}", "Plan:".bold(), plan.summary());
    } else {
        println!("{}", "No changes. Remote resources match the configuration.".green());
    }
    Ok(())
}

fn show(value: &Option<Value>) -> String {
    value
        .as_ref()
        .map_or_else(|| "(unset)".to_string(), Value::to_string)
}

pub fn print_action(action: &Action) {
    let line = action.description();
    match action.action_type {
        ActionType::Create => println!("  {} {}", "+".green(), line.green()),
        ActionType::Update => println!("  {} {}", "~".yellow(), line.yellow()),
        ActionType::Replace => println!("  {} {}", "-/+".magenta(), line.magenta()),
        ActionType::Delete => println!("  {} {}", "-".red(), line.red()),
        ActionType::NoOp => println!("    {}", line.dimmed()),
    }

    if action.action_type != ActionType::Create {
        for change in &action.changes.changes {
            let note = if change.requires_replace {
                " (forces replacement)".red().to_string()
            } else {
                String::new()
            };
            println!(
                "      {}: {} → {}{}",
                change.path,
                show(&change.old),
                show(&change.new),
                note
            );
        }
    }

    for warning in &action.warnings {
        println!("      {} {}", "⚠".yellow(), warning.yellow());
    }
}
