use crate::project::Project;
use anyhow::Context;
use colored::Colorize;
use futures_util::StreamExt;
use futures_util::stream;
use std::sync::Arc;
use std::time::Instant;
use stratoflow_engine::{
    ActionType, ApplyResult, DesiredConfig, ReconcileOutcome, ResourceAddress,
    ResourceDefinition, StateLock,
};

struct Work {
    address: ResourceAddress,
    definition: Arc<ResourceDefinition>,
    desired: Option<DesiredConfig>,
}

/// `apply` (destroy = false) or `destroy` (destroy = true)
pub async fn handle(project: &Project, target: Option<&str>, destroy: bool) -> anyhow::Result<()> {
    let lock = StateLock::acquire(&project.state_dir)
        .await
        .context("another strato run holds the state lock")?;
    let orchestrator = project.orchestrator()?;

    let mut work: Vec<Work> = project
        .declared(target)?
        .into_iter()
        .map(|d| Work {
            address: d.address,
            definition: d.definition,
            desired: (!destroy).then_some(d.desired),
        })
        .collect();
    if target.is_none() {
        for (address, definition) in super::undeclared(project).await? {
            work.push(Work {
                address,
                definition,
                desired: None,
            });
        }
    }

    let verb = if destroy { "Destroying" } else { "Applying" };
    println!(
        "{} {} resource(s) ({} at a time)",
        verb.blue(),
        work.len(),
        project.config.concurrency
    );

    let cancel = super::cancel_on_ctrl_c();
    let start = Instant::now();

    let outcomes: Vec<_> = stream::iter(work)
        .map(|item| {
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            async move {
                let result = orchestrator
                    .reconcile(
                        &item.definition,
                        &item.address,
                        item.desired.as_ref(),
                        &cancel,
                    )
                    .await;
                (item.address, result)
            }
        })
        .buffer_unordered(project.config.concurrency)
        .collect()
        .await;

    let mut result = ApplyResult::new();
    for (address, outcome) in outcomes {
        match outcome {
            Ok(outcome) => {
                print_outcome(&outcome);
                result.add_success(&address, summarize(&outcome));
            }
            Err(e) => {
                println!("  {} {}: {}", "✗".red(), address, e.to_string().red());
                result.add_failure(&address, e.to_string());
            }
        }
    }
    result.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    lock.release().await?;

    println!();
    if result.is_success() {
        println!(
            "{} {} resource(s) in {}ms",
            "✓ Done:".green().bold(),
            result.succeeded.len(),
            result.duration_ms
        );
        Ok(())
    } else {
        anyhow::bail!(
            "{} of {} resource(s) failed",
            result.failed.len(),
            result.failed.len() + result.succeeded.len()
        )
    }
}

fn summarize(outcome: &ReconcileOutcome) -> String {
    let id = outcome
        .observed
        .as_ref()
        .map(|s| s.id.as_str())
        .unwrap_or("-");
    format!(
        "{} ({}, {} call(s), {}ms)",
        outcome.action,
        id,
        outcome.calls.len(),
        outcome.duration_ms
    )
}

fn print_outcome(outcome: &ReconcileOutcome) {
    let mark = match outcome.action {
        ActionType::NoOp => "=".dimmed(),
        ActionType::Delete => "-".red(),
        _ => "✓".green(),
    };
    println!("  {} {}: {}", mark, outcome.address, summarize(outcome));
    for warning in &outcome.warnings {
        println!("      {} {}", "⚠".yellow(), warning.to_string().yellow());
    }
}
