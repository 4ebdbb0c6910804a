use crate::RunArgs;
use crate::utils;
use colored::Colorize;
use stackflow_cloud::{ChangeSummary, ChangeType, Reconciler};
use stackflow_config::PlanDocument;

pub async fn handle(document: &PlanDocument, run: RunArgs) -> anyhow::Result<i32> {
    println!("{}", "Computing changes...".blue().bold());
    utils::print_plan_source(document);

    let plan = utils::build_plan(document, &run)?;
    let reconciler = Reconciler::new(utils::registry(&run)).with_config(document.settings.clone());
    let changes = reconciler.preview(&plan).await;

    println!();
    for change in &changes {
        let (marker, label) = match change.change {
            ChangeType::Create => ("+".green().bold(), change.change.to_string().green()),
            ChangeType::Update => ("~".yellow().bold(), change.change.to_string().yellow()),
            ChangeType::NoOp => (" ".normal(), change.change.to_string().dimmed()),
            ChangeType::Unknown => ("?".red().bold(), change.change.to_string().red()),
        };
        let mut line = format!(
            "{} {:<18} {:<12} {}",
            marker,
            change.spec_id.cyan(),
            change.kind.to_string().dimmed(),
            label
        );
        if !change.drift.is_empty() {
            line.push_str(&format!(" ({})", change.drift.join(", ")));
        }
        if !change.description.is_empty() {
            line.push_str(&format!(" - {}", change.description));
        }
        println!("{}", line);
    }

    let summary = ChangeSummary::from_changes(&changes);
    println!();
    println!("{} {}", "Plan:".bold(), summary);
    if !summary.has_changes() && summary.unknown == 0 {
        println!("{}", "✓ Everything is up to date".green());
    }
    Ok(0)
}
