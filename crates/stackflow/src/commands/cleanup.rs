use crate::RunArgs;
use crate::utils;
use colored::Colorize;
use stackflow_cloud::RunMode;
use stackflow_config::PlanDocument;
use std::path::PathBuf;

pub async fn handle(
    document: &PlanDocument,
    run: RunArgs,
    concurrency: Option<usize>,
    report: Option<PathBuf>,
    yes: bool,
) -> anyhow::Result<i32> {
    println!("{}", "Cleaning up...".blue().bold());
    utils::print_plan_source(document);

    let plan = utils::build_plan(document, &run)?;

    println!();
    println!("{}", format!("Resources to delete ({}):", plan.len()).bold());
    for spec in plan.specs().iter().rev() {
        println!("  • {} ({})", spec.id.cyan(), spec.kind);
    }

    // 確認（--yesが指定されていない場合）
    if !yes {
        println!();
        println!("{}", "Warning: this deletes the resources above.".yellow());
        println!("Re-run with --yes to proceed");
        return Ok(0);
    }

    let registry = utils::registry(&run);
    println!();
    println!("{}", "Checking providers...".blue());
    utils::preflight(&registry, &plan).await?;

    let report =
        utils::execute(document, &plan, registry, concurrency, RunMode::Cleanup, report).await?;
    utils::print_report(&report, false);

    Ok(report.exit_code())
}
