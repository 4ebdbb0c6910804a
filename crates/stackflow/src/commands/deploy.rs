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
    show_secrets: bool,
) -> anyhow::Result<i32> {
    println!("{}", "Deploying...".blue().bold());
    utils::print_plan_source(document);

    let plan = utils::build_plan(document, &run)?;
    println!(
        "{}",
        format!("Resources ({}): {}", plan.len(), plan.ids().join(" → ")).bold()
    );

    let registry = utils::registry(&run);

    // 認証チェック
    println!();
    println!("{}", "Checking providers...".blue());
    utils::preflight(&registry, &plan).await?;

    let report =
        utils::execute(document, &plan, registry, concurrency, RunMode::Deploy, report).await?;
    utils::print_report(&report, show_secrets);

    Ok(report.exit_code())
}
