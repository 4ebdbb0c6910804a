use crate::RunArgs;
use anyhow::Context;
use colored::Colorize;
use stackflow_cloud::{
    CancellationToken, Plan, ProviderRegistry, ReconcileAction, ReconcileResult, Reconciler,
    ReconcilerConfig, Report, RunMode, RunStatus, StateManager, is_sensitive, mask,
};
use stackflow_cloud_kube::KubeProviders;
use stackflow_config::PlanDocument;
use std::path::{Path, PathBuf};

/// Validated plan, narrowed to `--target` when given
pub fn build_plan(document: &PlanDocument, run: &RunArgs) -> anyhow::Result<Plan> {
    let plan = document.to_plan()?;
    if run.targets.is_empty() {
        return Ok(plan);
    }
    Ok(plan.subset(&run.targets)?)
}

pub fn registry(run: &RunArgs) -> ProviderRegistry {
    KubeProviders::default()
        .with_context(run.context.clone())
        .registry()
}

/// 読み込んだプランファイルを表示
pub fn print_plan_source(document: &PlanDocument) {
    let source = document
        .source
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(inline)".to_string());
    println!(
        "📄 Plan {} ({})",
        document.display_name().cyan().bold(),
        source.dimmed()
    );
}

/// Check every provider the plan uses before touching anything
pub async fn preflight(registry: &ProviderRegistry, plan: &Plan) -> anyhow::Result<()> {
    let kinds: Vec<_> = plan.iter().map(|s| s.kind).collect();
    let statuses = registry.check_auth(kinds).await?;

    let mut failed = Vec::new();
    for (provider, status) in statuses {
        if status.authenticated {
            let info = status.account_info.unwrap_or_default();
            println!("  {} {} {}", "✓".green(), provider, info.dimmed());
        } else {
            let error = status.error.unwrap_or_else(|| "not authenticated".to_string());
            println!("  {} {} {}", "✗".red(), provider, error);
            failed.push(provider);
        }
    }

    if !failed.is_empty() {
        anyhow::bail!(
            "provider check failed for {}; log in to the provider CLI and retry",
            failed.join(", ")
        );
    }
    Ok(())
}

/// Run a deploy or cleanup under the project lock and persist the report.
///
/// Ctrl-C cancels the run: in-flight waits stop at their next poll and
/// resources not yet started are reported as aborted.
pub async fn execute(
    document: &PlanDocument,
    plan: &Plan,
    registry: ProviderRegistry,
    concurrency: Option<usize>,
    mode: RunMode,
    report_path: Option<PathBuf>,
) -> anyhow::Result<Report> {
    let project_root = std::env::current_dir()?;
    let state = StateManager::new(&project_root);
    let lock = state.acquire_lock(mode).await?;

    let mut config: ReconcilerConfig = document.settings.clone();
    if let Some(concurrency) = concurrency {
        config.concurrency = concurrency;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling; waiting for running steps to stop...".yellow());
            on_interrupt.cancel();
        }
    });

    let reconciler = Reconciler::new(registry)
        .with_config(config)
        .with_cancellation(cancel);
    let mut report = match mode {
        RunMode::Deploy => reconciler.reconcile(plan).await,
        RunMode::Cleanup => reconciler.cleanup(plan).await,
    };
    interrupt.abort();
    report.plan = Some(document.display_name());

    let saved = state.save_report(&report).await?;
    tracing::debug!("Report saved to {}", saved.display());
    if let Some(path) = report_path {
        write_report(&report, &path)?;
    }
    lock.release().await?;

    Ok(report)
}

fn write_report(report: &Report, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, report.redacted().to_json_pretty()?)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    println!("Report written to {}", path.display().to_string().cyan());
    Ok(())
}

fn action_label(result: &ReconcileResult) -> colored::ColoredString {
    let label = result.action.to_string();
    match result.action {
        ReconcileAction::Created | ReconcileAction::Updated | ReconcileAction::Deleted => {
            label.green()
        }
        ReconcileAction::Skipped if result.is_warning() => label.yellow(),
        ReconcileAction::Skipped => label.dimmed(),
        ReconcileAction::Failed => label.red().bold(),
        ReconcileAction::DependencyFailed | ReconcileAction::Aborted => label.red(),
    }
}

/// Human summary: one line per resource, outputs, issues with hints
pub fn print_report(report: &Report, show_secrets: bool) {
    println!();
    for result in &report.results {
        let detail = if result.message.is_empty() {
            String::new()
        } else {
            format!(" - {}", result.message)
        };
        println!(
            "  {:<18} {:<12} {}{}",
            result.spec_id.cyan(),
            result.kind.to_string().dimmed(),
            action_label(result),
            detail
        );

        for (key, value) in &result.outputs {
            let shown = if !show_secrets && is_sensitive(result.kind, key) {
                mask(value)
            } else {
                value.clone()
            };
            let text = match shown {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            println!("  {:<18}   {} = {}", "", key, text);
        }
    }

    let issues = report.issues();
    if !issues.is_empty() {
        println!();
        for issue in issues {
            let marker = match issue.severity {
                stackflow_cloud::Severity::Failure => "✗".red().bold(),
                stackflow_cloud::Severity::Warning => "⚠".yellow().bold(),
            };
            println!("{} {} [{}] {}", marker, issue.spec_id, issue.kind, issue.message);
            println!("    {} {}", "hint:".dimmed(), issue.hint);
        }
    }

    println!();
    let status = match report.status {
        RunStatus::Success => report.status.to_string().green().bold(),
        RunStatus::PartialFailure => report.status.to_string().yellow().bold(),
        RunStatus::Failed | RunStatus::Aborted => report.status.to_string().red().bold(),
    };
    println!(
        "{} {} in {:.1}s: {}",
        report.mode.to_string().bold(),
        status,
        report.duration_ms as f64 / 1000.0,
        report.summary
    );
}
