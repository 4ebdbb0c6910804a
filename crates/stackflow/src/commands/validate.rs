use colored::Colorize;
use stackflow_config::PlanDocument;

/// Validate without contacting any provider
pub fn handle(document: &PlanDocument) -> i32 {
    println!("{}", "Validating plan...".blue());
    if let Some(source) = &document.source {
        println!("Plan file: {}", source.display().to_string().cyan());
    }

    match document.to_plan() {
        Ok(plan) => {
            println!("{}", "✓ Plan is valid!".green().bold());
            println!();
            println!("Summary:");
            println!("  Name: {}", document.display_name().cyan());
            println!("  Resources: {}", plan.len());
            for spec in plan.iter() {
                let deps = if spec.depends_on.is_empty() {
                    String::new()
                } else {
                    let deps: Vec<&str> = spec.depends_on.iter().map(String::as_str).collect();
                    format!(" ← {}", deps.join(", "))
                };
                let required = if spec.is_required() { ", required" } else { "" };
                println!(
                    "    - {} ({}{}){}",
                    spec.id.cyan(),
                    spec.kind,
                    required,
                    deps
                );
            }
            if !document.variables.is_empty() {
                println!("  Variables: {}", document.variables.len());
            }
            0
        }
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Invalid plan".red().bold());
            eprintln!("  {}", e);
            1
        }
    }
}
