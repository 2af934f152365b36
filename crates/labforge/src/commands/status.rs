use crate::utils;
use crate::workspace::Workspace;
use colored::Colorize;
use labforge_cloud::Sensitivity;

pub fn handle(workspace: &Workspace, json: bool) -> anyhow::Result<()> {
    let checkpoint = workspace.engine.checkpoint();
    let state = checkpoint.state();
    let entries = state.entries();

    if json {
        let mut fields = serde_json::Map::new();
        for (name, sensitivity, value) in &entries {
            let value = match (sensitivity, value) {
                (_, None) => serde_json::Value::Null,
                (Sensitivity::Obfuscated, Some(v)) => utils::redact(v).into(),
                (Sensitivity::Plain, Some(v)) => (*v).into(),
            };
            fields.insert(name.to_string(), value);
        }
        let output = serde_json::json!({
            "checkpoint": checkpoint.path(),
            "deployment": workspace.engine.settings().deployment,
            "fields": fields,
            "finalized_at": state.finalized_at,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    workspace.print_header();
    println!("📦 チェックポイント: {}", checkpoint.path().display().to_string().cyan());
    println!();

    for (name, sensitivity, value) in &entries {
        let shown = match (sensitivity, value) {
            (_, None) => "-".dimmed().to_string(),
            (Sensitivity::Obfuscated, Some(v)) => utils::redact(v),
            (Sensitivity::Plain, Some(v)) => v.cyan().to_string(),
        };
        println!("  {:<20} {}", name, shown);
    }

    println!();
    println!("  {}/{} 項目が記録済み", state.populated(), entries.len());
    match state.finalized_at {
        Some(at) => println!("  {} {}", "✓ 最終化済み:".green(), at.to_rfc3339()),
        None => println!("  {}", "最終化はまだです".yellow()),
    }
    Ok(())
}
