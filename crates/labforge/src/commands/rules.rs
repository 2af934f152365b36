use crate::workspace::Workspace;
use colored::Colorize;
use labforge_cloud::ConvergeMode;

/// 現在のルールを本番ルールと突き合わせて表示し、必要なら収束させる
pub async fn handle(workspace: Workspace, apply: bool, replace: bool) -> anyhow::Result<()> {
    workspace.print_header();
    let Workspace {
        engine, credential, ..
    } = workspace;

    let desired = engine.production_policy();
    let live = engine.live_rules(&credential).await?;

    println!();
    println!("{}", "セキュリティグループ (ingress):".bold());
    if live.is_empty() {
        println!("  {}", "(ルールなし)".dimmed());
    }
    for observed in &live {
        let marker = if desired.rules.contains(&observed.rule) {
            "✓".green()
        } else {
            "−".yellow()
        };
        println!("  {} [{}] {}", marker, observed.index, observed.rule);
    }
    for rule in desired
        .rules
        .iter()
        .filter(|r| !live.iter().any(|o| &o.rule == *r))
    {
        println!("  {} [ ] {} {}", "+".red(), rule, "(未適用)".red());
    }

    if !apply && !replace {
        println!();
        println!(
            "{}",
            "--apply で不足ルールを追加、--replace で本番ルール以外も削除します".dimmed()
        );
        return Ok(());
    }

    let mode = if replace {
        ConvergeMode::Replace
    } else {
        ConvergeMode::Incremental
    };

    let lock = engine.checkpoint().acquire_lock().await?;
    let result = engine.converge_rules(&credential, mode).await;
    lock.release().await?;
    let report = result?;

    println!();
    if report.is_noop() {
        println!("{}", "✓ 変更はありません".green());
        return Ok(());
    }
    for rule in &report.added {
        println!("  {} {}", "+ 追加".green(), rule);
    }
    for rule in &report.deleted {
        println!("  {} {}", "- 削除".yellow(), rule);
    }
    println!(
        "{}",
        format!(
            "✓ {} 件追加、{} 件削除しました",
            report.added.len(),
            report.deleted.len()
        )
        .green()
        .bold()
    );
    Ok(())
}
