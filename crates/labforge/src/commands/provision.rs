use crate::utils;
use crate::workspace::Workspace;
use colored::Colorize;
use labforge_cloud::{RunReport, Stage};
use std::time::Instant;

/// ステージを順に実行する。最初の失敗で止まり、次回はそこから再開できる。
pub async fn handle(workspace: Workspace, stages: &[Stage]) -> anyhow::Result<()> {
    let (Some(first), Some(last)) = (stages.first(), stages.last()) else {
        anyhow::bail!("実行するステージがありません (--from が --to より後になっていませんか？)");
    };

    workspace.print_header();
    println!();
    if first == last {
        println!("{}", format!("ステージ '{}' を実行中...", first).blue().bold());
    } else {
        println!(
            "{}",
            format!("ステージ '{}' から '{}' まで実行中...", first, last)
                .blue()
                .bold()
        );
    }

    let Workspace {
        mut engine,
        credential,
        ..
    } = workspace;

    let lock = engine.checkpoint().acquire_lock().await?;
    let start = Instant::now();
    let mut report = RunReport::new();
    let mut failure = None;

    for stage in stages {
        match engine.run(&credential, *stage).await {
            Ok(outcome) => {
                utils::print_outcome(&outcome);
                report.push(outcome);
            }
            Err(e) => {
                println!("  {} {:<22} {}", "✗".red(), stage.name(), e.to_string().red());
                failure = Some((*stage, e));
                break;
            }
        }
    }
    report.duration_ms = start.elapsed().as_millis() as u64;
    lock.release().await?;

    println!();
    println!(
        "{} ({:.1}s)",
        report.summary(),
        report.duration_ms as f64 / 1000.0
    );

    if let Some((stage, e)) = failure {
        eprintln!(
            "{}",
            format!(
                "ヒント: 原因を解消して `labforge provision --from {}` で再開できます",
                stage
            )
            .yellow()
        );
        return Err(anyhow::Error::new(e).context(format!("ステージ '{}' が失敗しました", stage)));
    }

    println!("{}", "✓ 完了しました".green().bold());
    Ok(())
}
