use crate::utils::shell_join;
use crate::workspace::Workspace;
use colored::Colorize;

/// ノード上でコマンドを1つ実行し、出力と終了コードをそのまま返す
pub async fn handle(workspace: &Workspace, command: &[String]) -> anyhow::Result<()> {
    let command = shell_join(command);
    let target = workspace.engine.remote_target()?;

    eprintln!(
        "{}",
        format!("{}@{} で実行中: {}", target.user, target.address(), command).green()
    );

    let mut session = workspace.engine.connect_node().await?;
    let result = session.run_command(&command).await;
    if let Err(e) = session.close().await {
        tracing::warn!("Failed to close session: {}", e);
    }
    let output = result?;

    print!("{}", output.output);

    // リモートの終了コードを引き継ぐ
    if let Some(code) = output.exit_status
        && code != 0
    {
        std::process::exit(code);
    }
    Ok(())
}
