use crate::workspace::Workspace;
use colored::Colorize;
use labforge_remote::SshConnector;

/// ノードに PTY 付きのログインシェルで接続する
pub async fn handle(workspace: &Workspace) -> anyhow::Result<()> {
    if workspace.dry_run {
        anyhow::bail!("shell は --dry-run では使えません");
    }

    let target = workspace.engine.remote_target()?;
    eprintln!(
        "{}",
        format!("{}@{} に接続中...", target.user, target.address()).green()
    );

    let mut session = SshConnector::new().open_session(&target).await?;
    let status = session
        .run_interactive(None, std::io::stdin(), std::io::stdout())
        .await;
    if let Err(e) = labforge_cloud::RemoteSession::close(&mut session).await {
        tracing::warn!("Failed to close session: {}", e);
    }

    match status? {
        Some(0) | None => Ok(()),
        Some(code) => std::process::exit(code),
    }
}
