use anyhow::Context;
use colored::Colorize;
use labforge_config::CredentialsFile;

/// 認証情報ファイルを書き出す (secret_key は base64 で保存)
pub fn handle(secret_id: &str, secret_key: &str) -> anyhow::Result<()> {
    let path = labforge_config::credentials_path()?;
    CredentialsFile::new(secret_id, secret_key)
        .save(&path)
        .with_context(|| format!("{} に書き込めません", path.display()))?;

    println!(
        "{}",
        format!("✓ 認証情報を保存しました: {}", path.display()).green()
    );
    println!(
        "{}",
        "  secret_key は base64 で保存されます (暗号化ではありません)".dimmed()
    );
    Ok(())
}
