//! 設定・認証情報・チェックポイントからエンジンを組み立てる

use anyhow::Context;
use colored::Colorize;
use labforge_cloud::{
    CheckpointStore, CloudProvider, Credential, EngineContext, MemoryProvider, MockConnector,
    RemoteConnector, StageEngine,
};
use labforge_cloud_tencent::TencentCloudProvider;
use labforge_config::Settings;
use labforge_remote::SshConnector;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// 1回のコマンド実行に必要なもの一式
pub struct Workspace {
    pub engine: StageEngine,
    pub credential: Credential,
    pub settings_path: Option<PathBuf>,
    pub dry_run: bool,
    // dry-run 時のチェックポイント置き場。Workspace と同じ寿命で削除される。
    _scratch: Option<TempDir>,
}

impl Workspace {
    pub async fn open(config: Option<&Path>, dry_run: bool) -> anyhow::Result<Self> {
        let (settings, settings_path) = match config {
            Some(path) => {
                let settings = Settings::load(path)
                    .with_context(|| format!("設定ファイルの読み込みに失敗: {}", path.display()))?;
                (settings, Some(path.to_path_buf()))
            }
            None => labforge_config::load_settings().context("設定ファイルの読み込みに失敗")?,
        };

        let limiter = Arc::new(settings.rate_limits.limiter());

        let (provider, connector, credential, checkpoint_path, scratch): (
            Arc<dyn CloudProvider>,
            Arc<dyn RemoteConnector>,
            Credential,
            PathBuf,
            Option<TempDir>,
        ) = if dry_run {
            let scratch = tempfile::tempdir().context("一時ディレクトリを作成できません")?;
            let path = scratch.path().join("checkpoint.json");
            (
                Arc::new(MemoryProvider::new()),
                Arc::new(MockConnector::new()),
                Credential::new("dry-run", "dry-run"),
                path,
                Some(scratch),
            )
        } else {
            let credential =
                labforge_config::load_credential().context("認証情報を読み込めません")?;
            (
                Arc::new(TencentCloudProvider::new()),
                Arc::new(SshConnector::new()),
                credential,
                settings.checkpoint.clone(),
                None,
            )
        };

        let checkpoint = CheckpointStore::load(&checkpoint_path)
            .await
            .with_context(|| format!("チェックポイントを読み込めません: {}", checkpoint_path.display()))?;

        tracing::debug!(
            provider = provider.name(),
            checkpoint = %checkpoint_path.display(),
            "Workspace ready"
        );

        let ctx = EngineContext::new(provider, connector, limiter, settings.engine);
        Ok(Self {
            engine: StageEngine::new(ctx, checkpoint),
            credential,
            settings_path,
            dry_run,
            _scratch: scratch,
        })
    }

    /// 実行モードと読み込んだファイルを表示
    pub fn print_header(&self) {
        if self.dry_run {
            println!("{}", "🧪 dry-run: クラウドには接続しません".yellow());
        }
        match &self.settings_path {
            Some(path) => println!("📄 設定ファイル: {}", path.display().to_string().cyan()),
            None => println!("📄 設定ファイル: {}", "(なし、デフォルト値を使用)".dimmed()),
        }
        println!(
            "🏷  デプロイメント: {}",
            self.engine.settings().deployment.cyan().bold()
        );
    }
}
