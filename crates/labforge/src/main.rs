mod commands;
mod utils;
mod workspace;

use clap::{Parser, Subcommand};
use labforge_cloud::Stage;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "labforge")]
#[command(about = "研究環境を、何度でも同じ手順で。", long_about = None)]
struct Cli {
    /// 設定ファイルのパス (省略時は labforge.yaml を探索)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// クラウドに触れず、インメモリのプロバイダとモックのリモート接続で実行
    #[arg(long, global = true)]
    dry_run: bool,

    /// 詳細ログを出力 (RUST_LOG が優先)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 全ステージを順に実行 (途中から再開可能)
    Provision {
        /// 開始ステージ
        #[arg(long, default_value = "region")]
        from: Stage,
        /// 終了ステージ
        #[arg(long, default_value = "node-network-finalize")]
        to: Stage,
    },
    /// 単一ステージを実行
    Stage {
        /// ステージ名 (region, account, project, network, security-group,
        /// security-policies, object-store, managed-cluster, cluster-node,
        /// node-network-finalize)
        name: Stage,
    },
    /// チェックポイントの内容を表示
    Status {
        /// JSON で出力
        #[arg(long)]
        json: bool,
    },
    /// ノード上でコマンドを実行
    Exec {
        /// 実行するコマンド（-- 以降）。複数の引数は個別にクォートされる
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// ノードに対話シェルで接続
    Shell,
    /// セキュリティグループのルールを表示・収束
    Rules {
        /// 不足している本番ルールを追加
        #[arg(long)]
        apply: bool,
        /// 本番ルール以外を削除 (--apply を含む)
        #[arg(long)]
        replace: bool,
    },
    /// 認証情報ファイルを作成
    Login {
        #[arg(long, env = "TENCENTCLOUD_SECRET_ID")]
        secret_id: String,
        #[arg(long, env = "TENCENTCLOUD_SECRET_KEY", hide_env_values = true)]
        secret_key: String,
    },
    /// バージョン情報を表示
    Version,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdoutはコマンド出力に使うので、ログはstderrへ
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // 設定ファイル不要のコマンド
    match &cli.command {
        Commands::Version => {
            println!("labforge {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Login {
            secret_id,
            secret_key,
        } => {
            return commands::login::handle(secret_id, secret_key);
        }
        _ => {}
    }

    let workspace = workspace::Workspace::open(cli.config.as_deref(), cli.dry_run).await?;

    match cli.command {
        Commands::Provision { from, to } => {
            commands::provision::handle(workspace, Stage::range(from, to)).await?;
        }
        Commands::Stage { name } => {
            commands::provision::handle(workspace, std::slice::from_ref(&name)).await?;
        }
        Commands::Status { json } => {
            commands::status::handle(&workspace, json)?;
        }
        Commands::Exec { command } => {
            commands::exec::handle(&workspace, &command).await?;
        }
        Commands::Shell => {
            commands::shell::handle(&workspace).await?;
        }
        Commands::Rules { apply, replace } => {
            commands::rules::handle(workspace, apply, replace).await?;
        }
        Commands::Version | Commands::Login { .. } => {
            unreachable!("handled before loading settings");
        }
    }

    Ok(())
}
