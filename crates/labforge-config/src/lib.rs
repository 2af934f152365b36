//! LabForge の設定と認証情報
//!
//! 設定ファイル (`labforge.yaml`) の探索と読み込み、および
//! base64 で難読化された認証情報ファイルを扱う。

pub mod credentials;
pub mod error;
pub mod settings;

pub use credentials::{CredentialsFile, credentials_path, find_credentials_file, load_credential};
pub use error::*;
pub use settings::{RateLimitSettings, Settings};

use std::path::PathBuf;

/// 設定ファイル名 (優先順)
const CONFIG_FILE_NAMES: [&str; 2] = ["labforge.local.yaml", "labforge.yaml"];

/// LabForgeの設定ディレクトリ (~/.config/labforge) を取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("labforge");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// 設定ファイルを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 LABFORGE_CONFIG (直接パス指定)
/// 2. カレントディレクトリ: labforge.local.yaml, labforge.yaml
/// 3. ./.labforge/ ディレクトリ内: 同様の順序
/// 4. ~/.config/labforge/labforge.yaml (グローバル設定)
pub fn find_config_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var("LABFORGE_CONFIG") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("LABFORGE_CONFIG points to a missing file: {}", path.display());
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    for filename in &CONFIG_FILE_NAMES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    // 3. ./.labforge/ ディレクトリで検索
    let local_dir = current_dir.join(".labforge");
    if local_dir.is_dir() {
        for filename in &CONFIG_FILE_NAMES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    // 4. グローバル設定ファイル
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("labforge").join("labforge.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// 設定を読み込む。設定ファイルが無ければデフォルト値を使う。
///
/// 戻り値の2つ目は実際に読んだファイル (無ければ None)。
pub fn load_settings() -> Result<(Settings, Option<PathBuf>)> {
    match find_config_file() {
        Ok(path) => {
            let settings = Settings::load(&path)?;
            Ok((settings, Some(path)))
        }
        Err(ConfigError::ConfigFileNotFound) => {
            tracing::debug!("No settings file found, using defaults");
            Ok((Settings::default(), None))
        }
        Err(e) => Err(e),
    }
}
