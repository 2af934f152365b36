//! 認証情報ファイル
//!
//! `secret_key` は base64 で保存する。これは平文で目に触れないための
//! 難読化であり、暗号化ではない。ファイル自体のパーミッションで保護すること。

use crate::error::{ConfigError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use labforge_cloud::Credential;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CREDENTIALS_FILE_NAME: &str = "credentials.yaml";

/// `credentials.yaml` の内容
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsFile {
    pub secret_id: String,

    /// base64 エンコード済み
    pub secret_key: String,
}

impl std::fmt::Debug for CredentialsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsFile")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl CredentialsFile {
    /// 平文の secret_key から作成する
    pub fn new(secret_id: impl Into<String>, secret_key: &str) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: STANDARD.encode(secret_key),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 所有者のみ読み書き可能なファイルとして保存する
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// secret_key をデコードして認証情報にする
    pub fn credential(&self) -> Result<Credential> {
        let bytes = STANDARD
            .decode(self.secret_key.trim())
            .map_err(|e| ConfigError::SecretDecode(e.to_string()))?;
        let secret_key = String::from_utf8(bytes).map_err(|e| ConfigError::SecretDecode(e.to_string()))?;
        Ok(Credential::new(self.secret_id.trim(), secret_key))
    }
}

/// 認証情報ファイルの保存先
///
/// 1. 環境変数 LABFORGE_CREDENTIALS
/// 2. ./.labforge/credentials.yaml
/// 3. ~/.config/labforge/credentials.yaml
pub fn credentials_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("LABFORGE_CREDENTIALS") {
        return Ok(PathBuf::from(path));
    }

    let local = std::env::current_dir()?.join(".labforge").join(CREDENTIALS_FILE_NAME);
    if local.exists() {
        return Ok(local);
    }

    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("labforge")
        .join(CREDENTIALS_FILE_NAME))
}

/// 既存の認証情報ファイルを探す
pub fn find_credentials_file() -> Option<PathBuf> {
    credentials_path().ok().filter(|path| path.exists())
}

/// 認証情報を読み込む
///
/// TENCENTCLOUD_SECRET_ID と TENCENTCLOUD_SECRET_KEY が両方設定されていれば
/// ファイルより優先する。
pub fn load_credential() -> Result<Credential> {
    let from_env = (
        std::env::var("TENCENTCLOUD_SECRET_ID"),
        std::env::var("TENCENTCLOUD_SECRET_KEY"),
    );
    if let (Ok(id), Ok(key)) = from_env
        && !id.is_empty()
        && !key.is_empty()
    {
        tracing::debug!("Using credentials from the environment");
        return Ok(Credential::new(id, key));
    }

    let path = find_credentials_file().ok_or(ConfigError::CredentialsNotFound)?;
    tracing::debug!("Using credentials from {}", path.display());
    CredentialsFile::load(&path)?.credential()
}
