use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: labforge.local.yaml, labforge.yaml\n\
        - ./.labforge/ ディレクトリ\n\
        - ~/.config/labforge/labforge.yaml\n\
        または LABFORGE_CONFIG 環境変数で直接指定できます"
    )]
    ConfigFileNotFound,

    #[error(
        "認証情報が見つかりません。credentials.yaml を作成するか、\n\
        TENCENTCLOUD_SECRET_ID / TENCENTCLOUD_SECRET_KEY 環境変数を設定してください"
    )]
    CredentialsNotFound,

    #[error("{path} の解析に失敗しました: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("secret_key のデコードに失敗しました (base64 で記述してください): {0}")]
    SecretDecode(String),

    #[error("設定値が不正です: {0}")]
    Invalid(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
