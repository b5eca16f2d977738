//! ウェアハウス書き込みモジュール
//!
//! 抽出した送金レコードをSnowflakeの固定テーブルへINSERTする。
//! SnowflakeへはアカウントごとのHTTPステートメントエンドポイント経由で
//! 接続し、1回の呼び出しにつき1ステートメントのみ発行する。
//! 再試行は行わない（Webhook送信元への応答を優先する方針）。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::domain::TransferRecord;

/// リクエストタイムアウト（秒）
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// 接続タイムアウト（秒）
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 書き込み先の固定テーブル名
const TABLE_NAME: &str = "TOKEN_TRANSFERS";

/// Snowflake接続設定の環境変数名
const ACCOUNT_ENV: &str = "SNOWFLAKE_ACCOUNT";
const USER_ENV: &str = "SNOWFLAKE_USER";
const PASSWORD_ENV: &str = "SNOWFLAKE_PASSWORD";
const WAREHOUSE_ENV: &str = "SNOWFLAKE_WAREHOUSE";
const DATABASE_ENV: &str = "SNOWFLAKE_DATABASE";
const SCHEMA_ENV: &str = "SNOWFLAKE_SCHEMA";
const ROLE_ENV: &str = "SNOWFLAKE_ROLE";

/// 接続設定のデフォルト値
const DEFAULT_WAREHOUSE: &str = "DEV_WH";
const DEFAULT_DATABASE: &str = "DEV";
const DEFAULT_SCHEMA: &str = "BRONZE";
const DEFAULT_ROLE: &str = "AIRFLOW_ROLE";

/// ウェアハウス設定のエラー型
#[derive(Debug, Error)]
pub enum WarehouseConfigError {
    /// 必須の環境変数が設定されていない
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// アカウント識別子からURLを構築できない
    #[error("アカウント識別子が不正です: {0}")]
    InvalidAccount(String),
}

/// Snowflake接続設定
///
/// すべての資格情報はデプロイ時に環境変数として注入される。
/// コードへの埋め込みは行わない。
#[derive(Clone)]
pub struct WarehouseConfig {
    account: String,
    user: String,
    password: String,
    warehouse: String,
    database: String,
    schema: String,
    role: String,
}

impl std::fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl WarehouseConfig {
    /// 明示的な値で新しい設定を作成（テスト用）
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        warehouse: impl Into<String>,
        database: impl Into<String>,
        schema: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            user: user.into(),
            password: password.into(),
            warehouse: warehouse.into(),
            database: database.into(),
            schema: schema.into(),
            role: role.into(),
        }
    }

    /// 環境変数から設定を読み込み
    ///
    /// # 環境変数
    /// - `SNOWFLAKE_ACCOUNT` / `SNOWFLAKE_USER` / `SNOWFLAKE_PASSWORD`: 必須
    /// - `SNOWFLAKE_WAREHOUSE`: 省略時は`DEV_WH`
    /// - `SNOWFLAKE_DATABASE`: 省略時は`DEV`
    /// - `SNOWFLAKE_SCHEMA`: 省略時は`BRONZE`
    /// - `SNOWFLAKE_ROLE`: 省略時は`AIRFLOW_ROLE`
    pub fn from_env() -> Result<Self, WarehouseConfigError> {
        let account = require_env(ACCOUNT_ENV)?;
        let user = require_env(USER_ENV)?;
        let password = require_env(PASSWORD_ENV)?;

        let warehouse =
            std::env::var(WAREHOUSE_ENV).unwrap_or_else(|_| DEFAULT_WAREHOUSE.to_string());
        let database =
            std::env::var(DATABASE_ENV).unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let schema = std::env::var(SCHEMA_ENV).unwrap_or_else(|_| DEFAULT_SCHEMA.to_string());
        let role = std::env::var(ROLE_ENV).unwrap_or_else(|_| DEFAULT_ROLE.to_string());

        Ok(Self {
            account,
            user,
            password,
            warehouse,
            database,
            schema,
            role,
        })
    }

    /// ステートメントエンドポイントURLを構築
    ///
    /// 書式: `https://<account>.snowflakecomputing.com/api/v2/statements`
    pub fn statements_url(&self) -> Result<Url, WarehouseConfigError> {
        let url = format!(
            "https://{}.snowflakecomputing.com/api/v2/statements",
            self.account
        );
        Url::parse(&url).map_err(|_| WarehouseConfigError::InvalidAccount(self.account.clone()))
    }

    /// ユーザー名を取得
    pub fn user(&self) -> &str {
        &self.user
    }
}

/// 必須の環境変数を読み込む
fn require_env(name: &str) -> Result<String, WarehouseConfigError> {
    std::env::var(name).map_err(|_| WarehouseConfigError::MissingEnvVar(name.to_string()))
}

/// ウェアハウス書き込みのエラー型
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// 設定エラー
    #[error("ウェアハウス設定エラー: {0}")]
    ConfigError(#[from] WarehouseConfigError),

    /// HTTPエラー（ステータスコード付き）
    #[error("HTTPエラー: status={status}, message={message}")]
    HttpError {
        /// HTTPステータスコード
        status: u16,
        /// エラーメッセージ
        message: String,
    },

    /// ネットワークエラー
    #[error("ネットワークエラー: {0}")]
    NetworkError(String),
}

/// ウェアハウスシンクのトレイト（テスト用の抽象化）
#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// 送金レコードを固定テーブルへ挿入し、挿入件数を返す
    async fn insert_transfers(&self, records: &[TransferRecord]) -> Result<usize, WarehouseError>;
}

/// Snowflakeへのウェアハウスシンク実装
///
/// 1回の呼び出しで複数行を1つのパラメータ化INSERTにまとめて発行する。
/// 重複排除は行わない（再送時は重複行が生じる設計）。
#[derive(Clone)]
pub struct SnowflakeSink {
    client: Client,
    config: WarehouseConfig,
}

impl std::fmt::Debug for SnowflakeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeSink")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SnowflakeSink {
    /// 設定からSnowflakeSinkを作成
    pub fn new(config: WarehouseConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .expect("HTTPクライアントの構築に失敗");

        Self { client, config }
    }

    /// 複数行INSERTステートメントとバインド値を構築する
    ///
    /// バインド値は位置パラメータ（"1"起点の連番）で渡す。
    fn build_statement(records: &[TransferRecord]) -> (String, Value) {
        let rows: Vec<&str> = records.iter().map(|_| "(?, ?, ?, ?)").collect();
        let statement = format!(
            "INSERT INTO {} (TIMESTAMP, USER_ADDRESS, TOKEN_MINT, AMOUNT) VALUES {}",
            TABLE_NAME,
            rows.join(", "),
        );

        let mut bindings = serde_json::Map::new();
        let mut position = 1usize;
        for record in records {
            for (kind, value) in [
                ("TEXT", record.timestamp.clone()),
                ("TEXT", record.user_address.clone()),
                ("TEXT", record.token_mint.clone()),
                ("REAL", record.amount.to_string()),
            ] {
                bindings.insert(position.to_string(), json!({"type": kind, "value": value}));
                position += 1;
            }
        }

        (statement, Value::Object(bindings))
    }
}

#[async_trait]
impl WarehouseSink for SnowflakeSink {
    async fn insert_transfers(&self, records: &[TransferRecord]) -> Result<usize, WarehouseError> {
        if records.is_empty() {
            return Ok(0);
        }

        let url = self.config.statements_url()?;
        let (statement, bindings) = Self::build_statement(records);
        debug!(url = %url, rows = records.len(), "ウェアハウスへINSERTを発行");

        let payload = json!({
            "statement": statement,
            "bindings": bindings,
            "warehouse": self.config.warehouse,
            "database": self.config.database,
            "schema": self.config.schema,
            "role": self.config.role,
        });

        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "ウェアハウスへのリクエスト送信に失敗");
                WarehouseError::NetworkError(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            info!(rows = records.len(), "ウェアハウスへの挿入に成功");
            return Ok(records.len());
        }

        // エラーレスポンスを処理
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "ウェアハウスがINSERTを拒否");

        Err(WarehouseError::HttpError {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // テストで環境変数を安全に設定/削除するヘルパー
    // 注: Rust 2024エディションでset_var/remove_varはunsafe
    unsafe fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    unsafe fn cleanup_snowflake_env() {
        unsafe {
            remove_env(ACCOUNT_ENV);
            remove_env(USER_ENV);
            remove_env(PASSWORD_ENV);
            remove_env(WAREHOUSE_ENV);
            remove_env(DATABASE_ENV);
            remove_env(SCHEMA_ENV);
            remove_env(ROLE_ENV);
        }
    }

    fn record(user: &str, mint: &str, amount: f64) -> TransferRecord {
        TransferRecord {
            timestamp: "2025-01-01 00:00:00".to_string(),
            user_address: user.to_string(),
            token_mint: mint.to_string(),
            amount,
        }
    }

    #[test]
    #[serial(ingest_env)]
    fn test_config_from_env_with_defaults() {
        unsafe {
            cleanup_snowflake_env();
            set_env(ACCOUNT_ENV, "myorg-myaccount");
            set_env(USER_ENV, "svc_ingest");
            set_env(PASSWORD_ENV, "secret");
        }

        let config = WarehouseConfig::from_env().unwrap();
        assert_eq!(config.account, "myorg-myaccount");
        assert_eq!(config.warehouse, DEFAULT_WAREHOUSE);
        assert_eq!(config.database, DEFAULT_DATABASE);
        assert_eq!(config.schema, DEFAULT_SCHEMA);
        assert_eq!(config.role, DEFAULT_ROLE);

        unsafe { cleanup_snowflake_env() };
    }

    #[test]
    #[serial(ingest_env)]
    fn test_config_missing_account() {
        unsafe { cleanup_snowflake_env() };

        let result = WarehouseConfig::from_env();
        assert!(matches!(
            result,
            Err(WarehouseConfigError::MissingEnvVar(ref name)) if name == ACCOUNT_ENV
        ));
    }

    #[test]
    #[serial(ingest_env)]
    fn test_config_env_overrides() {
        unsafe {
            cleanup_snowflake_env();
            set_env(ACCOUNT_ENV, "acct");
            set_env(USER_ENV, "user");
            set_env(PASSWORD_ENV, "pass");
            set_env(WAREHOUSE_ENV, "PROD_WH");
            set_env(DATABASE_ENV, "PROD");
            set_env(SCHEMA_ENV, "SILVER");
            set_env(ROLE_ENV, "INGEST_ROLE");
        }

        let config = WarehouseConfig::from_env().unwrap();
        assert_eq!(config.warehouse, "PROD_WH");
        assert_eq!(config.database, "PROD");
        assert_eq!(config.schema, "SILVER");
        assert_eq!(config.role, "INGEST_ROLE");

        unsafe { cleanup_snowflake_env() };
    }

    #[test]
    fn test_statements_url() {
        let config = WarehouseConfig::new("acct", "u", "p", "WH", "DB", "SC", "R");
        let url = config.statements_url().unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.snowflakecomputing.com/api/v2/statements"
        );
    }

    #[test]
    fn test_single_row_statement() {
        let records = vec![record("u1", "m1", 100.0)];
        let (statement, bindings) = SnowflakeSink::build_statement(&records);

        assert_eq!(
            statement,
            "INSERT INTO TOKEN_TRANSFERS (TIMESTAMP, USER_ADDRESS, TOKEN_MINT, AMOUNT) \
             VALUES (?, ?, ?, ?)"
        );
        let bindings = bindings.as_object().unwrap();
        assert_eq!(bindings.len(), 4);
        assert_eq!(bindings["2"]["value"], "u1");
        assert_eq!(bindings["3"]["value"], "m1");
        assert_eq!(bindings["4"]["type"], "REAL");
        assert_eq!(bindings["4"]["value"], "100");
    }

    #[test]
    fn test_multi_row_statement_binds_sequentially() {
        let records = vec![record("u1", "m1", 1.0), record("u2", "m2", 2.5)];
        let (statement, bindings) = SnowflakeSink::build_statement(&records);

        assert!(statement.ends_with("VALUES (?, ?, ?, ?), (?, ?, ?, ?)"));
        let bindings = bindings.as_object().unwrap();
        assert_eq!(bindings.len(), 8);
        assert_eq!(bindings["6"]["value"], "u2");
        assert_eq!(bindings["8"]["value"], "2.5");
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = WarehouseConfig::new("acct", "u", "hunter2", "WH", "DB", "SC", "R");
        let formatted = format!("{:?}", config);
        assert!(!formatted.contains("hunter2"));

        let sink = SnowflakeSink::new(config);
        let formatted = format!("{:?}", sink);
        assert!(!formatted.contains("hunter2"));
    }
}
