//! オーケストレータ通知モジュール
//!
//! 挿入成功後にAirflowのREST APIへDAG実行をトリガーする。
//! 通知は完全にベストエフォートであり、失敗はログに残すのみで
//! レスポンスのステータスには一切影響しない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// トリガーリクエストのタイムアウト（秒）
const TRIGGER_TIMEOUT_SECS: u64 = 10;

/// デフォルトのDAG識別子
const DEFAULT_DAG_ID: &str = "token_activity_notification_dag";

/// Airflow接続設定の環境変数名
const ENDPOINT_ENV: &str = "AIRFLOW_ENDPOINT";
const USERNAME_ENV: &str = "AIRFLOW_USERNAME";
const PASSWORD_ENV: &str = "AIRFLOW_PASSWORD";
const DAG_ID_ENV: &str = "AIRFLOW_DAG_ID";

/// オーケストレータ通知のエラー型
#[derive(Debug, Error)]
pub enum OrchestratorError {
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

/// Airflow接続設定
///
/// エンドポイントが未設定の場合、トリガーステップ自体をスキップする。
#[derive(Clone)]
pub struct OrchestratorConfig {
    endpoint: String,
    username: String,
    password: String,
    dag_id: String,
}

impl std::fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("dag_id", &self.dag_id)
            .finish_non_exhaustive()
    }
}

impl OrchestratorConfig {
    /// 明示的な値で新しい設定を作成（テスト用）
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        dag_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            dag_id: dag_id.into(),
        }
    }

    /// 環境変数から設定を読み込み
    ///
    /// # 環境変数
    /// - `AIRFLOW_ENDPOINT`: AirflowのベースURL（未設定ならトリガー無効）
    /// - `AIRFLOW_USERNAME` / `AIRFLOW_PASSWORD`: Basic認証の資格情報
    /// - `AIRFLOW_DAG_ID`: トリガーするDAG（省略時は既定DAG）
    ///
    /// # 戻り値
    /// - `Some(OrchestratorConfig)`: トリガーが構成されている
    /// - `None`: エンドポイント未設定、または資格情報が不完全
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var(ENDPOINT_ENV).ok()?;

        let username = std::env::var(USERNAME_ENV).ok();
        let password = std::env::var(PASSWORD_ENV).ok();
        let (username, password) = match (username, password) {
            (Some(u), Some(p)) => (u, p),
            _ => {
                // エンドポイントのみ設定された状態は構成不備として扱う
                warn!("AIRFLOW_ENDPOINTが設定されていますが認証情報が不完全です。トリガーを無効化します");
                return None;
            }
        };

        let dag_id = std::env::var(DAG_ID_ENV).unwrap_or_else(|_| DEFAULT_DAG_ID.to_string());

        Some(Self {
            endpoint,
            username,
            password,
            dag_id,
        })
    }

    /// DAG実行エンドポイントURLを構築
    fn dag_runs_url(&self) -> String {
        format!(
            "{}/api/v1/dags/{}/dagRuns",
            self.endpoint.trim_end_matches('/'),
            self.dag_id,
        )
    }
}

/// 一意なDAG実行識別子を生成する
fn generate_run_id(now: DateTime<Utc>) -> String {
    format!("webhooktrigger{}", now.format("%Y%m%dT%H%M%SZ"))
}

/// オーケストレータトリガーのトレイト（テスト用の抽象化）
#[async_trait]
pub trait OrchestratorTrigger: Send + Sync {
    /// DAG実行をトリガーし、実行識別子を返す
    ///
    /// # 引数
    /// * `records_processed` - 今回の呼び出しで挿入したレコード件数
    async fn trigger(&self, records_processed: usize) -> Result<String, OrchestratorError>;
}

/// Airflow REST APIへのトリガー実装
#[derive(Debug, Clone)]
pub struct AirflowTrigger {
    client: Client,
    config: OrchestratorConfig,
}

impl AirflowTrigger {
    /// 設定からAirflowTriggerを作成
    pub fn new(config: OrchestratorConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(TRIGGER_TIMEOUT_SECS))
            .build()
            .expect("HTTPクライアントの構築に失敗");

        Self { client, config }
    }
}

#[async_trait]
impl OrchestratorTrigger for AirflowTrigger {
    async fn trigger(&self, records_processed: usize) -> Result<String, OrchestratorError> {
        let url = self.config.dag_runs_url();
        let run_id = generate_run_id(Utc::now());
        debug!(url = %url, run_id = %run_id, "DAG実行をトリガー");

        let payload = json!({
            "dag_run_id": run_id,
            "conf": {"records_processed": records_processed},
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "DAGトリガーリクエスト送信に失敗");
                OrchestratorError::NetworkError(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            info!(run_id = %run_id, "DAGトリガーに成功");
            return Ok(run_id);
        }

        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "DAGトリガーが拒否された");

        Err(OrchestratorError::HttpError {
            status: status.as_u16(),
            message: body,
        })
    }
}
