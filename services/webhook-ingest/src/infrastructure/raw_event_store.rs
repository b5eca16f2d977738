//! 生ペイロード保全モジュール
//!
//! 受信したWebhookボディを無加工のままS3バケットへ書き込む。
//! 監査・デバッグ用のベストエフォート保全であり、書き込み失敗は
//! 呼び出し側でログのみに留める。

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// バケット名の環境変数名
const RAW_BUCKET_ENV: &str = "RAW_BUCKET";

/// キープレフィックスの環境変数名
const RAW_PREFIX_ENV: &str = "RAW_PREFIX";

/// デフォルトのキープレフィックス
const DEFAULT_PREFIX: &str = "webhooks";

/// ストレージ設定のエラー型
#[derive(Debug, Error)]
pub enum StorageConfigError {
    /// 必須の環境変数が設定されていない
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// 生ペイロード保全先の設定
#[derive(Debug, Clone)]
pub struct StorageConfig {
    bucket: String,
    prefix: String,
}

impl StorageConfig {
    /// 明示的な値で新しい設定を作成（テスト用）
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// 環境変数から設定を読み込み
    ///
    /// # 環境変数
    /// - `RAW_BUCKET`: 書き込み先バケット名（必須）
    /// - `RAW_PREFIX`: オブジェクトキーのプレフィックス（省略時は`webhooks`）
    pub fn from_env() -> Result<Self, StorageConfigError> {
        let bucket = std::env::var(RAW_BUCKET_ENV)
            .map_err(|_| StorageConfigError::MissingEnvVar(RAW_BUCKET_ENV.to_string()))?;

        let prefix = std::env::var(RAW_PREFIX_ENV).unwrap_or_else(|_| DEFAULT_PREFIX.to_string());

        Ok(Self { bucket, prefix })
    }

    /// バケット名を取得
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// キープレフィックスを取得
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// 生ペイロードのオブジェクトキー
///
/// 書式: `<prefix>/<YYYY-MM-DD>/<unixタイムスタンプ>-<uuid>.json`
/// 到着日でパーティションし、uuidで同時刻の衝突を避ける。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEventKey(String);

impl RawEventKey {
    /// 到着時刻から新しいキーを生成する
    pub fn generate(prefix: &str, arrival: DateTime<Utc>) -> Self {
        let key = format!(
            "{}/{}/{}-{}.json",
            prefix.trim_end_matches('/'),
            arrival.format("%Y-%m-%d"),
            arrival.timestamp(),
            Uuid::new_v4(),
        );
        Self(key)
    }

    /// キー文字列を取得
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 生ペイロード書き込みのエラー型
#[derive(Debug, Error)]
pub enum RawEventStoreError {
    /// AWS SDK エラー
    #[error("AWS S3 APIエラー: {0}")]
    AwsSdkError(String),
}

/// 生ペイロードストアのトレイト（テスト用の抽象化）
#[async_trait]
pub trait RawEventStore: Send + Sync {
    /// ボディを無加工のまま書き込み、オブジェクトキーを返す
    ///
    /// ボディがJSONとして妥当かどうかに関わらず呼び出される。
    async fn capture(&self, body: &str) -> Result<RawEventKey, RawEventStoreError>;
}

/// S3への生ペイロードストア実装
#[derive(Debug, Clone)]
pub struct S3RawEventStore {
    client: S3Client,
    config: StorageConfig,
}

impl S3RawEventStore {
    /// クライアントと設定から新しいストアを作成
    pub fn new(client: S3Client, config: StorageConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl RawEventStore for S3RawEventStore {
    async fn capture(&self, body: &str) -> Result<RawEventKey, RawEventStoreError> {
        let key = RawEventKey::generate(self.config.prefix(), Utc::now());
        debug!(bucket = self.config.bucket(), key = key.as_str(), "生ペイロードを書き込み");

        self.client
            .put_object()
            .bucket(self.config.bucket())
            .key(key.as_str())
            .content_type("application/json")
            .body(ByteStream::from(body.as_bytes().to_vec()))
            .send()
            .await
            .map_err(|e| RawEventStoreError::AwsSdkError(e.to_string()))?;

        info!(key = key.as_str(), bytes = body.len(), "生ペイロードの保全に成功");
        Ok(key)
    }
}
