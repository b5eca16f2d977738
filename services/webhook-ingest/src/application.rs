// アプリケーション層モジュール
pub mod ingest_pipeline;

// 再エクスポート
pub use ingest_pipeline::IngestPipeline;
