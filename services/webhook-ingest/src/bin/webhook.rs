/// Webhook受信HTTP Lambdaエントリポイント
///
/// API Gateway経由で届くトランザクション通知Webhookを処理し、
/// 生ペイロードのS3保全・ウェアハウス挿入・オーケストレータ通知を
/// 直列に実行して結果をJSONで返却する。
use lambda_http::{Body, Error, Request, Response, run, service_fn};
use tracing::{error, info, warn};
use webhook_ingest::application::IngestPipeline;
use webhook_ingest::domain::IngestReport;
use webhook_ingest::infrastructure::{
    AirflowTrigger, OrchestratorConfig, S3RawEventStore, SnowflakeSink, StorageConfig,
    WarehouseConfig, init_logging,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    info!("Webhook取り込みLambda関数を初期化");

    // Lambda関数を実行
    run(service_fn(handler)).await
}

/// HTTPリクエストハンドラー
///
/// # 処理フロー
/// 1. 環境変数から各コラボレータの設定を読み込み（呼び出しごと）
/// 2. 取り込みパイプラインを構築して実行
/// 3. レポートをHTTPレスポンスへ変換（200 / 400 / 500）
///
/// 設定不備や下流の障害はパイプライン内で劣化として扱われるため、
/// ここで500になるのはレスポンス構築自体が失敗した場合のみ。
async fn handler(request: Request) -> Result<Response<Body>, Error> {
    let body = String::from_utf8_lossy(request.body()).into_owned();
    info!(bytes = body.len(), "Webhookリクエスト受信");

    let pipeline = build_pipeline().await;
    let report = pipeline.handle(&body).await;

    info!(status = report.status_code(), "Webhookレスポンス送信");
    respond(&report)
}

/// 環境変数から取り込みパイプラインを構築する
///
/// 設定はプロセス全体の状態として保持せず、呼び出しごとに構築して
/// パラメータとして渡す。未構成のコラボレータはNoneとなり、
/// 該当ステップは劣化またはスキップとして記録される。
async fn build_pipeline() -> IngestPipeline<S3RawEventStore, SnowflakeSink, AirflowTrigger> {
    let raw_store = match StorageConfig::from_env() {
        Ok(config) => {
            // 環境からAWS設定を読み込み（認証情報、リージョンなど）
            let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let client = aws_sdk_s3::Client::new(&aws_config);
            Some(S3RawEventStore::new(client, config))
        }
        Err(e) => {
            warn!(error = %e, "ストレージ設定を読み込めないため生ペイロード保全を無効化");
            None
        }
    };

    let warehouse = match WarehouseConfig::from_env() {
        Ok(config) => Some(SnowflakeSink::new(config)),
        Err(e) => {
            warn!(error = %e, "ウェアハウス設定を読み込めないため挿入を無効化");
            None
        }
    };

    let trigger = OrchestratorConfig::from_env().map(AirflowTrigger::new);

    IngestPipeline::new(raw_store, warehouse, trigger)
}

/// レポートをHTTPレスポンスへ変換する
fn respond(report: &IngestReport) -> Result<Response<Body>, Error> {
    let body = serde_json::to_string(&report.body()).map_err(|e| {
        error!(error = %e, "レスポンスボディのシリアライズに失敗");
        Error::from(e)
    })?;

    Response::builder()
        .status(report.status_code())
        .header("Content-Type", "application/json")
        .body(Body::Text(body))
        .map_err(|e| {
            error!(error = %e, "レスポンス構築に失敗");
            Error::from(e)
        })
}
