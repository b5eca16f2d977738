/// Webhook取り込みパイプライン
///
/// 1回の呼び出しで以下を直列に実行する:
/// 1. 生ペイロードのS3保全（ボディの形式に関わらず必ず1回試行）
/// 2. JSONパース（失敗時は以降をスキップしてクライアントエラー）
/// 3. 送金レコードの寛容な抽出
/// 4. ウェアハウスへの挿入（1件以上抽出された場合のみ）
/// 5. オーケストレータへのトリガー通知（挿入成功時のみ）
///
/// 外部呼び出しはすべて1回のみ試行し、失敗はStepOutcomeとして記録する。
/// 呼び出し元（Webhook送信元）には可能な限り2xxを返す方針。
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{Extraction, IngestReport, StepOutcome, extract_transfers};
use crate::infrastructure::{OrchestratorTrigger, RawEventStore, WarehouseSink};

/// Webhook取り込みパイプライン
///
/// 各コラボレータはトレイトで抽象化され、未構成（None）の場合は
/// 該当ステップが劣化またはスキップとして記録される。
pub struct IngestPipeline<RS, WS, OT>
where
    RS: RawEventStore,
    WS: WarehouseSink,
    OT: OrchestratorTrigger,
{
    /// 生ペイロードストア
    raw_store: Option<RS>,
    /// ウェアハウスシンク
    warehouse: Option<WS>,
    /// オーケストレータトリガー
    trigger: Option<OT>,
}

impl<RS, WS, OT> IngestPipeline<RS, WS, OT>
where
    RS: RawEventStore,
    WS: WarehouseSink,
    OT: OrchestratorTrigger,
{
    /// 新しいIngestPipelineを作成
    pub fn new(raw_store: Option<RS>, warehouse: Option<WS>, trigger: Option<OT>) -> Self {
        Self {
            raw_store,
            warehouse,
            trigger,
        }
    }

    /// 1件のWebhookボディを処理してレポートを返す
    pub async fn handle(&self, body: &str) -> IngestReport {
        let arrival = Utc::now();

        // 1. 生ペイロード保全（ベストエフォート、失敗しても続行）
        let raw_capture = self.capture_raw(body).await;

        // 2. JSONパース（失敗時は以降のステップをスキップ）
        let payload: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                info!(error = %e, "リクエストボディがJSONとして不正");
                return IngestReport::Rejected {
                    raw_capture,
                    reason: e.to_string(),
                };
            }
        };

        // 3. 送金レコードの抽出（欠落要素はスキップとして記録）
        let extractions = extract_transfers(&payload, arrival);
        let total = extractions.len();
        let records: Vec<_> = extractions
            .into_iter()
            .filter_map(Extraction::into_record)
            .collect();
        let records_skipped = total - records.len();
        if records_skipped > 0 {
            warn!(
                records_skipped = records_skipped,
                "必須フィールド欠落の要素をスキップ"
            );
        }
        debug!(records = records.len(), "抽出完了");

        // 4. ウェアハウスへの挿入（失敗してもレスポンスは成功クラスを維持）
        let warehouse = self.insert_records(&records).await;

        // 5. オーケストレータ通知（挿入成功時のみ、失敗は完全に無視）
        let trigger = self.notify_orchestrator(&warehouse, records.len()).await;

        IngestReport::Completed {
            raw_capture,
            records_processed: records.len(),
            records_skipped,
            warehouse,
            trigger,
        }
    }

    /// 生ペイロードを保全する
    async fn capture_raw(&self, body: &str) -> StepOutcome {
        let Some(store) = &self.raw_store else {
            warn!("ストレージが未構成のため生ペイロード保全をスキップ");
            return StepOutcome::Degraded("storage not configured".to_string());
        };

        match store.capture(body).await {
            Ok(key) => {
                debug!(key = key.as_str(), "生ペイロードを保全");
                StepOutcome::Success
            }
            Err(e) => {
                // 保全はベストエフォート。失敗してもリクエスト処理は続行する
                warn!(error = %e, "生ペイロードの保全に失敗");
                StepOutcome::Degraded(e.to_string())
            }
        }
    }

    /// 抽出済みレコードをウェアハウスへ挿入する
    async fn insert_records(&self, records: &[crate::domain::TransferRecord]) -> StepOutcome {
        if records.is_empty() {
            info!("挿入対象レコードがないためウェアハウス書き込みをスキップ");
            return StepOutcome::Skipped;
        }

        let Some(sink) = &self.warehouse else {
            warn!("ウェアハウスが未構成のため挿入できません");
            return StepOutcome::Degraded("warehouse not configured".to_string());
        };

        match sink.insert_transfers(records).await {
            Ok(inserted) => {
                info!(inserted = inserted, "ウェアハウスへの挿入が完了");
                StepOutcome::Success
            }
            Err(e) => {
                warn!(error = %e, "ウェアハウスへの挿入に失敗。レスポンスは成功クラスを維持");
                StepOutcome::Degraded(e.to_string())
            }
        }
    }

    /// オーケストレータへDAG実行をトリガーする
    async fn notify_orchestrator(
        &self,
        warehouse: &StepOutcome,
        records_processed: usize,
    ) -> StepOutcome {
        if !warehouse.is_success() {
            return StepOutcome::Skipped;
        }

        let Some(trigger) = &self.trigger else {
            debug!("オーケストレータが未構成のためトリガーをスキップ");
            return StepOutcome::Skipped;
        };

        match trigger.trigger(records_processed).await {
            Ok(run_id) => {
                info!(run_id = %run_id, "オーケストレータへのトリガーに成功");
                StepOutcome::Success
            }
            Err(e) => {
                warn!(error = %e, "オーケストレータへのトリガーに失敗（無視）");
                StepOutcome::Degraded(e.to_string())
            }
        }
    }
}
