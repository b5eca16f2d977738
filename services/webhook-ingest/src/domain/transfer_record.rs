/// トークン送金レコード抽出
///
/// Webhookペイロード（任意のJSON）からtokenTransfers要素を寛容に抽出する。
/// 必須フィールドが欠けた要素はエラーにせずスキップとして記録する。
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// ウェアハウスに書き込むタイムスタンプの書式
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Webhookペイロードから抽出した1件の送金レコード
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRecord {
    /// トランザクションのタイムスタンプ（なければ受信時刻）
    pub timestamp: String,
    /// 送金元アカウントアドレス
    pub user_address: String,
    /// トークン（アセット）識別子
    pub token_mint: String,
    /// 送金数量
    pub amount: f64,
}

/// 要素をスキップした理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 要素がJSONオブジェクトでない
    NotAnObject,
    /// fromUserAccountフィールドが欠落または文字列でない
    MissingUserAccount,
    /// mintフィールドが欠落または文字列でない
    MissingMint,
    /// tokenAmountフィールドが欠落または数値でない
    MissingAmount,
}

/// tokenTransfers要素ごとの抽出結果
///
/// 欠落フィールドによる脱落を暗黙の制御フローではなくデータとして表現する。
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// 必須フィールドがすべて揃った要素
    Record(TransferRecord),
    /// 必須フィールドが欠けた要素（理由付き）
    Skipped(SkipReason),
}

impl Extraction {
    /// 抽出に成功したレコードを取り出す
    pub fn into_record(self) -> Option<TransferRecord> {
        match self {
            Extraction::Record(record) => Some(record),
            Extraction::Skipped(_) => None,
        }
    }
}

/// Webhookペイロードから送金レコードを抽出する
///
/// ペイロードはトランザクションオブジェクト単体、またはトランザクションの
/// 配列を受け付ける。各トランザクションの`tokenTransfers`配列の要素ごとに
/// `fromUserAccount` / `mint` / `tokenAmount`を読み取り、入力順を保って
/// 結果を返す。`tokenTransfers`を持たないトランザクションは結果に寄与しない。
///
/// # 引数
/// * `payload` - パース済みWebhookペイロード
/// * `arrival` - リクエスト受信時刻（トランザクションにtimestampがない場合に使用）
pub fn extract_transfers(payload: &Value, arrival: DateTime<Utc>) -> Vec<Extraction> {
    let transactions: Vec<&Value> = match payload.as_array() {
        Some(list) => list.iter().collect(),
        None => vec![payload],
    };

    let mut extractions = Vec::new();
    for tx in transactions {
        // 要素がさらに配列でネストしている場合は先頭要素を採用する
        let tx = match tx.as_array() {
            Some(inner) => match inner.first() {
                Some(first) => first,
                None => continue,
            },
            None => tx,
        };

        let transfers = match tx.get("tokenTransfers").and_then(Value::as_array) {
            Some(transfers) => transfers,
            None => continue,
        };

        let timestamp = transaction_timestamp(tx, arrival);
        for transfer in transfers {
            extractions.push(extract_one(transfer, &timestamp));
        }
    }
    extractions
}

/// tokenTransfersの1要素を抽出する
fn extract_one(transfer: &Value, timestamp: &str) -> Extraction {
    if !transfer.is_object() {
        return Extraction::Skipped(SkipReason::NotAnObject);
    }

    let user_address = match transfer.get("fromUserAccount").and_then(Value::as_str) {
        Some(address) => address,
        None => return Extraction::Skipped(SkipReason::MissingUserAccount),
    };

    let token_mint = match transfer.get("mint").and_then(Value::as_str) {
        Some(mint) => mint,
        None => return Extraction::Skipped(SkipReason::MissingMint),
    };

    let amount = match transfer.get("tokenAmount").and_then(Value::as_f64) {
        Some(amount) => amount,
        None => return Extraction::Skipped(SkipReason::MissingAmount),
    };

    Extraction::Record(TransferRecord {
        timestamp: timestamp.to_string(),
        user_address: user_address.to_string(),
        token_mint: token_mint.to_string(),
        amount,
    })
}

/// トランザクションのタイムスタンプ文字列を決定する
///
/// - 数値: エポック秒として解釈し書式化
/// - 文字列: そのまま使用（送信元で書式化済み）
/// - それ以外・欠落: 受信時刻を書式化
fn transaction_timestamp(tx: &Value, arrival: DateTime<Utc>) -> String {
    match tx.get("timestamp") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or(arrival)
            .format(TIMESTAMP_FORMAT)
            .to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => arrival.format(TIMESTAMP_FORMAT).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn arrival() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_extract_single_transfer() {
        let payload = json!({
            "tokenTransfers": [
                {"fromUserAccount": "u1", "mint": "m1", "tokenAmount": 100}
            ]
        });

        let extractions = extract_transfers(&payload, arrival());

        assert_eq!(extractions.len(), 1);
        match &extractions[0] {
            Extraction::Record(record) => {
                assert_eq!(record.user_address, "u1");
                assert_eq!(record.token_mint, "m1");
                assert_eq!(record.amount, 100.0);
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_mint_and_amount_is_skipped() {
        let payload = json!({
            "tokenTransfers": [
                {"fromUserAccount": "u1"}
            ]
        });

        let extractions = extract_transfers(&payload, arrival());

        assert_eq!(extractions, vec![Extraction::Skipped(SkipReason::MissingMint)]);
    }

    #[test]
    fn test_malformed_elements_do_not_abort_extraction() {
        let payload = json!({
            "tokenTransfers": [
                {"fromUserAccount": "u1", "mint": "m1", "tokenAmount": 1.5},
                {"mint": "m2", "tokenAmount": 2},
                {"fromUserAccount": "u3", "mint": "m3", "tokenAmount": "not a number"},
                "not an object",
                {"fromUserAccount": "u5", "mint": "m5", "tokenAmount": 5}
            ]
        });

        let extractions = extract_transfers(&payload, arrival());

        // 入力順を保ち、欠落要素はスキップとして記録される
        assert_eq!(extractions.len(), 5);
        assert!(matches!(extractions[0], Extraction::Record(_)));
        assert_eq!(extractions[1], Extraction::Skipped(SkipReason::MissingUserAccount));
        assert_eq!(extractions[2], Extraction::Skipped(SkipReason::MissingAmount));
        assert_eq!(extractions[3], Extraction::Skipped(SkipReason::NotAnObject));
        match &extractions[4] {
            Extraction::Record(record) => assert_eq!(record.user_address, "u5"),
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_as_transaction_array() {
        let payload = json!([
            {"tokenTransfers": [{"fromUserAccount": "a", "mint": "x", "tokenAmount": 1}]},
            {"tokenTransfers": [{"fromUserAccount": "b", "mint": "y", "tokenAmount": 2}]}
        ]);

        let records: Vec<_> = extract_transfers(&payload, arrival())
            .into_iter()
            .filter_map(Extraction::into_record)
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_address, "a");
        assert_eq!(records[1].user_address, "b");
    }

    #[test]
    fn test_nested_transaction_list_uses_first_element() {
        let payload = json!([
            [{"tokenTransfers": [{"fromUserAccount": "a", "mint": "x", "tokenAmount": 1}]}]
        ]);

        let records: Vec<_> = extract_transfers(&payload, arrival())
            .into_iter()
            .filter_map(Extraction::into_record)
            .collect();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_address, "a");
    }

    #[test]
    fn test_transaction_without_token_transfers_yields_nothing() {
        let payload = json!({"signature": "sig", "type": "UNKNOWN"});

        let extractions = extract_transfers(&payload, arrival());

        assert!(extractions.is_empty());
    }

    #[test]
    fn test_numeric_timestamp_is_formatted() {
        let payload = json!({
            "timestamp": 1700000000,
            "tokenTransfers": [{"fromUserAccount": "u1", "mint": "m1", "tokenAmount": 1}]
        });

        let records: Vec<_> = extract_transfers(&payload, arrival())
            .into_iter()
            .filter_map(Extraction::into_record)
            .collect();

        assert_eq!(records[0].timestamp, "2023-11-14 22:13:20");
    }

    #[test]
    fn test_string_timestamp_is_used_verbatim() {
        let payload = json!({
            "timestamp": "2024-01-02 03:04:05",
            "tokenTransfers": [{"fromUserAccount": "u1", "mint": "m1", "tokenAmount": 1}]
        });

        let records: Vec<_> = extract_transfers(&payload, arrival())
            .into_iter()
            .filter_map(Extraction::into_record)
            .collect();

        assert_eq!(records[0].timestamp, "2024-01-02 03:04:05");
    }

    #[test]
    fn test_missing_timestamp_falls_back_to_arrival_time() {
        let payload = json!({
            "tokenTransfers": [{"fromUserAccount": "u1", "mint": "m1", "tokenAmount": 1}]
        });

        let records: Vec<_> = extract_transfers(&payload, arrival())
            .into_iter()
            .filter_map(Extraction::into_record)
            .collect();

        assert_eq!(records[0].timestamp, "2023-11-14 22:13:20");
    }

    #[test]
    fn test_fractional_amount_is_preserved() {
        let payload = json!({
            "tokenTransfers": [{"fromUserAccount": "u1", "mint": "m1", "tokenAmount": 0.000123}]
        });

        let records: Vec<_> = extract_transfers(&payload, arrival())
            .into_iter()
            .filter_map(Extraction::into_record)
            .collect();

        assert_eq!(records[0].amount, 0.000123);
    }
}
