// ドメイン層モジュール
pub mod step_outcome;
pub mod transfer_record;

// 再エクスポート
pub use step_outcome::{IngestReport, ResponseBody, StepOutcome};
pub use transfer_record::{Extraction, SkipReason, TransferRecord, extract_transfers};
