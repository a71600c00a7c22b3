//! 住所解決パイプラインの骨組み
//!
//! パイプラインは、[`Query`]を受け取り0件以上の[`Query`]を返すステージの列
//! です。ステージは構築時に渡された参照構造以外の状態を持たず、外部の
//! ドライバ（[`Pipeline`]）が合成します。レコードの順序はステージ間で
//! 保存されます。
//!
//! すべてのステージは到達水準について冪等です。対象水準に達している
//! レコードは変更されずに通過します。

mod city;
mod city_recovery;
mod ingest;
mod parcel;
mod patch;
mod prefecture;
mod residence;
mod town;

pub use city::{CityIndex, CityStage};
pub use city_recovery::CityRecoveryStage;
pub use ingest::{filter_line, IngestStage};
pub use parcel::{ParcelIndex, ParcelStage};
pub use patch::PatchStage;
pub use prefecture::PrefectureStage;
pub use residence::{ResidenceIndex, ResidenceStage};
pub use town::{TownIndex, TownStage};

use tracing::trace;

use crate::errors::Result;
use crate::query::Query;

/// レコード変換ステージ
///
/// 1件の入力から0件以上の出力を生成します。複数件の出力は候補の分岐を
/// 表し、後続ステージの確定処理で1件に絞られます。
pub trait Stage: Send + Sync {
    /// ステージ名を返します。ログとテストで使用されます。
    fn name(&self) -> &'static str;

    /// レコードを変換します。
    fn process(&self, query: Query) -> Result<Vec<Query>>;
}

/// ステージ列を合成するドライバ
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// ステージ列からパイプラインを作成します。
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// 1件のレコードを全ステージに通します。
    ///
    /// 各ステージの出力はそのまま次のステージの入力になります。
    pub fn process(&self, query: Query) -> Result<Vec<Query>> {
        let mut records = vec![query];
        for stage in &self.stages {
            let mut next = Vec::with_capacity(records.len());
            for record in records {
                let produced = stage.process(record)?;
                trace!(stage = stage.name(), count = produced.len(), "stage output");
                next.extend(produced);
            }
            records = next;
        }
        Ok(records)
    }

    /// ステージ数を返します。
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// ステージが無いかどうかを返します。
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
