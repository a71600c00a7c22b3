//! 補正パッチステージ
//!
//! 既知の崩れた表記に対する、順序付きの正規表現書き換えを適用します。
//! 書き換えは副作用のない文字列変換で、到達水準には触れません。
//! パッチは街区・住居番号の解決（後続ステージ）が期待する
//! `N-N-N`形の断片へ残余を整えます。

use regex::Regex;

use crate::errors::Result;
use crate::pipeline::Stage;
use crate::query::Query;

/// 補正パッチステージ
pub struct PatchStage {
    patches: Vec<(Regex, String)>,
}

impl PatchStage {
    /// 既定のパッチ一覧でステージを作成します。
    pub fn new() -> Result<Self> {
        let rules: &[(&str, &str)] = &[
            // 町字一致後に残った先頭の接続詞
            (r"^[のノ之]+", ""),
            // 数字間の接続詞はハイフン区切りへ
            (r"([0-9])[のノ之]([0-9])", "$1-$2"),
            // 連続ハイフンの collapse
            (r"-{2,}", "-"),
            // 丁目 collapse の残骸（ハイフンのみの残余）
            (r"^-+$", ""),
        ];
        let mut patches = Vec::with_capacity(rules.len());
        for (pattern, replacement) in rules {
            patches.push((Regex::new(pattern)?, (*replacement).to_string()));
        }
        Ok(Self { patches })
    }
}

impl Stage for PatchStage {
    fn name(&self) -> &'static str {
        "patch"
    }

    fn process(&self, query: Query) -> Result<Vec<Query>> {
        let mut seq = query.temp_address.clone();
        for (re, replacement) in &self.patches {
            // 重なり合う一致（2の1の1など）は不動点まで適用する
            loop {
                let next = seq.replace_all(re, replacement);
                if next == seq {
                    break;
                }
                seq = next;
            }
        }
        let mut next = query;
        next.temp_address = seq;
        Ok(vec![next])
    }
}
