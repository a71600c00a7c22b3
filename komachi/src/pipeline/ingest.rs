//! 取り込みステージ
//!
//! 入力行の幅寄せ、空白の除去、郵便番号の除去、および辞書照合に先立つ
//! 正規化を行います。到達水準には触れません。

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::Result;
use crate::normalizer::{fold_dashes_seq, fold_width_seq, normalize_seq};
use crate::pipeline::Stage;
use crate::query::Query;

/// 行頭の郵便番号（〒NNN-NNNN）
fn zip_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:〒\d{3}-?\d{4}|\d{3}-\d{4})").unwrap())
}

/// 入力行をパイプラインへ載せる前のフィルタです。
///
/// 改行を落とし、空行と`#`または`//`で始まるコメント行に対しては`None`を
/// 返します。
pub fn filter_line(line: &str) -> Option<&str> {
    let trimmed = line.trim_end_matches(['\r', '\n']).trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
        None
    } else {
        Some(trimmed)
    }
}

/// 取り込み正規化ステージ
///
/// 全角ASCIIの半角化、ダッシュ類の折り畳み、空白の除去、行頭の郵便番号の
/// 除去を行い、続けて辞書キーと同じ正規化を適用します。
pub struct IngestStage;

impl Stage for IngestStage {
    fn name(&self) -> &'static str {
        "ingest"
    }

    fn process(&self, query: Query) -> Result<Vec<Query>> {
        let seq = fold_width_seq(&query.temp_address);
        let seq = fold_dashes_seq(&seq);
        let seq = seq.remove_chars(|ch| ch == ' ' || ch == '\t');
        let seq = seq.replace_all(zip_code_re(), "");
        let seq = normalize_seq(&seq);

        let mut next = query;
        next.temp_address = seq;
        Ok(vec![next])
    }
}
