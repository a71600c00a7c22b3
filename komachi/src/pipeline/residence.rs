//! 街区・住居番号解決ステージ
//!
//! 住居表示を実施している町字（`rsdt_addr_flg = 1`）について、残余の
//! `N-N-N`形断片を街区符号と住居番号に解決します。街区の一致で代表座標が
//! 付与され、住居番号まで一致すればさらに深い水準の座標に置き換わります。

use std::sync::Arc;

use hashbrown::HashMap;

use crate::charseq::CharSeq;
use crate::dictionary::{RsdtBlkInfo, RsdtDspInfo};
use crate::errors::Result;
use crate::init::Background;
use crate::pipeline::Stage;
use crate::query::{MatchLevel, Query};
use crate::trie::{FindOptions, TrieAddressFinder};

/// 街区・住居番号の照合索引
pub struct ResidenceIndex {
    /// 町字キーごとの街区トライ
    blks: HashMap<i64, TrieAddressFinder<RsdtBlkInfo>>,
    /// 街区キーごとの住居番号トライ
    dsps: HashMap<i64, TrieAddressFinder<RsdtDspInfo>>,
}

impl ResidenceIndex {
    /// 街区表と住居番号表から索引を構築します。
    pub fn build(blks: Vec<RsdtBlkInfo>, dsps: Vec<RsdtDspInfo>) -> Result<Self> {
        let mut blk_tries: HashMap<i64, TrieAddressFinder<RsdtBlkInfo>> = HashMap::new();
        for info in blks {
            blk_tries
                .entry(info.town_key)
                .or_default()
                .append(info.key.clone(), info);
        }
        let mut dsp_tries: HashMap<i64, TrieAddressFinder<RsdtDspInfo>> = HashMap::new();
        for info in dsps {
            dsp_tries
                .entry(info.rsdtblk_key)
                .or_default()
                .append(info.key.clone(), info);
        }
        Ok(Self {
            blks: blk_tries,
            dsps: dsp_tries,
        })
    }
}

/// 先頭の区切りハイフンを消費した連鎖と消費数を返します。
fn trim_leading_hyphen(seq: &CharSeq) -> (CharSeq, usize) {
    let mut skip = 0;
    while seq.char_at(skip) == Some('-') {
        skip += 1;
    }
    (seq.tail_from(skip), skip)
}

/// 街区・住居番号解決ステージ
pub struct ResidenceStage {
    index: Arc<Background<ResidenceIndex>>,
    fuzzy: Option<char>,
}

impl ResidenceStage {
    /// 共有索引からステージを作成します。
    pub fn new(index: Arc<Background<ResidenceIndex>>, fuzzy: Option<char>) -> Self {
        Self { index, fuzzy }
    }
}

impl Stage for ResidenceStage {
    fn name(&self) -> &'static str {
        "residence"
    }

    fn process(&self, query: Query) -> Result<Vec<Query>> {
        if query.match_level >= MatchLevel::ResidentialBlock {
            return Ok(vec![query]);
        }
        let Some(town_key) = query.town_key else {
            return Ok(vec![query]);
        };
        if query.rsdt_addr_flg != Some(1) {
            return Ok(vec![query]);
        }
        let index = self.index.wait()?;
        let Some(blk_trie) = index.blks.get(&town_key) else {
            return Ok(vec![query]);
        };
        let opts = FindOptions {
            fuzzy: self.fuzzy,
            ..Default::default()
        };

        let (target, skipped) = trim_leading_hyphen(&query.temp_address);
        let matches = blk_trie.find(&target, &opts)?;
        let Some(blk) = matches.first() else {
            return Ok(vec![query]);
        };

        let mut resolved = query.with_tail(blk.unmatched.clone(), skipped + blk.depth);
        resolved.rsdtblk_key = Some(blk.info.rsdtblk_key);
        resolved.block = Some(blk.info.blk_num.clone());
        resolved.block_id = Some(blk.info.blk_id.clone());
        resolved.match_level = MatchLevel::ResidentialBlock;
        if let (Some(lat), Some(lon)) = (blk.info.rep_lat, blk.info.rep_lon) {
            resolved = resolved.with_coordinates(lat, lon, MatchLevel::ResidentialBlock);
        }

        // 住居番号は街区が確定した場合のみ照合する
        if let Some(dsp_trie) = index.dsps.get(&blk.info.rsdtblk_key) {
            let (target, skipped) = trim_leading_hyphen(&resolved.temp_address);
            let matches = dsp_trie.find(&target, &opts)?;
            if let Some(dsp) = matches.first() {
                resolved = resolved.with_tail(dsp.unmatched.clone(), skipped + dsp.depth);
                resolved.rsdtdsp_key = Some(dsp.info.rsdtdsp_key);
                resolved.rsdt_num = Some(dsp.info.rsdt_num.clone());
                resolved.rsdt_id = Some(dsp.info.rsdt_id.clone());
                resolved.rsdt_num2 = dsp.info.rsdt_num2.clone();
                resolved.rsdt2_id = dsp.info.rsdt2_id.clone();
                resolved.match_level = MatchLevel::ResidentialDetail;
                if let (Some(lat), Some(lon)) = (dsp.info.rep_lat, dsp.info.rep_lon) {
                    resolved = resolved.with_coordinates(lat, lon, MatchLevel::ResidentialDetail);
                }
            }
        }

        Ok(vec![resolved])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::address_key;
    use crate::normalizer::normalize_str;

    fn fixture() -> (ResidenceStage, i64) {
        let town_key = address_key(&["town", "011011", "0001001"]);
        let blks = vec![RsdtBlkInfo {
            rsdtblk_key: address_key(&["011011", "0001001", "002", "", "", "1"]),
            town_key,
            lg_code: "011011".to_string(),
            machiaza_id: "0001001".to_string(),
            blk_id: "002".to_string(),
            blk_num: "2".to_string(),
            rep_lat: Some(43.061),
            rep_lon: Some(141.354),
            key: normalize_str("2"),
        }];
        let dsps = vec![RsdtDspInfo {
            rsdtdsp_key: address_key(&["011011", "0001001", "002", "001", "", "1"]),
            rsdtblk_key: blks[0].rsdtblk_key,
            lg_code: "011011".to_string(),
            machiaza_id: "0001001".to_string(),
            blk_id: "002".to_string(),
            rsdt_id: "001".to_string(),
            rsdt2_id: None,
            rsdt_num: "1".to_string(),
            rsdt_num2: Some("1".to_string()),
            rep_lat: Some(43.0615),
            rep_lon: Some(141.3542),
            key: normalize_str("1-1"),
        }];
        let index = Arc::new(Background::ready(ResidenceIndex::build(blks, dsps).unwrap()));
        (ResidenceStage::new(index, None), town_key)
    }

    fn town_resolved(rest: &str, town_key: i64) -> Query {
        let mut q = Query::new(format!("北海道札幌市中央区北一条西{}", rest));
        q.temp_address = CharSeq::from_input(rest);
        q.town_key = Some(town_key);
        q.rsdt_addr_flg = Some(1);
        q.match_level = MatchLevel::MachiazaDetail;
        q
    }

    #[test]
    fn test_block_and_residence_resolution() {
        let (stage, town_key) = fixture();
        let out = stage.process(town_resolved("2-1-1", town_key)).unwrap();
        assert_eq!(out[0].match_level, MatchLevel::ResidentialDetail);
        assert_eq!(out[0].block.as_deref(), Some("2"));
        assert_eq!(out[0].rsdt_num.as_deref(), Some("1"));
        assert_eq!(out[0].rsdt_num2.as_deref(), Some("1"));
        assert_eq!(out[0].coordinate_level, MatchLevel::ResidentialDetail);
    }

    #[test]
    fn test_block_only_resolution() {
        let (stage, town_key) = fixture();
        let out = stage.process(town_resolved("2", town_key)).unwrap();
        assert_eq!(out[0].match_level, MatchLevel::ResidentialBlock);
        assert_eq!(out[0].rsdt_num, None);
        assert_eq!(out[0].coordinate_level, MatchLevel::ResidentialBlock);
    }

    #[test]
    fn test_parcel_town_passes_through() {
        let (stage, town_key) = fixture();
        let mut q = town_resolved("2-1-1", town_key);
        q.rsdt_addr_flg = Some(0);
        let out = stage.process(q).unwrap();
        assert_eq!(out[0].match_level, MatchLevel::MachiazaDetail);
        assert!(out[0].rsdtblk_key.is_none());
    }
}
