//! 地番解決ステージ
//!
//! 住居表示を実施していない町字（`rsdt_addr_flg = 0`）について、残余の
//! `N[-N[-N]]`形断片を地番に解決します。

use std::sync::Arc;

use hashbrown::HashMap;

use crate::charseq::CharSeq;
use crate::dictionary::ParcelInfo;
use crate::errors::Result;
use crate::init::Background;
use crate::pipeline::Stage;
use crate::query::{MatchLevel, Query};
use crate::trie::{FindOptions, TrieAddressFinder};

/// 地番の照合索引
pub struct ParcelIndex {
    /// 町字キーごとの地番トライ
    parcels: HashMap<i64, TrieAddressFinder<ParcelInfo>>,
}

impl ParcelIndex {
    /// 地番表から索引を構築します。
    pub fn build(parcels: Vec<ParcelInfo>) -> Result<Self> {
        let mut tries: HashMap<i64, TrieAddressFinder<ParcelInfo>> = HashMap::new();
        for info in parcels {
            tries
                .entry(info.town_key)
                .or_default()
                .append(info.key.clone(), info);
        }
        Ok(Self { parcels: tries })
    }
}

/// 地番解決ステージ
pub struct ParcelStage {
    index: Arc<Background<ParcelIndex>>,
    fuzzy: Option<char>,
}

impl ParcelStage {
    /// 共有索引からステージを作成します。
    pub fn new(index: Arc<Background<ParcelIndex>>, fuzzy: Option<char>) -> Self {
        Self { index, fuzzy }
    }
}

impl Stage for ParcelStage {
    fn name(&self) -> &'static str {
        "parcel"
    }

    fn process(&self, query: Query) -> Result<Vec<Query>> {
        if query.match_level >= MatchLevel::Parcel {
            return Ok(vec![query]);
        }
        let Some(town_key) = query.town_key else {
            return Ok(vec![query]);
        };
        if query.rsdt_addr_flg != Some(0) {
            return Ok(vec![query]);
        }
        let index = self.index.wait()?;
        let Some(trie) = index.parcels.get(&town_key) else {
            return Ok(vec![query]);
        };

        let mut skip = 0;
        while query.temp_address.char_at(skip) == Some('-') {
            skip += 1;
        }
        let target: CharSeq = query.temp_address.tail_from(skip);
        let matches = trie.find(
            &target,
            &FindOptions {
                fuzzy: self.fuzzy,
                ..Default::default()
            },
        )?;
        let Some(m) = matches.first() else {
            return Ok(vec![query]);
        };

        let mut resolved = query.with_tail(m.unmatched.clone(), skip + m.depth);
        resolved.parcel_key = Some(m.info.parcel_key);
        resolved.prc_id = Some(m.info.prc_id.clone());
        resolved.prc_num1 = Some(m.info.prc_num1.clone());
        resolved.prc_num2 = m.info.prc_num2.clone();
        resolved.prc_num3 = m.info.prc_num3.clone();
        resolved.match_level = MatchLevel::Parcel;
        if let (Some(lat), Some(lon)) = (m.info.rep_lat, m.info.rep_lon) {
            resolved = resolved.with_coordinates(lat, lon, MatchLevel::Parcel);
        }
        Ok(vec![resolved])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::address_key;
    use crate::normalizer::normalize_str;

    fn fixture() -> (ParcelStage, i64) {
        let town_key = address_key(&["town", "075078", "0003000"]);
        let parcels = vec![ParcelInfo {
            parcel_key: address_key(&["075078", "0003000", "00015000200000", "", "", "0"]),
            town_key,
            lg_code: "075078".to_string(),
            machiaza_id: "0003000".to_string(),
            prc_id: "00015000200000".to_string(),
            prc_num1: "150".to_string(),
            prc_num2: Some("2".to_string()),
            prc_num3: None,
            rep_lat: Some(37.157),
            rep_lon: Some(140.448),
            key: normalize_str("150-2"),
        }];
        let index = Arc::new(Background::ready(ParcelIndex::build(parcels).unwrap()));
        (ParcelStage::new(index, None), town_key)
    }

    fn town_resolved(rest: &str, town_key: i64) -> Query {
        let mut q = Query::new(format!("福島県石川郡石川町大字下泉{}", rest));
        q.temp_address = CharSeq::from_input(rest);
        q.town_key = Some(town_key);
        q.rsdt_addr_flg = Some(0);
        q.match_level = MatchLevel::Machiaza;
        q
    }

    #[test]
    fn test_parcel_resolution() {
        let (stage, town_key) = fixture();
        let out = stage.process(town_resolved("150-2", town_key)).unwrap();
        assert_eq!(out[0].match_level, MatchLevel::Parcel);
        assert_eq!(out[0].prc_num1.as_deref(), Some("150"));
        assert_eq!(out[0].prc_num2.as_deref(), Some("2"));
        assert_eq!(out[0].coordinate_level, MatchLevel::Parcel);
    }

    #[test]
    fn test_residential_town_passes_through() {
        let (stage, town_key) = fixture();
        let mut q = town_resolved("150-2", town_key);
        q.rsdt_addr_flg = Some(1);
        let out = stage.process(q).unwrap();
        assert_eq!(out[0].match_level, MatchLevel::Machiaza);
        assert!(out[0].parcel_key.is_none());
    }

    #[test]
    fn test_no_parcel_match_keeps_record() {
        let (stage, town_key) = fixture();
        let out = stage.process(town_resolved("999", town_key)).unwrap();
        assert_eq!(out[0].match_level, MatchLevel::Machiaza);
        assert_eq!(out[0].temp_address.to_string(), "999");
    }
}
