//! 市区町村の二次回復ステージ
//!
//! 前段で取りこぼした市区町村を、行政接尾辞（市・町・村・区）の欠落を
//! 許容する緩い照合で拾います。到達水準が市区町村未満のレコードに
//! のみ適用されます。

use std::sync::Arc;

use crate::errors::Result;
use crate::init::Background;
use crate::pipeline::city::{finalize_candidates, CityIndex};
use crate::pipeline::Stage;
use crate::query::{MatchLevel, Query};
use crate::trie::FindOptions;

/// 省略可能な行政接尾辞
const CITY_SUFFIXES: &[char] = &['市', '町', '村', '区'];

/// 市区町村回復ステージ
pub struct CityRecoveryStage {
    index: Arc<Background<CityIndex>>,
    fuzzy: Option<char>,
}

impl CityRecoveryStage {
    /// 検出ステージと同じ共有索引からステージを作成します。
    pub fn new(index: Arc<Background<CityIndex>>, fuzzy: Option<char>) -> Self {
        Self { index, fuzzy }
    }
}

impl Stage for CityRecoveryStage {
    fn name(&self) -> &'static str {
        "city_recovery"
    }

    fn process(&self, query: Query) -> Result<Vec<Query>> {
        if query.match_level >= MatchLevel::City {
            return Ok(vec![query]);
        }
        let index = self.index.wait()?;

        let mut candidates = Vec::new();
        index.trie_candidates(
            &query,
            &FindOptions {
                extra_challenges: CITY_SUFFIXES,
                fuzzy: self.fuzzy,
                ..Default::default()
            },
            &mut candidates,
        )?;

        Ok(finalize_candidates(query, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{address_key, CityInfo};
    use crate::normalizer::normalize_str;
    use crate::pipeline::IngestStage;

    fn index() -> Arc<Background<CityIndex>> {
        let cities = vec![CityInfo {
            city_key: address_key(&["city", "131121"]),
            pref_key: address_key(&["pref", "東京都"]),
            lg_code: "131121".to_string(),
            pref: "東京都".to_string(),
            county: None,
            city: "世田谷区".to_string(),
            ward: None,
            rep_lat: Some(35.646),
            rep_lon: Some(139.653),
            key: normalize_str("世田谷区"),
        }];
        Arc::new(Background::ready(CityIndex::build(cities).unwrap()))
    }

    #[test]
    fn test_recovers_city_without_suffix() {
        let stage = CityRecoveryStage::new(index(), None);
        let q = IngestStage.process(Query::new("世田谷上馬")).unwrap().remove(0);
        let out = stage.process(q).unwrap();
        assert_eq!(out[0].city.as_deref(), Some("世田谷区"));
        assert_eq!(out[0].match_level, MatchLevel::City);
        assert_eq!(out[0].temp_address.to_string(), "上馬");
    }

    #[test]
    fn test_skips_resolved_records() {
        let stage = CityRecoveryStage::new(index(), None);
        let mut q = Query::new("世田谷区上馬");
        q.match_level = MatchLevel::City;
        let out = stage.process(q.clone()).unwrap();
        assert_eq!(out[0].matched_cnt, q.matched_cnt);
    }
}
