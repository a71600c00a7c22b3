//! 市区町村検出ステージ
//!
//! 3つの副段階で構成されます。(a) 都道府県ごとの正規表現パターン
//! （郡名の省略を許容）、(b) 市区町村表のトライ照合（都道府県が既知なら
//! その範囲、未知なら全国）、(final) 候補の確定です。確定は到達水準の
//! 高い順、消費文字数の多い順で行われ、最良の候補のみが下流へ流れます。

use std::sync::Arc;

use hashbrown::HashMap;
use regex::Regex;

use crate::dictionary::CityInfo;
use crate::errors::Result;
use crate::init::Background;
use crate::normalizer::normalize_str;
use crate::pipeline::Stage;
use crate::query::{MatchLevel, Query};
use crate::trie::{FindOptions, TrieAddressFinder};

/// 正規表現による市区町村パターン
struct CityPattern {
    re: Regex,
    info: CityInfo,
}

/// 市区町村の照合索引
///
/// 構築後は読み取り専用で、検出ステージと回復ステージに共有されます。
pub struct CityIndex {
    /// 都道府県キーごとの正規表現パターン
    patterns: HashMap<i64, Vec<CityPattern>>,
    /// 都道府県キーごとのトライ
    scoped: HashMap<i64, TrieAddressFinder<CityInfo>>,
    /// 都道府県が未解決の場合に用いる全国トライ
    global: TrieAddressFinder<CityInfo>,
}

impl CityIndex {
    /// 市区町村表から索引を構築します。
    ///
    /// 郡部の町村には郡名を省いた綴りの別キーも挿入されます。
    pub fn build(cities: Vec<CityInfo>) -> Result<Self> {
        let mut patterns: HashMap<i64, Vec<CityPattern>> = HashMap::new();
        let mut scoped: HashMap<i64, TrieAddressFinder<CityInfo>> = HashMap::new();
        let mut global = TrieAddressFinder::new();

        for info in cities {
            // 郡名抜きの綴り。郡部以外では完全な綴りと一致する。
            let short_spell = normalize_str(&format!(
                "{}{}",
                info.city,
                info.ward.as_deref().unwrap_or("")
            ));
            let re = Regex::new(&format!(
                "^(?:{})?{}",
                info.county
                    .as_deref()
                    .map(normalize_str)
                    .map(|c| regex::escape(&c))
                    .unwrap_or_default(),
                regex::escape(&short_spell),
            ))?;
            patterns.entry(info.pref_key).or_default().push(CityPattern {
                re,
                info: info.clone(),
            });

            let mut spells = vec![info.key.clone()];
            if short_spell != info.key {
                spells.push(short_spell);
            }
            let trie = scoped.entry(info.pref_key).or_default();
            for spell in &spells {
                trie.append(spell, info.clone());
                global.append(spell, info.clone());
            }
        }

        Ok(Self {
            patterns,
            scoped,
            global,
        })
    }

    /// トライ照合を行い、候補レコードを収集します。
    pub(crate) fn trie_candidates(
        &self,
        query: &Query,
        opts: &FindOptions,
        out: &mut Vec<Query>,
    ) -> Result<()> {
        let matches = match query.pref_key {
            Some(pref_key) => match self.scoped.get(&pref_key) {
                Some(trie) => trie.find(&query.temp_address, opts)?,
                None => return Ok(()),
            },
            None => self.global.find(&query.temp_address, opts)?,
        };
        for m in matches {
            out.push(apply_city(query, m.info, m.unmatched, m.depth));
        }
        Ok(())
    }

    /// 正規表現パターンの照合を行い、候補レコードを収集します。
    fn pattern_candidates(&self, query: &Query, out: &mut Vec<Query>) {
        let Some(pref_key) = query.pref_key else {
            return;
        };
        let Some(patterns) = self.patterns.get(&pref_key) else {
            return;
        };
        let target = query.temp_address.to_string();
        for pat in patterns {
            if let Some(m) = pat.re.find(&target) {
                let consumed = m.as_str().chars().count();
                out.push(apply_city(
                    query,
                    &pat.info,
                    query.temp_address.tail_from(consumed),
                    consumed,
                ));
            }
        }
    }
}

/// 市区町村の情報をレコードへ反映します。
fn apply_city(query: &Query, info: &CityInfo, tail: crate::charseq::CharSeq, consumed: usize) -> Query {
    let mut next = query.with_tail(tail, consumed);
    next.city_key = Some(info.city_key);
    next.lg_code = Some(info.lg_code.clone());
    next.county = info.county.clone();
    next.city = Some(info.city.clone());
    next.ward = info.ward.clone();
    next.match_level = MatchLevel::City;
    if next.pref_key.is_none() {
        // 全国トライでの一致は都道府県も確定させる
        next.pref_key = Some(info.pref_key);
        next.pref = Some(info.pref.clone());
    }
    if let (Some(lat), Some(lon)) = (info.rep_lat, info.rep_lon) {
        next = next.with_coordinates(lat, lon, MatchLevel::City);
    }
    next
}

/// 候補から最良のレコードを選びます。
///
/// 到達水準の降順、消費文字数の降順で比較し、最良と並ぶ候補をすべて
/// 返します。同一市区町村の重複は除かれます。
pub(crate) fn finalize_candidates(original: Query, mut candidates: Vec<Query>) -> Vec<Query> {
    if candidates.is_empty() {
        return vec![original];
    }
    let best = candidates
        .iter()
        .map(|q| (q.match_level, q.matched_cnt))
        .max()
        .unwrap();
    candidates.retain(|q| (q.match_level, q.matched_cnt) == best);

    let mut seen = hashbrown::HashSet::new();
    candidates.retain(|q| seen.insert(q.city_key));
    candidates
}

/// 市区町村検出ステージ
pub struct CityStage {
    index: Arc<Background<CityIndex>>,
    fuzzy: Option<char>,
}

impl CityStage {
    /// 共有索引からステージを作成します。
    pub fn new(index: Arc<Background<CityIndex>>, fuzzy: Option<char>) -> Self {
        Self { index, fuzzy }
    }
}

impl Stage for CityStage {
    fn name(&self) -> &'static str {
        "city"
    }

    fn process(&self, query: Query) -> Result<Vec<Query>> {
        if query.match_level >= MatchLevel::City {
            return Ok(vec![query]);
        }
        let index = self.index.wait()?;

        let mut candidates = Vec::new();
        index.pattern_candidates(&query, &mut candidates);
        index.trie_candidates(
            &query,
            &FindOptions {
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
    use crate::dictionary::address_key;
    use crate::pipeline::{IngestStage, PrefectureStage};
    use crate::dictionary::PrefectureInfo;

    fn city(lg_code: &str, pref_name: &str, county: Option<&str>, name: &str, ward: Option<&str>) -> CityInfo {
        let spell = format!("{}{}{}", county.unwrap_or(""), name, ward.unwrap_or(""));
        CityInfo {
            city_key: address_key(&["city", lg_code]),
            pref_key: address_key(&["pref", pref_name]),
            lg_code: lg_code.to_string(),
            pref: pref_name.to_string(),
            county: county.map(str::to_string),
            city: name.to_string(),
            ward: ward.map(str::to_string),
            rep_lat: Some(35.0),
            rep_lon: Some(139.0),
            key: normalize_str(&spell),
        }
    }

    fn fixture_cities() -> Vec<CityInfo> {
        vec![
            city("131016", "東京都", None, "千代田区", None),
            city("075078", "福島県", Some("石川郡"), "石川町", None),
            city("011011", "北海道", None, "札幌市", Some("中央区")),
        ]
    }

    fn stage() -> CityStage {
        let index = Arc::new(Background::ready(
            CityIndex::build(fixture_cities()).unwrap(),
        ));
        CityStage::new(index, None)
    }

    fn resolved_pref(input: &str, pref_name: &str, lg_code: &str) -> Query {
        let prefs = vec![PrefectureInfo {
            pref_key: address_key(&["pref", pref_name]),
            lg_code: lg_code.to_string(),
            pref: pref_name.to_string(),
            rep_lat: None,
            rep_lon: None,
            key: pref_name.to_string(),
        }];
        let pref_stage = PrefectureStage::new(&prefs, &[]).unwrap();
        let q = IngestStage.process(Query::new(input)).unwrap().remove(0);
        pref_stage.process(q).unwrap().remove(0)
    }

    #[test]
    fn test_city_with_pref_scope() {
        let q = resolved_pref("東京都千代田区丸の内", "東京都", "130001");
        let out = stage().process(q).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].city.as_deref(), Some("千代田区"));
        assert_eq!(out[0].match_level, MatchLevel::City);
        assert_eq!(out[0].temp_address.to_string(), "丸の内");
    }

    #[test]
    fn test_city_with_county_omitted() {
        let q = resolved_pref("福島県石川町大字下泉", "福島県", "070009");
        let out = stage().process(q).unwrap();
        assert_eq!(out[0].city.as_deref(), Some("石川町"));
        assert_eq!(out[0].county.as_deref(), Some("石川郡"));
        assert_eq!(out[0].temp_address.to_string(), "大字下泉");
    }

    #[test]
    fn test_city_global_when_pref_unknown() {
        let q = IngestStage.process(Query::new("札幌市中央区北一条西")).unwrap().remove(0);
        let out = stage().process(q).unwrap();
        assert_eq!(out[0].city.as_deref(), Some("札幌市"));
        assert_eq!(out[0].ward.as_deref(), Some("中央区"));
        // 全国トライの一致は都道府県も確定させる
        assert_eq!(out[0].pref.as_deref(), Some("北海道"));
    }

    #[test]
    fn test_no_match_passes_through() {
        let q = IngestStage.process(Query::new("ほげ市ふが町")).unwrap().remove(0);
        let out = stage().process(q).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].match_level, MatchLevel::Unknown);
        assert!(out[0].city_key.is_none());
    }

    #[test]
    fn test_idempotent_on_resolved() {
        let q = resolved_pref("東京都千代田区丸の内", "東京都", "130001");
        let once = stage().process(q).unwrap().remove(0);
        let twice = stage().process(once.clone()).unwrap().remove(0);
        assert_eq!(once.matched_cnt, twice.matched_cnt);
        assert_eq!(once.city_key, twice.city_key);
    }
}
