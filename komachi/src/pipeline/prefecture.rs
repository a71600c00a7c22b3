//! 都道府県検出ステージ
//!
//! 正規化済みの残余住所の先頭を既知の都道府県名と照合します。接尾辞
//! （都・道・府・県）の省略にも対応しますが、後続の市区町村名が別の
//! 都道府県名と同じ綴りで始まる場合（同名都道府県パターン）は、市区町村名
//! 全体の確認を優先して誤割り当てを防ぎます。

use regex::Regex;

use crate::dictionary::{CityInfo, PrefectureInfo};
use crate::errors::Result;
use crate::normalizer::normalize_str;
use crate::pipeline::Stage;
use crate::query::{MatchLevel, Query};

/// 1都道府県分の照合パターン
struct PrefPattern {
    /// 接尾辞を含む完全表記（^東京都）
    full: Regex,
    /// 接尾辞を省いた表記（^東京）。完全表記より後に試されます。
    loose: Regex,
    info: PrefectureInfo,
}

/// 同名都道府県パターン
///
/// 市区町村名が別の都道府県名と同じ綴りで始まるケースを表します。
/// 一致しても文字は消費せず、都道府県の割り当てのみを行います。
struct SameNamedPattern {
    /// 綴りの文字数。長い綴りから順に試されます。
    spell_len: usize,
    city_spell: Regex,
    info: PrefectureInfo,
}

/// 都道府県検出ステージ
pub struct PrefectureStage {
    patterns: Vec<PrefPattern>,
    same_named: Vec<SameNamedPattern>,
}

impl PrefectureStage {
    /// 都道府県表と市区町村表からステージを構築します。
    ///
    /// 同名都道府県パターンは、正規化した市区町村の綴りがいずれかの
    /// 都道府県の基底名（接尾辞抜き）で始まる行から生成されます。
    pub fn new(prefs: &[PrefectureInfo], cities: &[CityInfo]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(prefs.len());
        for info in prefs {
            let base = trim_pref_suffix(&info.key);
            patterns.push(PrefPattern {
                full: Regex::new(&format!("^{}", regex::escape(&info.key)))?,
                loose: Regex::new(&format!("^{}", regex::escape(base)))?,
                info: info.clone(),
            });
        }

        // 郡名付きと郡名抜きの両方の綴りを確認対象にする
        let mut same_named = Vec::new();
        for city in cities {
            let mut spells = vec![city.key.clone()];
            if city.county.is_some() {
                let without_county = normalize_str(&format!(
                    "{}{}",
                    city.city,
                    city.ward.as_deref().unwrap_or("")
                ));
                spells.push(without_county);
            }
            for spell in spells {
                let shadows = prefs
                    .iter()
                    .any(|p| spell.starts_with(trim_pref_suffix(&p.key)) && spell != p.key);
                if !shadows {
                    continue;
                }
                // 市区町村名全体が続く場合に限り、その行の実際の
                // 都道府県を割り当てる
                if let Some(actual) = prefs.iter().find(|p| p.pref_key == city.pref_key) {
                    same_named.push(SameNamedPattern {
                        spell_len: spell.chars().count(),
                        city_spell: Regex::new(&format!("^{}", regex::escape(&spell)))?,
                        info: actual.clone(),
                    });
                }
            }
        }
        same_named.sort_by(|a, b| b.spell_len.cmp(&a.spell_len));

        Ok(Self {
            patterns,
            same_named,
        })
    }

    /// 都道府県の情報をレコードへ反映します。
    fn apply(&self, query: &Query, info: &PrefectureInfo, consumed: usize) -> Query {
        let mut next = query.consumed(consumed);
        next.pref_key = Some(info.pref_key);
        next.pref = Some(info.pref.clone());
        next.lg_code = Some(info.lg_code.clone());
        next.match_level = MatchLevel::Prefecture;
        if let (Some(lat), Some(lon)) = (info.rep_lat, info.rep_lon) {
            next = next.with_coordinates(lat, lon, MatchLevel::Prefecture);
        }
        next
    }
}

impl Stage for PrefectureStage {
    fn name(&self) -> &'static str {
        "prefecture"
    }

    fn process(&self, query: Query) -> Result<Vec<Query>> {
        if query.match_level >= MatchLevel::Prefecture {
            return Ok(vec![query]);
        }
        let target = query.temp_address.to_string();

        for pat in &self.patterns {
            if let Some(m) = pat.full.find(&target) {
                let consumed = m.as_str().chars().count();
                return Ok(vec![self.apply(&query, &pat.info, consumed)]);
            }
        }

        // 同名都道府県: 市区町村名全体の確認が取れた場合のみ割り当てる。
        // 文字は消費せず、市区町村ステージに綴り全体を残す。
        for pat in &self.same_named {
            if pat.city_spell.is_match(&target) {
                return Ok(vec![self.apply(&query, &pat.info, 0)]);
            }
        }

        for pat in &self.patterns {
            if let Some(m) = pat.loose.find(&target) {
                let consumed = m.as_str().chars().count();
                return Ok(vec![self.apply(&query, &pat.info, consumed)]);
            }
        }

        Ok(vec![query])
    }
}

/// 都道府県名から接尾辞（都・道・府・県）を取り除いた基底名を返します。
fn trim_pref_suffix(name: &str) -> &str {
    name.strip_suffix(['都', '道', '府', '県'])
        .filter(|base| base.chars().count() >= 2)
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::address_key;

    fn pref(lg_code: &str, name: &str) -> PrefectureInfo {
        PrefectureInfo {
            pref_key: address_key(&["pref", name]),
            lg_code: lg_code.to_string(),
            pref: name.to_string(),
            rep_lat: Some(35.0),
            rep_lon: Some(135.0),
            key: name.to_string(),
        }
    }

    fn city(lg_code: &str, pref_name: &str, county: Option<&str>, name: &str) -> CityInfo {
        let spell = format!("{}{}", county.unwrap_or(""), name);
        CityInfo {
            city_key: address_key(&["city", lg_code]),
            pref_key: address_key(&["pref", pref_name]),
            lg_code: lg_code.to_string(),
            pref: pref_name.to_string(),
            county: county.map(str::to_string),
            city: name.to_string(),
            ward: None,
            rep_lat: None,
            rep_lon: None,
            key: spell,
        }
    }

    fn fixture() -> PrefectureStage {
        let prefs = vec![
            pref("130001", "東京都"),
            pref("170003", "石川県"),
            pref("070009", "福島県"),
        ];
        let cities = vec![
            city("075078", "福島県", Some("石川郡"), "石川町"),
            city("131016", "東京都", None, "千代田区"),
        ];
        PrefectureStage::new(&prefs, &cities).unwrap()
    }

    #[test]
    fn test_full_suffix_match() {
        let stage = fixture();
        let out = stage.process(Query::new("東京都千代田区")).unwrap();
        assert_eq!(out[0].pref.as_deref(), Some("東京都"));
        assert_eq!(out[0].match_level, MatchLevel::Prefecture);
        assert_eq!(out[0].temp_address.to_string(), "千代田区");
    }

    #[test]
    fn test_loose_match_without_suffix() {
        let stage = fixture();
        let out = stage.process(Query::new("東京千代田区")).unwrap();
        assert_eq!(out[0].pref.as_deref(), Some("東京都"));
        assert_eq!(out[0].temp_address.to_string(), "千代田区");
    }

    #[test]
    fn test_same_named_prefecture() {
        // 石川郡石川町は石川県ではなく福島県。綴りは消費されない。
        let stage = fixture();
        let out = stage.process(Query::new("石川郡石川町大字下泉")).unwrap();
        assert_eq!(out[0].pref.as_deref(), Some("福島県"));
        assert_eq!(out[0].temp_address.to_string(), "石川郡石川町大字下泉");
    }

    #[test]
    fn test_idempotent_on_resolved() {
        let stage = fixture();
        let once = stage.process(Query::new("東京都千代田区")).unwrap();
        let twice = stage.process(once[0].clone()).unwrap();
        assert_eq!(once[0].temp_address.to_string(), twice[0].temp_address.to_string());
        assert_eq!(once[0].matched_cnt, twice[0].matched_cnt);
    }

    #[test]
    fn test_unknown_pref_passes_through() {
        let stage = fixture();
        let out = stage.process(Query::new("存在しない県ほげ市")).unwrap();
        assert_eq!(out[0].match_level, MatchLevel::Unknown);
        assert!(out[0].pref_key.is_none());
    }
}
