//! 町字（大字・丁目・小字）精緻化ステージ
//!
//! 解決済みの(都道府県, 市区町村)で絞った町字トライを照合します。丁目が
//! 漢数字で書かれた入力は取り込み時の数字化で`1丁目`形になっているため、
//! 照合直前にもう一度接尾辞の collapse を適用して辞書キーの形へ揃えます。
//!
//! 東京23区の町字は全国的に同名が多く綴りだけでは確定できないため、
//! `pref == 東京都`で市区町村が未解決の場合に限り、区名と町字を連結した
//! 専用トライで照合します。

use std::sync::Arc;

use hashbrown::HashMap;

use crate::dictionary::{address_key, CityInfo, TownMatchingInfo};
use crate::errors::Result;
use crate::init::Background;
use crate::normalizer::strip_block_suffix_seq;
use crate::pipeline::Stage;
use crate::query::{MatchLevel, Query};
use crate::trie::{FindOptions, TrieAddressFinder};

/// 町字照合で省略可能な行政接尾辞
const TOWN_SUFFIXES: &[char] = &['区', '町', '市', '村'];

/// 町字の照合索引
pub struct TownIndex {
    /// (都道府県キー, 市区町村キー)ごとのトライ
    by_city: HashMap<(i64, i64), TrieAddressFinder<TownMatchingInfo>>,
    /// 東京23区専用の区名付きトライ
    tokyo23: TrieAddressFinder<TownMatchingInfo>,
    tokyo_pref_key: i64,
}

impl TownIndex {
    /// 町字表と市区町村表から索引を構築します。
    pub fn build(towns: Vec<TownMatchingInfo>, cities: Vec<CityInfo>) -> Result<Self> {
        let tokyo_pref_key = address_key(&["pref", "東京都"]);
        let ward_spells: HashMap<i64, String> = cities
            .iter()
            .filter(|c| {
                c.pref_key == tokyo_pref_key && c.ward.is_none() && c.city.ends_with('区')
            })
            .map(|c| (c.city_key, c.key.clone()))
            .collect();

        let mut by_city: HashMap<(i64, i64), TrieAddressFinder<TownMatchingInfo>> = HashMap::new();
        let mut tokyo23 = TrieAddressFinder::new();
        for info in towns {
            if let Some(ward_spell) = ward_spells.get(&info.city_key) {
                // 区名付きと区名抜きの両方で引けるようにする
                tokyo23.append(format!("{}{}", ward_spell, info.key), info.clone());
                tokyo23.append(info.key.clone(), info.clone());
            }
            by_city
                .entry((info.pref_key, info.city_key))
                .or_default()
                .append(info.key.clone(), info);
        }

        Ok(Self {
            by_city,
            tokyo23,
            tokyo_pref_key,
        })
    }
}

/// 町字精緻化ステージ
pub struct TownStage {
    index: Arc<Background<TownIndex>>,
    fuzzy: Option<char>,
}

impl TownStage {
    /// 共有索引からステージを作成します。
    pub fn new(index: Arc<Background<TownIndex>>, fuzzy: Option<char>) -> Self {
        Self { index, fuzzy }
    }

    /// 町字の情報をレコードへ反映します。
    fn apply(&self, query: &Query, info: &TownMatchingInfo, tail: crate::charseq::CharSeq, depth: usize) -> Query {
        let mut next = query.with_tail(tail, depth);
        next.town_key = Some(info.town_key);
        next.lg_code = Some(info.lg_code.clone());
        next.machiaza_id = Some(info.machiaza_id.clone());
        next.oaza_cho = info.oaza_cho.clone();
        next.chome = info.chome.clone();
        next.koaza = info.koaza.clone();
        next.rsdt_addr_flg = info.rsdt_addr_flg;
        let level = if info.chome.is_some() || info.koaza.is_some() {
            MatchLevel::MachiazaDetail
        } else {
            MatchLevel::Machiaza
        };
        next.match_level = level;
        if let (Some(lat), Some(lon)) = (info.rep_lat, info.rep_lon) {
            next = next.with_coordinates(lat, lon, level);
        }
        next
    }

    /// 東京23区トライの一致には市区町村の確定も含まれます。
    fn apply_tokyo23(&self, query: &Query, info: &TownMatchingInfo, tail: crate::charseq::CharSeq, depth: usize) -> Query {
        let mut next = self.apply(query, info, tail, depth);
        next.city_key = Some(info.city_key);
        next.city = Some(info.city.clone());
        next.county = info.county.clone();
        next.ward = info.ward.clone();
        next
    }
}

/// 大字・字の接頭辞を落とした照合対象と、落とした文字数を返します。
fn strip_oaza_prefix(target: &crate::charseq::CharSeq) -> Option<(crate::charseq::CharSeq, usize)> {
    if target.char_at(0) == Some('大') && target.char_at(1) == Some('字') {
        Some((target.tail_from(2), 2))
    } else if target.char_at(0) == Some('字') {
        Some((target.tail_from(1), 1))
    } else {
        None
    }
}

impl Stage for TownStage {
    fn name(&self) -> &'static str {
        "town"
    }

    fn process(&self, query: Query) -> Result<Vec<Query>> {
        if query.match_level >= MatchLevel::Machiaza {
            return Ok(vec![query]);
        }
        let index = self.index.wait()?;
        let opts = FindOptions {
            extra_challenges: TOWN_SUFFIXES,
            fuzzy: self.fuzzy,
            ..Default::default()
        };
        // 数字化済みの丁目表記を辞書キーの形へ揃える
        let target = strip_block_suffix_seq(&query.temp_address);
        // 辞書が接頭辞抜きで収録している町字に備え、大字・字を落とした
        // 対象でも照合する
        let mut attempts = vec![(target.clone(), 0usize)];
        if let Some(stripped) = strip_oaza_prefix(&target) {
            attempts.push(stripped);
        }

        if let (Some(pref_key), Some(city_key)) = (query.pref_key, query.city_key) {
            if let Some(trie) = index.by_city.get(&(pref_key, city_key)) {
                for (attempt, prefix_len) in &attempts {
                    let matches = trie.find(attempt, &opts)?;
                    if let Some(m) = matches.first() {
                        return Ok(vec![self.apply(
                            &query,
                            m.info,
                            m.unmatched.clone(),
                            prefix_len + m.depth,
                        )]);
                    }
                }
            }
            return Ok(vec![query]);
        }

        if query.pref_key == Some(index.tokyo_pref_key) {
            for (attempt, prefix_len) in &attempts {
                let matches = index.tokyo23.find(attempt, &opts)?;
                if let Some(m) = matches.first() {
                    return Ok(vec![self.apply_tokyo23(
                        &query,
                        m.info,
                        m.unmatched.clone(),
                        prefix_len + m.depth,
                    )]);
                }
            }
        }

        Ok(vec![query])
    }
}
