//! 住所文字列の正規化関数群
//!
//! このモジュールは、辞書照合の前処理として使用される4つの正規化演算子を
//! 提供します。いずれも文字列を受け取る変種と、来歴を保存する
//! [`CharSeq`]変種があります。
//!
//! - カタカナ→ひらがな変換
//! - 漢数字→アラビア数字変換（位取りの分解に対応）
//! - 旧字体→新字体の折り畳み（テーブル駆動）
//! - 番地表記の接尾辞をハイフン区切りへ collapse する正規表現
//!
//! 文字列変種の適用順はひらがな化、漢数字変換、字体折り畳み、接尾辞除去。
//! [`CharSeq`]変種は接尾辞除去を先頭に行います。collapse 前の文字列は入力と
//! 1対1に整列しているため、この順序が最も多くの位置来歴を保存します。

use std::sync::OnceLock;

use regex::Regex;

use crate::charseq::{CharNode, CharSeq};

/// 旧字体から新字体への折り畳みテーブル
///
/// 住所データに現れる代表的な旧字体・異体字を対象とします。
const JIS_KANJI_TABLE: &[(char, char)] = &[
    ('國', '国'),
    ('縣', '県'),
    ('萬', '万'),
    ('會', '会'),
    ('舊', '旧'),
    ('體', '体'),
    ('臺', '台'),
    ('灣', '湾'),
    ('條', '条'),
    ('瀧', '滝'),
    ('關', '関'),
    ('靜', '静'),
    ('德', '徳'),
    ('榮', '栄'),
    ('藏', '蔵'),
    ('發', '発'),
    ('惠', '恵'),
    ('黑', '黒'),
    ('藝', '芸'),
    ('鹽', '塩'),
    ('圓', '円'),
    ('學', '学'),
    ('寶', '宝'),
    ('澁', '渋'),
    ('彌', '弥'),
    ('豐', '豊'),
    ('龜', '亀'),
    ('瀨', '瀬'),
    ('眞', '真'),
    ('淺', '浅'),
    ('繩', '縄'),
    ('廳', '庁'),
    ('應', '応'),
    ('櫻', '桜'),
    ('廣', '広'),
    ('鐵', '鉄'),
    ('驛', '駅'),
    ('澤', '沢'),
    ('濱', '浜'),
    ('邊', '辺'),
    ('邉', '辺'),
    ('齋', '斎'),
    ('齊', '斉'),
    ('壽', '寿'),
];

fn jis_kanji_map() -> &'static hashbrown::HashMap<char, char> {
    static MAP: OnceLock<hashbrown::HashMap<char, char>> = OnceLock::new();
    MAP.get_or_init(|| JIS_KANJI_TABLE.iter().copied().collect())
}

fn suffix_strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)-?[番号町地丁目]+の?").unwrap())
}

/// カタカナをひらがなに変換した文字を返します。
#[inline(always)]
fn fold_kana(ch: char) -> char {
    match ch {
        'ァ'..='ヶ' => char::from_u32(ch as u32 - 0x60).unwrap(),
        _ => ch,
    }
}

/// 旧字体を新字体に折り畳んだ文字を返します。
#[inline(always)]
fn fold_jis(ch: char) -> char {
    jis_kanji_map().get(&ch).copied().unwrap_or(ch)
}

/// カタカナをひらがなに変換します。
///
/// 冪等です: `to_hiragana(to_hiragana(x)) == to_hiragana(x)`。
pub fn to_hiragana(input: &str) -> String {
    input.chars().map(fold_kana).collect()
}

/// カタカナをひらがなに変換します（[`CharSeq`]変種）。
pub fn to_hiragana_seq(seq: &CharSeq) -> CharSeq {
    seq.map_chars(fold_kana)
}

/// 旧字体を新字体に折り畳みます。テーブル駆動で冪等です。
pub fn jis_kanji(input: &str) -> String {
    input.chars().map(fold_jis).collect()
}

/// 旧字体を新字体に折り畳みます（[`CharSeq`]変種）。
pub fn jis_kanji_seq(seq: &CharSeq) -> CharSeq {
    seq.map_chars(fold_jis)
}

/// 漢数字1文字の値を返します。数字でなければ`None`です。
#[inline(always)]
fn kanji_digit(ch: char) -> Option<u64> {
    Some(match ch {
        '〇' => 0,
        '一' => 1,
        '二' => 2,
        '三' => 3,
        '四' => 4,
        '五' => 5,
        '六' => 6,
        '七' => 7,
        '八' => 8,
        '九' => 9,
        _ => return None,
    })
}

/// 位取り漢字の倍率を返します。
#[inline(always)]
fn kanji_unit(ch: char) -> Option<u64> {
    Some(match ch {
        '十' => 10,
        '百' => 100,
        '千' => 1000,
        _ => return None,
    })
}

/// 漢数字の連続をひとつの数値に分解します。
///
/// 位取り（十・百・千・万・億）と位取り無しの並記（二〇二三など）の両方を
/// 扱います。
fn kanji_run_value(run: &[char]) -> u64 {
    let mut total = 0u64;
    let mut section = 0u64;
    let mut digits = 0u64;
    for &ch in run {
        if let Some(d) = kanji_digit(ch) {
            digits = digits * 10 + d;
        } else if let Some(unit) = kanji_unit(ch) {
            section += if digits == 0 { 1 } else { digits } * unit;
            digits = 0;
        } else if ch == '万' {
            total += (section + if digits == 0 && section == 0 { 1 } else { digits }) * 10_000;
            section = 0;
            digits = 0;
        } else if ch == '億' {
            total = (total + section + if total == 0 && section == 0 && digits == 0 { 1 } else { digits }) * 100_000_000;
            section = 0;
            digits = 0;
        }
    }
    total + section + digits
}

#[inline(always)]
fn is_kanji_numeral(ch: char) -> bool {
    kanji_digit(ch).is_some() || kanji_unit(ch).is_some() || ch == '万' || ch == '億'
}

/// 数量の後続として漢数字の変換を確定させる助数詞
const COUNTER_CHARS: &[char] = &['丁', '番', '号', '条', '地', '線', '階', '軒'];

/// 漢数字の連続を変換してよいかを判定します。
///
/// 固有名詞に含まれる数字漢字（千代田、四日市など）を誤変換しないよう、
/// 連続の直後が助数詞・数字・ハイフン・入力末尾の場合のみ変換します。
#[inline(always)]
fn should_convert_run(next: Option<char>) -> bool {
    match next {
        None => true,
        Some(ch) => COUNTER_CHARS.contains(&ch) || ch.is_ascii_digit() || ch == '-',
    }
}

/// 漢数字をアラビア数字に変換します。
///
/// 連続する漢数字の並びごとに位取りを分解して数値化します
/// （二十三 → 23、三百五 → 305）。丁目・番・号などの助数詞が続く連続と
/// 入力末尾の連続のみが対象で、固有名詞中の数字漢字は保存されます。
/// 出力が数字のみの入力に対しては冪等です。
pub fn kan2num(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0usize;
    while i < chars.len() {
        if is_kanji_numeral(chars[i]) {
            let run_start = i;
            while i < chars.len() && is_kanji_numeral(chars[i]) {
                i += 1;
            }
            let run = &chars[run_start..i];
            if should_convert_run(chars.get(i).copied()) {
                out.push_str(&kanji_run_value(run).to_string());
            } else {
                out.extend(run.iter());
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// 漢数字をアラビア数字に変換します（[`CharSeq`]変種）。
///
/// 変換で生成された数字は挿入扱いとなり、来歴を持ちません。連続の外側と
/// 変換対象外の連続のノードは来歴ごと保存されます。
pub fn kan2num_seq(seq: &CharSeq) -> CharSeq {
    let nodes = seq.nodes();
    let mut out: Vec<CharNode> = Vec::with_capacity(nodes.len());
    let mut i = 0usize;
    while i < nodes.len() {
        if is_kanji_numeral(nodes[i].ch()) {
            let run_start = i;
            while i < nodes.len() && is_kanji_numeral(nodes[i].ch()) {
                i += 1;
            }
            if should_convert_run(nodes.get(i).map(|n| n.ch())) {
                let run: Vec<char> = nodes[run_start..i].iter().map(|n| n.ch()).collect();
                for ch in kanji_run_value(&run).to_string().chars() {
                    out.push(CharNode::inserted(ch));
                }
            } else {
                out.extend_from_slice(&nodes[run_start..i]);
            }
        } else {
            out.push(nodes[i]);
            i += 1;
        }
    }
    CharSeq::from_nodes(out)
}

/// 番地表記の接尾辞ノイズをハイフン区切りに collapse します。
///
/// `(\d+)-?[番号町地丁目]+の?` を `$1-` に書き換えます。
pub fn strip_block_suffix(input: &str) -> String {
    suffix_strip_re().replace_all(input, "$1-").into_owned()
}

/// 番地表記の接尾辞ノイズを collapse します（[`CharSeq`]変種）。
pub fn strip_block_suffix_seq(seq: &CharSeq) -> CharSeq {
    seq.replace_all(suffix_strip_re(), "$1-")
}

/// 全角ASCII・全角空白を半角に折り畳んだ文字を返します。
#[inline(always)]
pub(crate) fn fold_width(ch: char) -> char {
    match ch {
        '！'..='～' => char::from_u32(ch as u32 - 0xFEE0).unwrap(),
        '　' => ' ',
        _ => ch,
    }
}

/// 全角ASCIIと全角空白を半角へ折り畳みます。
pub fn fold_width_str(input: &str) -> String {
    input.chars().map(fold_width).collect()
}

/// 全角ASCIIと全角空白を半角へ折り畳みます（[`CharSeq`]変種）。
pub fn fold_width_seq(seq: &CharSeq) -> CharSeq {
    seq.map_chars(fold_width)
}

/// 各種ダッシュ・長音記号をハイフンに折り畳みます（[`CharSeq`]変種）。
///
/// U+2010〜U+2015、U+2212は無条件に、長音記号（ー）と波ダッシュは直前が
/// ASCII数字の場合のみ折り畳みます。
pub fn fold_dashes_seq(seq: &CharSeq) -> CharSeq {
    let mut prev_digit = false;
    let nodes = seq
        .nodes()
        .iter()
        .map(|n| {
            let ch = n.ch();
            let folded = match ch {
                '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
                'ー' | '〜' | '~' if prev_digit => '-',
                _ => ch,
            };
            prev_digit = folded.is_ascii_digit();
            CharNode::from((folded, n.org_index()))
        })
        .collect();
    CharSeq::from_nodes(nodes)
}

/// 文字列全体の正規化を行います。
///
/// 辞書キーと照合対象の双方をこの関数で揃えます。適用順はひらがな化、
/// 漢数字変換、字体折り畳み、接尾辞除去です。
pub fn normalize_str(input: &str) -> String {
    strip_block_suffix(&jis_kanji(&kan2num(&to_hiragana(input))))
}

/// [`CharSeq`]全体の正規化を行います。
///
/// 接尾辞除去を先に行い、以降は1対1変換のみを適用することで位置来歴を
/// 最大限保存します。
pub fn normalize_seq(seq: &CharSeq) -> CharSeq {
    jis_kanji_seq(&kan2num_seq(&to_hiragana_seq(&strip_block_suffix_seq(seq))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_hiragana() {
        assert_eq!(to_hiragana("マルノウチ"), "まるのうち");
        assert_eq!(to_hiragana("丸ノ内"), "丸の内");
    }

    #[test]
    fn test_to_hiragana_idempotent() {
        let once = to_hiragana("カタカナとひらがな混在");
        assert_eq!(to_hiragana(&once), once);
    }

    #[test]
    fn test_kan2num_positional() {
        assert_eq!(kan2num("二十三"), "23");
        assert_eq!(kan2num("三百五"), "305");
        assert_eq!(kan2num("千二十"), "1020");
        assert_eq!(kan2num("一万二千"), "12000");
    }

    #[test]
    fn test_kan2num_enumerated_digits() {
        assert_eq!(kan2num("二〇二三"), "2023");
    }

    #[test]
    fn test_kan2num_mixed_text() {
        assert_eq!(kan2num("丸の内一丁目"), "丸の内1丁目");
        assert_eq!(kan2num("北一条西"), "北1条西");
    }

    #[test]
    fn test_kan2num_preserves_proper_nouns() {
        assert_eq!(kan2num("千代田区"), "千代田区");
        assert_eq!(kan2num("四日市市"), "四日市市");
        assert_eq!(kan2num("六本木"), "六本木");
        assert_eq!(kan2num("千葉県"), "千葉県");
    }

    #[test]
    fn test_kan2num_idempotent_on_digits() {
        let once = kan2num("三十二番地");
        assert_eq!(kan2num(&once), once);
    }

    #[test]
    fn test_jis_kanji_fold() {
        assert_eq!(jis_kanji("東京國立博物館"), "東京国立博物館");
        assert_eq!(jis_kanji("澁谷"), "渋谷");
    }

    #[test]
    fn test_jis_kanji_idempotent() {
        let once = jis_kanji("舊字體の縣廳");
        assert_eq!(jis_kanji(&once), once);
    }

    #[test]
    fn test_strip_block_suffix() {
        assert_eq!(strip_block_suffix("1番地の3"), "1-3");
        assert_eq!(strip_block_suffix("2丁目"), "2-");
        assert_eq!(strip_block_suffix("3-番5号"), "3-5-");
    }

    #[test]
    fn test_fold_width() {
        assert_eq!(fold_width_str("ＡＢＣ１２３"), "ABC123");
        assert_eq!(fold_width_str("千代田区　丸の内"), "千代田区 丸の内");
    }

    #[test]
    fn test_fold_dashes_after_digit() {
        let seq = CharSeq::from_input("2ー1ー1");
        assert_eq!(fold_dashes_seq(&seq).to_string(), "2-1-1");
        // 数字が先行しない長音記号はそのまま
        let seq = CharSeq::from_input("ラーメン");
        assert_eq!(fold_dashes_seq(&seq).to_string(), "ラーメン");
    }

    #[test]
    fn test_normalize_str_order() {
        // ひらがな化 → 漢数字 → 字体 → 接尾辞
        assert_eq!(normalize_str("丸ノ内一丁目"), "丸の内1-");
    }

    #[test]
    fn test_normalize_seq_matches_str_on_digit_input() {
        let seq = CharSeq::from_input("丸ノ内1丁目");
        assert_eq!(normalize_seq(&seq).to_string(), normalize_str("丸ノ内1丁目"));
    }

    #[test]
    fn test_normalize_seq_defers_kanji_suffix() {
        // 漢数字の丁目は数字化された後、町字照合時の再 collapse で揃う
        let seq = normalize_seq(&CharSeq::from_input("丸ノ内一丁目"));
        assert_eq!(seq.to_string(), "丸の内1丁目");
        assert_eq!(strip_block_suffix_seq(&seq).to_string(), "丸の内1-");
    }
}
