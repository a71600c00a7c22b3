//! 参照辞書の行型の定義
//!
//! 各行型は、その行が解決に寄与するキーの集合と、存在すれば代表座標を
//! 保持します。`key`フィールドはトライへの挿入に使用される正規化済みの
//! 照合キーです。

use sha2::{Digest, Sha256};

use crate::normalizer::{kan2num, strip_block_suffix};
use crate::trie::AddressRow;

/// 識別タプルから決定的なキーを導出します。
///
/// タプルを連結したバイト列のSHA-256を63ビットに切り詰めた整数で、
/// 入力のみの純関数です。実行をまたいで安定します。
pub fn address_key(parts: &[&str]) -> i64 {
    let mut hasher = Sha256::new();
    for (i, p) in parts.iter().enumerate() {
        if i != 0 {
            hasher.update([0u8]);
        }
        hasher.update(p.as_bytes());
    }
    let digest = hasher.finalize();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(buf) & 0x7fff_ffff_ffff_ffff) as i64
}

/// 町字の照合キーを組み立てます。
///
/// 正規化で丁目の collapse により末尾にハイフンが残るため取り除きます。
/// これにより「丸の内1-2」と「丸の内1」のどちらの書き方でも同じキーに
/// 到達します。
pub fn town_match_key(spell: &str) -> String {
    crate::normalizer::normalize_str(spell)
        .trim_end_matches('-')
        .to_string()
}

/// 丁目・小字の表記から数値部分を取り出します。
///
/// 「一丁目」→「1」のように、漢数字を変換したうえで接尾辞を落とします。
/// 数値で始まらない小字名はそのまま返します。
pub fn chome_number(raw: &str) -> String {
    let collapsed = strip_block_suffix(&kan2num(raw));
    collapsed.trim_end_matches('-').to_string()
}

/// 都道府県の行
#[derive(Debug, Clone)]
pub struct PrefectureInfo {
    pub pref_key: i64,
    pub lg_code: String,
    /// 都道府県名（東京都、北海道など）
    pub pref: String,
    pub rep_lat: Option<f64>,
    pub rep_lon: Option<f64>,
    /// 正規化済みの照合キー
    pub key: String,
}

impl AddressRow for PrefectureInfo {
    fn key(&self) -> &str {
        &self.key
    }
}

/// 市区町村の行
///
/// 政令市の区は`city`に市名、`ward`に区名を持つ独立した行です。
/// 郡部の町村は`county`に郡名を持ちます。
#[derive(Debug, Clone)]
pub struct CityInfo {
    pub city_key: i64,
    pub pref_key: i64,
    pub lg_code: String,
    pub pref: String,
    pub county: Option<String>,
    pub city: String,
    pub ward: Option<String>,
    pub rep_lat: Option<f64>,
    pub rep_lon: Option<f64>,
    pub key: String,
}

impl AddressRow for CityInfo {
    fn key(&self) -> &str {
        &self.key
    }
}

/// 町字の行
///
/// 大字・町名に丁目・小字を連結した単位で1行です。`rsdt_addr_flg`は
/// 住居表示の実施有無を示し、街区方式と地番方式の分岐に使用されます。
#[derive(Debug, Clone)]
pub struct TownMatchingInfo {
    pub town_key: i64,
    pub city_key: i64,
    pub pref_key: i64,
    pub lg_code: String,
    pub machiaza_id: String,
    pub pref: String,
    pub county: Option<String>,
    pub city: String,
    pub ward: Option<String>,
    pub oaza_cho: Option<String>,
    /// 数値化済みの丁目（「一丁目」→「1」）
    pub chome: Option<String>,
    pub koaza: Option<String>,
    pub rsdt_addr_flg: Option<u8>,
    pub rep_lat: Option<f64>,
    pub rep_lon: Option<f64>,
    pub key: String,
}

impl AddressRow for TownMatchingInfo {
    fn key(&self) -> &str {
        &self.key
    }

    fn rsdt_addr_flg(&self) -> Option<u8> {
        self.rsdt_addr_flg
    }
}

/// 街区の行
#[derive(Debug, Clone)]
pub struct RsdtBlkInfo {
    pub rsdtblk_key: i64,
    pub town_key: i64,
    pub lg_code: String,
    pub machiaza_id: String,
    pub blk_id: String,
    /// 街区符号
    pub blk_num: String,
    pub rep_lat: Option<f64>,
    pub rep_lon: Option<f64>,
    pub key: String,
}

impl AddressRow for RsdtBlkInfo {
    fn key(&self) -> &str {
        &self.key
    }
}

/// 住居番号の行
#[derive(Debug, Clone)]
pub struct RsdtDspInfo {
    pub rsdtdsp_key: i64,
    pub rsdtblk_key: i64,
    pub lg_code: String,
    pub machiaza_id: String,
    pub blk_id: String,
    pub rsdt_id: String,
    pub rsdt2_id: Option<String>,
    pub rsdt_num: String,
    pub rsdt_num2: Option<String>,
    pub rep_lat: Option<f64>,
    pub rep_lon: Option<f64>,
    pub key: String,
}

impl AddressRow for RsdtDspInfo {
    fn key(&self) -> &str {
        &self.key
    }
}

/// 地番の行
#[derive(Debug, Clone)]
pub struct ParcelInfo {
    pub parcel_key: i64,
    pub town_key: i64,
    pub lg_code: String,
    pub machiaza_id: String,
    pub prc_id: String,
    pub prc_num1: String,
    pub prc_num2: Option<String>,
    pub prc_num3: Option<String>,
    pub rep_lat: Option<f64>,
    pub rep_lon: Option<f64>,
    pub key: String,
}

impl AddressRow for ParcelInfo {
    fn key(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_key_deterministic() {
        let a = address_key(&["town", "131016", "0001000"]);
        let b = address_key(&["town", "131016", "0001000"]);
        assert_eq!(a, b);
        assert!(a >= 0);
    }

    #[test]
    fn test_address_key_distinguishes_tuples() {
        // 区切りが無いと ("ab","c") と ("a","bc") が衝突する
        assert_ne!(address_key(&["ab", "c"]), address_key(&["a", "bc"]));
    }

    #[test]
    fn test_chome_number() {
        assert_eq!(chome_number("一丁目"), "1");
        assert_eq!(chome_number("二十三丁目"), "23");
        assert_eq!(chome_number("3丁目"), "3");
    }
}
