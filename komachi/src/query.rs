//! パイプラインを流れるクエリレコードの定義
//!
//! このモジュールは、1件の入力住所を表す[`Query`]と、解決の到達水準を表す
//! [`MatchLevel`]を定義します。各ステージは受け取ったレコードを変更した
//! コピーを下流へ渡します。ステージを離れたレコードが書き換えられることは
//! ありません。

use std::time::Instant;

use crate::charseq::CharSeq;

/// 住所解決の到達水準
///
/// 順序付きの列挙で、パイプラインを通して単調非減少です。
/// 代表座標が付与された水準は`coordinate_level`として同じ空間で表現され、
/// 常に`match_level`以下です。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum MatchLevel {
    /// 未解決
    #[default]
    Unknown,
    /// 都道府県まで
    Prefecture,
    /// 市区町村まで
    City,
    /// 町字（大字・町名）まで
    Machiaza,
    /// 丁目・小字まで
    MachiazaDetail,
    /// 街区まで
    ResidentialBlock,
    /// 住居番号まで
    ResidentialDetail,
    /// 地番まで
    Parcel,
}

impl MatchLevel {
    /// 出力用の名前を返します。
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Prefecture => "prefecture",
            Self::City => "city",
            Self::Machiaza => "machiaza",
            Self::MachiazaDetail => "machiaza_detail",
            Self::ResidentialBlock => "residential_block",
            Self::ResidentialDetail => "residential_detail",
            Self::Parcel => "parcel",
        }
    }
}

/// パイプラインを流れる1件分のレコード
///
/// `input`は出力のために保存される元の行、`temp_address`は未消費の住所断片
/// です。解決済みのキーと記述フィールドはステージが進むにつれて埋まります。
///
/// # 不変条件
///
/// - `match_level >= coordinate_level`
/// - `town_key`が設定されていれば`city_key`も、`city_key`が設定されていれば
///   `pref_key`も設定されている
/// - `temp_address`には解決済みキーへ反映された文字が残らない
#[derive(Debug, Clone)]
pub struct Query {
    /// 元の入力行
    pub input: String,
    /// 未消費の住所断片
    pub temp_address: CharSeq,
    /// 解決の到達水準
    pub match_level: MatchLevel,
    /// 代表座標が付与された水準
    pub coordinate_level: MatchLevel,
    /// 代表緯度
    pub rep_lat: Option<f64>,
    /// 代表経度
    pub rep_lon: Option<f64>,

    pub pref_key: Option<i64>,
    pub city_key: Option<i64>,
    pub town_key: Option<i64>,
    pub parcel_key: Option<i64>,
    pub rsdtblk_key: Option<i64>,
    pub rsdtdsp_key: Option<i64>,

    /// 全国地方公共団体コード
    pub lg_code: Option<String>,
    pub pref: Option<String>,
    pub county: Option<String>,
    pub city: Option<String>,
    pub ward: Option<String>,
    pub oaza_cho: Option<String>,
    pub chome: Option<String>,
    pub koaza: Option<String>,
    pub machiaza_id: Option<String>,
    pub block: Option<String>,
    pub block_id: Option<String>,
    pub rsdt_num: Option<String>,
    pub rsdt_id: Option<String>,
    pub rsdt_num2: Option<String>,
    pub rsdt2_id: Option<String>,
    /// 住居表示の実施フラグ
    pub rsdt_addr_flg: Option<u8>,
    pub prc_num1: Option<String>,
    pub prc_num2: Option<String>,
    pub prc_num3: Option<String>,
    pub prc_id: Option<String>,

    /// これまでに消費した入力文字数
    pub matched_cnt: usize,
    /// レコード生成時刻（レイテンシ計測用）
    pub start_time: Instant,
}

impl Query {
    /// 入力行からレコードを作成します。
    ///
    /// `temp_address`は入力と同一の文字連鎖で初期化されます。正規化は
    /// 取り込みステージが行います。
    pub fn new<S>(input: S) -> Self
    where
        S: Into<String>,
    {
        let input = input.into();
        let temp_address = CharSeq::from_input(&input);
        Self {
            input,
            temp_address,
            match_level: MatchLevel::Unknown,
            coordinate_level: MatchLevel::Unknown,
            rep_lat: None,
            rep_lon: None,
            pref_key: None,
            city_key: None,
            town_key: None,
            parcel_key: None,
            rsdtblk_key: None,
            rsdtdsp_key: None,
            lg_code: None,
            pref: None,
            county: None,
            city: None,
            ward: None,
            oaza_cho: None,
            chome: None,
            koaza: None,
            machiaza_id: None,
            block: None,
            block_id: None,
            rsdt_num: None,
            rsdt_id: None,
            rsdt_num2: None,
            rsdt2_id: None,
            rsdt_addr_flg: None,
            prc_num1: None,
            prc_num2: None,
            prc_num3: None,
            prc_id: None,
            matched_cnt: 0,
            start_time: Instant::now(),
        }
    }

    /// 先頭の`depth`文字を消費したコピーを返します。
    ///
    /// `temp_address`が短縮され、`matched_cnt`が加算されます。
    pub fn consumed(&self, depth: usize) -> Self {
        let mut next = self.clone();
        next.temp_address = self.temp_address.tail_from(depth);
        next.matched_cnt += depth;
        next
    }

    /// 未消費末尾を置き換えたコピーを返します。
    ///
    /// `consumed_cnt`には今回消費した文字数を渡します。
    pub fn with_tail(&self, tail: CharSeq, consumed_cnt: usize) -> Self {
        let mut next = self.clone();
        next.temp_address = tail;
        next.matched_cnt += consumed_cnt;
        next
    }

    /// 代表座標を付与したコピーを返します。
    ///
    /// `coordinate_level`は`match_level`を超えないよう切り詰められます。
    pub fn with_coordinates(&self, lat: f64, lon: f64, level: MatchLevel) -> Self {
        let mut next = self.clone();
        next.rep_lat = Some(lat);
        next.rep_lon = Some(lon);
        next.coordinate_level = level.min(next.match_level);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_level_ordering() {
        assert!(MatchLevel::Unknown < MatchLevel::Prefecture);
        assert!(MatchLevel::City < MatchLevel::Machiaza);
        assert!(MatchLevel::MachiazaDetail < MatchLevel::ResidentialBlock);
        assert!(MatchLevel::ResidentialDetail < MatchLevel::Parcel);
    }

    #[test]
    fn test_consumed_advances_matched_cnt() {
        let q = Query::new("東京都千代田区");
        let q2 = q.consumed(3);
        assert_eq!(q2.temp_address.to_string(), "千代田区");
        assert_eq!(q2.matched_cnt, 3);
        // 元のレコードは変更されない
        assert_eq!(q.matched_cnt, 0);
    }

    #[test]
    fn test_coordinate_level_clamped() {
        let mut q = Query::new("東京都");
        q.match_level = MatchLevel::Prefecture;
        let q2 = q.with_coordinates(35.68, 139.76, MatchLevel::City);
        assert!(q2.match_level >= q2.coordinate_level);
        assert_eq!(q2.coordinate_level, MatchLevel::Prefecture);
    }
}
