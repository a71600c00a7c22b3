//! SQLiteによる参照データストア
//!
//! 参照データは`download`コマンドがテーブルへ書き込み、ジオコーディング時は
//! 読み取りのみです。書き込み（取り込み）フェーズが読み取り（照合）フェーズ
//! に先行します。

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags};
use tracing::info;

use crate::dictionary::rows::{
    address_key, chome_number, town_match_key, CityInfo, ParcelInfo, PrefectureInfo, RsdtBlkInfo,
    RsdtDspInfo, TownMatchingInfo,
};
use crate::errors::Result;
use crate::normalizer::normalize_str;

/// テーブル定義
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pref (
    lg_code  TEXT PRIMARY KEY,
    pref     TEXT NOT NULL,
    rep_lat  REAL,
    rep_lon  REAL
);
CREATE TABLE IF NOT EXISTS city (
    lg_code  TEXT PRIMARY KEY,
    pref     TEXT NOT NULL,
    county   TEXT,
    city     TEXT NOT NULL,
    ward     TEXT,
    rep_lat  REAL,
    rep_lon  REAL
);
CREATE TABLE IF NOT EXISTS town (
    lg_code       TEXT NOT NULL,
    machiaza_id   TEXT NOT NULL,
    oaza_cho      TEXT,
    chome         TEXT,
    koaza         TEXT,
    rsdt_addr_flg INTEGER,
    rep_lat       REAL,
    rep_lon       REAL,
    PRIMARY KEY (lg_code, machiaza_id)
);
CREATE TABLE IF NOT EXISTS rsdt_blk (
    lg_code     TEXT NOT NULL,
    machiaza_id TEXT NOT NULL,
    blk_id      TEXT NOT NULL,
    blk_num     TEXT NOT NULL,
    rep_lat     REAL,
    rep_lon     REAL,
    PRIMARY KEY (lg_code, machiaza_id, blk_id)
);
CREATE TABLE IF NOT EXISTS rsdt_dsp (
    lg_code     TEXT NOT NULL,
    machiaza_id TEXT NOT NULL,
    blk_id      TEXT NOT NULL,
    rsdt_id     TEXT NOT NULL,
    rsdt2_id    TEXT,
    rsdt_num    TEXT NOT NULL,
    rsdt_num2   TEXT,
    rep_lat     REAL,
    rep_lon     REAL,
    PRIMARY KEY (lg_code, machiaza_id, blk_id, rsdt_id)
);
CREATE TABLE IF NOT EXISTS parcel (
    lg_code     TEXT NOT NULL,
    machiaza_id TEXT NOT NULL,
    prc_id      TEXT NOT NULL,
    prc_num1    TEXT NOT NULL,
    prc_num2    TEXT,
    prc_num3    TEXT,
    rep_lat     REAL,
    rep_lon     REAL,
    PRIMARY KEY (lg_code, machiaza_id, prc_id)
);
";

/// 参照データストア
///
/// 照合フェーズでは読み取り専用で共有されます。
pub struct ReferenceStore {
    conn: Connection,
}

impl ReferenceStore {
    /// 既存のデータベースを読み取り専用で開きます。
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    /// データベースを読み書き可能で開き、スキーマを作成します。
    ///
    /// `download`コマンドの取り込みフェーズが使用します。
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// メモリ上にストアを作成します。テストと小規模データ向けです。
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// 都道府県の行を追加します。
    pub fn insert_pref(
        &self,
        lg_code: &str,
        pref: &str,
        rep_lat: Option<f64>,
        rep_lon: Option<f64>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO pref (lg_code, pref, rep_lat, rep_lon) VALUES (?1, ?2, ?3, ?4)",
            params![lg_code, pref, rep_lat, rep_lon],
        )?;
        Ok(())
    }

    /// 市区町村の行を追加します。
    #[allow(clippy::too_many_arguments)]
    pub fn insert_city(
        &self,
        lg_code: &str,
        pref: &str,
        county: Option<&str>,
        city: &str,
        ward: Option<&str>,
        rep_lat: Option<f64>,
        rep_lon: Option<f64>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO city (lg_code, pref, county, city, ward, rep_lat, rep_lon)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![lg_code, pref, county, city, ward, rep_lat, rep_lon],
        )?;
        Ok(())
    }

    /// 町字の行を追加します。
    #[allow(clippy::too_many_arguments)]
    pub fn insert_town(
        &self,
        lg_code: &str,
        machiaza_id: &str,
        oaza_cho: Option<&str>,
        chome: Option<&str>,
        koaza: Option<&str>,
        rsdt_addr_flg: Option<u8>,
        rep_lat: Option<f64>,
        rep_lon: Option<f64>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO town
             (lg_code, machiaza_id, oaza_cho, chome, koaza, rsdt_addr_flg, rep_lat, rep_lon)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![lg_code, machiaza_id, oaza_cho, chome, koaza, rsdt_addr_flg, rep_lat, rep_lon],
        )?;
        Ok(())
    }

    /// 街区の行を追加します。
    pub fn insert_rsdt_blk(
        &self,
        lg_code: &str,
        machiaza_id: &str,
        blk_id: &str,
        blk_num: &str,
        rep_lat: Option<f64>,
        rep_lon: Option<f64>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO rsdt_blk
             (lg_code, machiaza_id, blk_id, blk_num, rep_lat, rep_lon)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![lg_code, machiaza_id, blk_id, blk_num, rep_lat, rep_lon],
        )?;
        Ok(())
    }

    /// 住居番号の行を追加します。
    #[allow(clippy::too_many_arguments)]
    pub fn insert_rsdt_dsp(
        &self,
        lg_code: &str,
        machiaza_id: &str,
        blk_id: &str,
        rsdt_id: &str,
        rsdt2_id: Option<&str>,
        rsdt_num: &str,
        rsdt_num2: Option<&str>,
        rep_lat: Option<f64>,
        rep_lon: Option<f64>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO rsdt_dsp
             (lg_code, machiaza_id, blk_id, rsdt_id, rsdt2_id, rsdt_num, rsdt_num2, rep_lat, rep_lon)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![lg_code, machiaza_id, blk_id, rsdt_id, rsdt2_id, rsdt_num, rsdt_num2, rep_lat, rep_lon],
        )?;
        Ok(())
    }

    /// 地番の行を追加します。
    #[allow(clippy::too_many_arguments)]
    pub fn insert_parcel(
        &self,
        lg_code: &str,
        machiaza_id: &str,
        prc_id: &str,
        prc_num1: &str,
        prc_num2: Option<&str>,
        prc_num3: Option<&str>,
        rep_lat: Option<f64>,
        rep_lon: Option<f64>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO parcel
             (lg_code, machiaza_id, prc_id, prc_num1, prc_num2, prc_num3, rep_lat, rep_lon)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![lg_code, machiaza_id, prc_id, prc_num1, prc_num2, prc_num3, rep_lat, rep_lon],
        )?;
        Ok(())
    }

    /// 都道府県の全行を読み込みます。
    pub fn load_prefectures(&self) -> Result<Vec<PrefectureInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT lg_code, pref, rep_lat, rep_lon FROM pref ORDER BY lg_code")?;
        let rows = stmt.query_map([], |row| {
            let lg_code: String = row.get(0)?;
            let pref: String = row.get(1)?;
            Ok(PrefectureInfo {
                pref_key: address_key(&["pref", &pref]),
                key: normalize_str(&pref),
                lg_code,
                pref,
                rep_lat: row.get(2)?,
                rep_lon: row.get(3)?,
            })
        })?;
        let prefs: Vec<_> = rows.collect::<rusqlite::Result<_>>()?;
        info!(count = prefs.len(), "loaded prefecture rows");
        Ok(prefs)
    }

    /// 市区町村の全行を読み込みます。
    pub fn load_cities(&self) -> Result<Vec<CityInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT lg_code, pref, county, city, ward, rep_lat, rep_lon FROM city ORDER BY lg_code",
        )?;
        let rows = stmt.query_map([], |row| {
            let lg_code: String = row.get(0)?;
            let pref: String = row.get(1)?;
            let county: Option<String> = row.get(2)?;
            let city: String = row.get(3)?;
            let ward: Option<String> = row.get(4)?;
            let spell = format!(
                "{}{}{}",
                county.as_deref().unwrap_or(""),
                city,
                ward.as_deref().unwrap_or("")
            );
            Ok(CityInfo {
                city_key: address_key(&["city", &lg_code]),
                pref_key: address_key(&["pref", &pref]),
                key: normalize_str(&spell),
                lg_code,
                pref,
                county,
                city,
                ward,
                rep_lat: row.get(5)?,
                rep_lon: row.get(6)?,
            })
        })?;
        let cities: Vec<_> = rows.collect::<rusqlite::Result<_>>()?;
        info!(count = cities.len(), "loaded city rows");
        Ok(cities)
    }

    /// 町字の全行を読み込みます。市区町村の名称が結合されます。
    pub fn load_towns(&self) -> Result<Vec<TownMatchingInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.lg_code, t.machiaza_id, t.oaza_cho, t.chome, t.koaza,
                    t.rsdt_addr_flg, t.rep_lat, t.rep_lon,
                    c.pref, c.county, c.city, c.ward
             FROM town t JOIN city c ON c.lg_code = t.lg_code
             ORDER BY t.lg_code, t.machiaza_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let lg_code: String = row.get(0)?;
            let machiaza_id: String = row.get(1)?;
            let oaza_cho: Option<String> = row.get(2)?;
            let chome: Option<String> = row.get(3)?;
            let koaza: Option<String> = row.get(4)?;
            let pref: String = row.get(8)?;
            let spell = format!(
                "{}{}{}",
                oaza_cho.as_deref().unwrap_or(""),
                chome.as_deref().unwrap_or(""),
                koaza.as_deref().unwrap_or("")
            );
            Ok(TownMatchingInfo {
                town_key: address_key(&["town", &lg_code, &machiaza_id]),
                city_key: address_key(&["city", &lg_code]),
                pref_key: address_key(&["pref", &pref]),
                key: town_match_key(&spell),
                machiaza_id,
                pref,
                county: row.get(9)?,
                city: row.get(10)?,
                ward: row.get(11)?,
                oaza_cho,
                chome: chome.as_deref().map(chome_number),
                koaza,
                rsdt_addr_flg: row.get(5)?,
                rep_lat: row.get(6)?,
                rep_lon: row.get(7)?,
                lg_code,
            })
        })?;
        let towns: Vec<_> = rows.collect::<rusqlite::Result<_>>()?;
        info!(count = towns.len(), "loaded town rows");
        Ok(towns)
    }

    /// 街区の全行を読み込みます。
    pub fn load_rsdt_blks(&self) -> Result<Vec<RsdtBlkInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT lg_code, machiaza_id, blk_id, blk_num, rep_lat, rep_lon
             FROM rsdt_blk ORDER BY lg_code, machiaza_id, blk_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let lg_code: String = row.get(0)?;
            let machiaza_id: String = row.get(1)?;
            let blk_id: String = row.get(2)?;
            let blk_num: String = row.get(3)?;
            Ok(RsdtBlkInfo {
                rsdtblk_key: address_key(&[&lg_code, &machiaza_id, &blk_id, "", "", "1"]),
                town_key: address_key(&["town", &lg_code, &machiaza_id]),
                key: normalize_str(&blk_num),
                lg_code,
                machiaza_id,
                blk_id,
                blk_num,
                rep_lat: row.get(4)?,
                rep_lon: row.get(5)?,
            })
        })?;
        let blks: Vec<_> = rows.collect::<rusqlite::Result<_>>()?;
        info!(count = blks.len(), "loaded residential block rows");
        Ok(blks)
    }

    /// 住居番号の全行を読み込みます。
    pub fn load_rsdt_dsps(&self) -> Result<Vec<RsdtDspInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT lg_code, machiaza_id, blk_id, rsdt_id, rsdt2_id, rsdt_num, rsdt_num2,
                    rep_lat, rep_lon
             FROM rsdt_dsp ORDER BY lg_code, machiaza_id, blk_id, rsdt_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let lg_code: String = row.get(0)?;
            let machiaza_id: String = row.get(1)?;
            let blk_id: String = row.get(2)?;
            let rsdt_id: String = row.get(3)?;
            let rsdt2_id: Option<String> = row.get(4)?;
            let rsdt_num: String = row.get(5)?;
            let rsdt_num2: Option<String> = row.get(6)?;
            let spell = match rsdt_num2.as_deref() {
                Some(n2) => format!("{}-{}", rsdt_num, n2),
                None => rsdt_num.clone(),
            };
            Ok(RsdtDspInfo {
                rsdtdsp_key: address_key(&[
                    &lg_code,
                    &machiaza_id,
                    &blk_id,
                    &rsdt_id,
                    rsdt2_id.as_deref().unwrap_or(""),
                    "1",
                ]),
                rsdtblk_key: address_key(&[&lg_code, &machiaza_id, &blk_id, "", "", "1"]),
                key: normalize_str(&spell),
                lg_code,
                machiaza_id,
                blk_id,
                rsdt_id,
                rsdt2_id,
                rsdt_num,
                rsdt_num2,
                rep_lat: row.get(7)?,
                rep_lon: row.get(8)?,
            })
        })?;
        let dsps: Vec<_> = rows.collect::<rusqlite::Result<_>>()?;
        info!(count = dsps.len(), "loaded residential display rows");
        Ok(dsps)
    }

    /// 地番の全行を読み込みます。
    pub fn load_parcels(&self) -> Result<Vec<ParcelInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT lg_code, machiaza_id, prc_id, prc_num1, prc_num2, prc_num3, rep_lat, rep_lon
             FROM parcel ORDER BY lg_code, machiaza_id, prc_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let lg_code: String = row.get(0)?;
            let machiaza_id: String = row.get(1)?;
            let prc_id: String = row.get(2)?;
            let prc_num1: String = row.get(3)?;
            let prc_num2: Option<String> = row.get(4)?;
            let prc_num3: Option<String> = row.get(5)?;
            let mut spell = prc_num1.clone();
            if let Some(n2) = prc_num2.as_deref() {
                spell.push('-');
                spell.push_str(n2);
            }
            if let Some(n3) = prc_num3.as_deref() {
                spell.push('-');
                spell.push_str(n3);
            }
            Ok(ParcelInfo {
                parcel_key: address_key(&[&lg_code, &machiaza_id, &prc_id, "", "", "0"]),
                town_key: address_key(&["town", &lg_code, &machiaza_id]),
                key: normalize_str(&spell),
                lg_code,
                machiaza_id,
                prc_id,
                prc_num1,
                prc_num2,
                prc_num3,
                rep_lat: row.get(6)?,
                rep_lon: row.get(7)?,
            })
        })?;
        let parcels: Vec<_> = rows.collect::<rusqlite::Result<_>>()?;
        info!(count = parcels.len(), "loaded parcel rows");
        Ok(parcels)
    }
}
