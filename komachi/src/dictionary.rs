//! 参照辞書データの構造とアクセス
//!
//! このモジュールは、住所解決に使用する参照データの行型と、それらを
//! 永続化するSQLiteストアへのアクセスを提供します。行は起動時に一括で
//! 読み込まれ、各ステージが所有するトライへバックグラウンドで挿入されます
//! （[`crate::init`]参照）。

mod rows;
mod store;

pub use rows::{
    address_key, chome_number, town_match_key, CityInfo, ParcelInfo, PrefectureInfo, RsdtBlkInfo,
    RsdtDspInfo, TownMatchingInfo,
};
pub use store::ReferenceStore;
