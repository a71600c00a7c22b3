//! # Komachi
//!
//! Komachiは、日本の住所文字列を行政区画の階層（都道府県・市区町村・
//! 町字・街区・住居番号/地番）に解決するバッチジオコーディングエンジン
//! です。
//!
//! ## 概要
//!
//! 入力の各行は[`Query`]レコードとしてステージ列のパイプラインを流れます。
//! 各ステージは正規化済みの残余住所を辞書トライや正規表現規則と照合し、
//! 解決済みのキーと到達水準（[`MatchLevel`]）を付与していきます。参照
//! データが許す範囲で代表座標も付きます。
//!
//! ## 主な構成要素
//!
//! - **トライ照合器**: 仮想接尾辞・ワイルドカード・部分一致に対応し、
//!   未消費末尾を元入力への来歴付きで返します
//! - **多段パイプライン**: 都道府県から地番まで段階的に絞り込む8ステージ
//! - **ダウンロードファブリック**: 参照データの取得を担う、同時実行数に
//!   上限のあるリトライ・内容アドレスキャッシュ付きのワーカー群
//!
//! ## 使用例
//!
//! ```no_run
//! # fn main() -> komachi::errors::Result<()> {
//! use komachi::{Geocoder, GeocoderConfig, ReferenceStore};
//!
//! let store = ReferenceStore::open("data/reference.sqlite")?;
//! let geocoder = Geocoder::from_store(&store, GeocoderConfig::default())?;
//!
//! let query = geocoder.geocode("東京都千代田区丸の内一丁目")?;
//! assert_eq!(query.city.as_deref(), Some("千代田区"));
//! # Ok(())
//! # }
//! ```

/// 住所文字列の内部表現
pub mod charseq;

/// 参照辞書データの構造とアクセス
pub mod dictionary;

/// エラー型の定義
pub mod errors;

/// 参照データのダウンロードファブリック
///
/// `download`フィーチャーが有効な場合のみ利用可能です。
#[cfg(feature = "download")]
pub mod fetch;

/// 出力フォーマッタ
pub mod format;

/// ジオコーダのファサード
mod geocoder;

/// バックグラウンド初期化の待ち合わせ
pub mod init;

/// 住所文字列の正規化関数群
pub mod normalizer;

/// 解決パイプラインとステージ
pub mod pipeline;

/// クエリレコードの定義
pub mod query;

/// トライ照合器
pub mod trie;

/// ユーティリティ関数
pub mod utils;


// Re-exports
pub use dictionary::ReferenceStore;
pub use errors::{GeocodeError, Result};
pub use geocoder::{Geocoder, GeocoderConfig};
pub use query::{MatchLevel, Query};

/// このライブラリのバージョン番号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
