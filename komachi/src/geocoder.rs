//! ジオコーダのファサード
//!
//! 参照ストアからパイプライン一式を組み立て、1行の住所文字列を
//! [`Query`]に解決する入口を提供します。トライの構築はバックグラウンド
//! スレッドで行われ、各ステージは最初のレコードの前に完了を待ちます。

use std::sync::Arc;

use tracing::info;

use crate::dictionary::ReferenceStore;
use crate::errors::Result;
use crate::init::Background;
use crate::pipeline::{
    CityIndex, CityRecoveryStage, CityStage, IngestStage, ParcelIndex, ParcelStage, PatchStage,
    Pipeline, PrefectureStage, ResidenceIndex, ResidenceStage, Stage, TownIndex, TownStage,
};
use crate::query::Query;

/// ジオコーダの設定
#[derive(Debug, Clone, Copy, Default)]
pub struct GeocoderConfig {
    /// 入力中でワイルドカードとして扱う文字
    pub fuzzy: Option<char>,
}

/// 住所ジオコーダ
///
/// # 例
///
/// ```no_run
/// # fn main() -> komachi::errors::Result<()> {
/// use komachi::{Geocoder, GeocoderConfig, ReferenceStore};
///
/// let store = ReferenceStore::open("data/reference.sqlite")?;
/// let geocoder = Geocoder::from_store(&store, GeocoderConfig::default())?;
/// let query = geocoder.geocode("東京都千代田区丸の内一丁目")?;
/// assert_eq!(query.pref.as_deref(), Some("東京都"));
/// # Ok(())
/// # }
/// ```
pub struct Geocoder {
    pipeline: Pipeline,
}

impl Geocoder {
    /// 参照ストアからジオコーダを構築します。
    ///
    /// 行の読み込みは呼び出しスレッドで行い、トライの構築は索引ごとの
    /// バックグラウンドスレッドに委ねます。構築完了を待つのは、その索引を
    /// 必要とする最初のレコードを処理するステージです。
    pub fn from_store(store: &ReferenceStore, config: GeocoderConfig) -> Result<Self> {
        let prefs = store.load_prefectures()?;
        let cities = store.load_cities()?;
        let towns = store.load_towns()?;
        let blks = store.load_rsdt_blks()?;
        let dsps = store.load_rsdt_dsps()?;
        let parcels = store.load_parcels()?;
        info!("reference rows loaded, building indexes in background");

        let prefecture = PrefectureStage::new(&prefs, &cities)?;

        let city_index = {
            let cities = cities.clone();
            Arc::new(Background::spawn(move || CityIndex::build(cities)))
        };
        let town_index = Arc::new(Background::spawn(move || TownIndex::build(towns, cities)));
        let residence_index = Arc::new(Background::spawn(move || ResidenceIndex::build(blks, dsps)));
        let parcel_index = Arc::new(Background::spawn(move || ParcelIndex::build(parcels)));

        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(IngestStage),
            Box::new(prefecture),
            Box::new(CityStage::new(Arc::clone(&city_index), config.fuzzy)),
            Box::new(CityRecoveryStage::new(city_index, config.fuzzy)),
            Box::new(TownStage::new(town_index, config.fuzzy)),
            Box::new(PatchStage::new()?),
            Box::new(ResidenceStage::new(residence_index, config.fuzzy)),
            Box::new(ParcelStage::new(parcel_index, config.fuzzy)),
        ];

        Ok(Self {
            pipeline: Pipeline::new(stages),
        })
    }

    /// 1行の住所をジオコーディングします。
    ///
    /// パイプラインが複数の候補を返した場合は、到達水準の高い順、消費
    /// 文字数の多い順で最良の1件を返します。どのステージでも解決できな
    /// かった行は、`match_level`が未解決のまま元の入力を保って返ります。
    pub fn geocode(&self, input: &str) -> Result<Query> {
        let mut records = self.pipeline.process(Query::new(input))?;
        records.sort_by(|a, b| {
            (b.match_level, b.matched_cnt).cmp(&(a.match_level, a.matched_cnt))
        });
        Ok(records
            .into_iter()
            .next()
            .unwrap_or_else(|| Query::new(input)))
    }

    /// パイプラインへの参照を返します。
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}
