//! `download`サブコマンド
//!
//! ダウンロードファブリックへデータセットのアーカイブ取得を投入し、
//! 展開されたCSVをSQLiteの参照ストアへ取り込みます。失敗したデータセット
//! は警告として報告され、残りの取り込みは継続します。

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{info, warn};

use komachi::fetch::{extract_archive, DownloadEvent, DownloadRequest, Downloader, HttpFetcher};
use komachi::utils::parse_csv_row;
use komachi::ReferenceStore;

/// データセット配布サイトのベースURL
const BASE_URL: &str = "https://catalog.registries.digital.go.jp/rsc/address";

/// 同時に実行するダウンロードタスク数の上限
const MAX_TASKS_PER_WORKER: usize = 4;

/// コマンドライン引数
#[derive(Parser, Debug)]
pub struct Args {
    /// Directory to store the reference database and cache.
    #[clap(short = 'd', long, default_value = "./data")]
    data_dir: PathBuf,

    /// Dataset resource ids to fetch. May be repeated.
    #[clap(short = 'r', long = "resource-id", required = true)]
    resource_ids: Vec<String>,
}

/// ダウンロード実行中に発生する可能性のあるエラー
#[derive(Debug, Error)]
pub enum DownloadError {
    /// エンジンのエラー
    #[error(transparent)]
    Engine(#[from] komachi::GeocodeError),
    /// I/Oエラー
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// CSVの列構成が想定と異なる
    #[error("dataset {name}: missing column {column}")]
    MissingColumn { name: String, column: &'static str },
}

/// サブコマンドを実行します。
///
/// すべてのデータセットの完了（成功またはリトライ上限）を待ってから
/// ストアへの取り込みを行います。ダウンロードに失敗したデータセットが
/// あっても残りは取り込まれます。
pub fn run(args: Args) -> Result<(), DownloadError> {
    std::fs::create_dir_all(&args.data_dir)?;
    let store = ReferenceStore::create(args.data_dir.join("reference.sqlite"))?;

    let fetcher = HttpFetcher::new().map_err(komachi::GeocodeError::from)?;
    let mut downloader = Downloader::new(fetcher, args.data_dir.join("cache"), MAX_TASKS_PER_WORKER);

    let progress = ProgressBar::new(args.resource_ids.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .expect("valid template")
            .progress_chars("=>-"),
    );

    for resource_id in &args.resource_ids {
        downloader.submit(DownloadRequest {
            url: format!("{}/{}.zip", BASE_URL, resource_id),
            name: resource_id.clone(),
        })?;
    }
    downloader.finish();

    let extract_dir = args.data_dir.join("extracted");
    let mut failed = 0usize;
    loop {
        match downloader.recv()? {
            DownloadEvent::Item(Ok(file)) => {
                progress.set_message(file.request.name.clone());
                let csvs = extract_archive(&file.path, &extract_dir, "csv")?;
                for csv in &csvs {
                    import_csv(&store, &file.request.name, csv)?;
                }
                progress.inc(1);
            }
            DownloadEvent::Item(Err(e)) => {
                warn!(name = %e.request.name, attempts = e.attempts, error = %e.source,
                      "dataset download failed");
                failed += 1;
                progress.inc(1);
            }
            DownloadEvent::Done => break,
        }
    }
    downloader.close()?;
    progress.finish_with_message("done");

    if failed > 0 {
        eprintln!("{} dataset(s) failed to download", failed);
    }
    Ok(())
}

/// ヘッダ行から列名と添字の対応を作ります。
fn header_index(header: &str) -> HashMap<String, usize> {
    parse_csv_row(header)
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect()
}

/// 行から列の値を取り出します。空文字列は`None`になります。
fn field<'a>(row: &'a [String], index: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    index
        .get(name)
        .and_then(|&i| row.get(i))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// 必須の列の値を取り出します。
fn required<'a>(
    row: &'a [String],
    index: &HashMap<String, usize>,
    dataset: &str,
    name: &'static str,
) -> Result<&'a str, DownloadError> {
    field(row, index, name).ok_or_else(|| DownloadError::MissingColumn {
        name: dataset.to_string(),
        column: name,
    })
}

fn float(row: &[String], index: &HashMap<String, usize>, name: &str) -> Option<f64> {
    field(row, index, name).and_then(|v| v.parse().ok())
}

/// CSVファイルを1つストアへ取り込みます。
///
/// テーブルはファイル名の接頭辞（mt_pref、mt_city、mt_town、
/// mt_rsdtdsp_blk、mt_rsdtdsp_rsdt、mt_parcel）で判別します。
fn import_csv(store: &ReferenceStore, dataset: &str, path: &Path) -> Result<(), DownloadError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    const KNOWN_PREFIXES: &[&str] = &[
        "mt_pref",
        "mt_city",
        "mt_town",
        "mt_rsdtdsp_blk",
        "mt_rsdtdsp_rsdt",
        "mt_parcel",
    ];
    if !KNOWN_PREFIXES.iter().any(|p| file_name.starts_with(p)) {
        warn!(file = %file_name, "unrecognized dataset file, skipped");
        return Ok(());
    }

    let reader = std::io::BufReader::new(std::fs::File::open(path)?);
    let mut lines = reader.lines();
    let Some(header) = lines.next().transpose()? else {
        return Ok(());
    };
    let index = header_index(&header);

    let mut imported = 0usize;
    for line in lines {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let row = parse_csv_row(&line);
        if file_name.starts_with("mt_pref") {
            store.insert_pref(
                required(&row, &index, dataset, "lg_code")?,
                required(&row, &index, dataset, "pref")?,
                float(&row, &index, "rep_lat"),
                float(&row, &index, "rep_lon"),
            )?;
        } else if file_name.starts_with("mt_city") {
            store.insert_city(
                required(&row, &index, dataset, "lg_code")?,
                required(&row, &index, dataset, "pref")?,
                field(&row, &index, "county"),
                required(&row, &index, dataset, "city")?,
                field(&row, &index, "ward"),
                float(&row, &index, "rep_lat"),
                float(&row, &index, "rep_lon"),
            )?;
        } else if file_name.starts_with("mt_town") {
            store.insert_town(
                required(&row, &index, dataset, "lg_code")?,
                required(&row, &index, dataset, "machiaza_id")?,
                field(&row, &index, "oaza_cho"),
                field(&row, &index, "chome"),
                field(&row, &index, "koaza"),
                field(&row, &index, "rsdt_addr_flg").and_then(|v| v.parse().ok()),
                float(&row, &index, "rep_lat"),
                float(&row, &index, "rep_lon"),
            )?;
        } else if file_name.starts_with("mt_rsdtdsp_blk") {
            store.insert_rsdt_blk(
                required(&row, &index, dataset, "lg_code")?,
                required(&row, &index, dataset, "machiaza_id")?,
                required(&row, &index, dataset, "blk_id")?,
                required(&row, &index, dataset, "blk_num")?,
                float(&row, &index, "rep_lat"),
                float(&row, &index, "rep_lon"),
            )?;
        } else if file_name.starts_with("mt_rsdtdsp_rsdt") {
            store.insert_rsdt_dsp(
                required(&row, &index, dataset, "lg_code")?,
                required(&row, &index, dataset, "machiaza_id")?,
                required(&row, &index, dataset, "blk_id")?,
                required(&row, &index, dataset, "rsdt_id")?,
                field(&row, &index, "rsdt2_id"),
                required(&row, &index, dataset, "rsdt_num")?,
                field(&row, &index, "rsdt_num2"),
                float(&row, &index, "rep_lat"),
                float(&row, &index, "rep_lon"),
            )?;
        } else if file_name.starts_with("mt_parcel") {
            store.insert_parcel(
                required(&row, &index, dataset, "lg_code")?,
                required(&row, &index, dataset, "machiaza_id")?,
                required(&row, &index, dataset, "prc_id")?,
                required(&row, &index, dataset, "prc_num1")?,
                field(&row, &index, "prc_num2"),
                field(&row, &index, "prc_num3"),
                float(&row, &index, "rep_lat"),
                float(&row, &index, "rep_lon"),
            )?;
        }
        imported += 1;
    }
    info!(file = %file_name, imported, "dataset imported");
    Ok(())
}
