//! `geocode`サブコマンド
//!
//! 参照ストアを開いてパイプラインを組み立て、入力の各行をジオコーディング
//! して指定形式で出力します。入力は`--source`で与えられたファイル、または
//! `-`で標準入力です。`#`や`//`で始まるコメント行は取り込み前に捨てられ
//! ます。

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;
use tracing::info;

use komachi::format::{formatter_for, Column, OutputFormat};
use komachi::pipeline::filter_line;
use komachi::{Geocoder, GeocoderConfig, ReferenceStore};

/// コマンドライン引数
#[derive(Parser, Debug)]
pub struct Args {
    /// Directory holding the reference database.
    #[clap(short = 'd', long, default_value = "./data")]
    data_dir: PathBuf,

    /// Output format. Choices are csv, json, and ndjson.
    #[clap(short = 'f', long, default_value = "csv")]
    format: OutputFormat,

    /// Wildcard character for fuzzy matching.
    #[clap(long)]
    fuzzy: Option<char>,

    /// Input file, or - for stdin.
    #[clap(short = 's', long, default_value = "-")]
    source: String,

    /// Suppresses the CSV header row.
    #[clap(long)]
    no_header: bool,

    /// Comma-separated CSV columns to output.
    #[clap(long, value_delimiter = ',')]
    columns: Option<Vec<Column>>,
}

/// ジオコーディング実行中に発生する可能性のあるエラー
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// 参照データベースが見つからない
    #[error("reference database not found at {0}. Run `komachi download` first.")]
    DatabaseNotFound(PathBuf),
    /// 入力ファイルを開けない
    #[error("cannot open source {path}: {source}")]
    SourceOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// エンジンのエラー
    #[error(transparent)]
    Engine(#[from] komachi::GeocodeError),
    /// I/Oエラー
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// サブコマンドを実行します。
pub fn run(args: Args) -> Result<(), GeocodeError> {
    let db_path = args.data_dir.join("reference.sqlite");
    if !db_path.exists() {
        return Err(GeocodeError::DatabaseNotFound(db_path));
    }

    eprintln!("Loading the reference store...");
    let store = ReferenceStore::open(&db_path)?;
    let geocoder = Geocoder::from_store(&store, GeocoderConfig { fuzzy: args.fuzzy })?;
    eprintln!("Ready to geocode");

    let reader: Box<dyn BufRead> = if args.source == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = File::open(&args.source).map_err(|source| GeocodeError::SourceOpen {
            path: args.source.clone(),
            source,
        })?;
        Box::new(BufReader::new(file))
    };

    let is_tty = atty::is(atty::Stream::Stdout);
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let columns = args.columns.unwrap_or_else(Column::default_set);
    let mut formatter = formatter_for(args.format, columns, !args.no_header);
    formatter.begin(&mut out)?;

    let mut total = 0usize;
    for line in reader.lines() {
        let line = line?;
        let Some(input) = filter_line(&line) else {
            continue;
        };
        let query = geocoder.geocode(input)?;
        formatter.write_record(&mut out, &query)?;
        total += 1;
        if is_tty {
            out.flush()?;
        }
    }
    formatter.finish(&mut out)?;
    out.flush()?;
    info!(total, "geocoding finished");

    Ok(())
}
