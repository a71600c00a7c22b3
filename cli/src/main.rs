//! 住所ジオコーディングCLIのメインエントリーポイント
//!
//! このバイナリは、参照データの取得（`download`）とジオコーディングの
//! 実行（`geocode`）の2つのサブコマンドを提供します。初期化に失敗した
//! 場合のみ非ゼロで終了し、レコード単位の解決失敗は終了コードに影響
//! しません。

mod download;
mod geocode;

use clap::Parser;
use thiserror::Error;

use crate::download::DownloadError;
use crate::geocode::GeocodeError;

/// コマンドライン引数の構造体
///
/// `clap`を使用してコマンドライン引数をパースします。
#[derive(Parser, Debug)]
#[clap(name = "komachi", version)]
struct Cli {
    /// 実行するサブコマンド
    #[clap(subcommand)]
    command: Command,
}

/// 利用可能なサブコマンド
#[derive(Parser, Debug)]
enum Command {
    /// 参照データをダウンロードしてデータベースを構築します
    ///
    /// アドレス・ベース・レジストリのデータセットを取得し、SQLiteの
    /// 参照ストアへ取り込みます。
    Download(download::Args),

    /// 住所のジオコーディングを実行します
    ///
    /// 入力の各行を解決し、指定された形式（csv、json、ndjson）で
    /// 出力します。
    Geocode(geocode::Args),
}

/// CLIの実行中に発生する可能性のあるエラー
#[derive(Debug, Error)]
enum CliError {
    /// ダウンロード実行中のエラー
    #[error(transparent)]
    Download(#[from] DownloadError),
    /// ジオコーディング実行中のエラー
    #[error(transparent)]
    Geocode(#[from] GeocodeError),
}

/// メイン関数
///
/// ロギングを初期化し、コマンドライン引数をパースして、指定された
/// サブコマンドを実行します。
fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Download(args) => Ok(download::run(args)?),
        Command::Geocode(args) => Ok(geocode::run(args)?),
    }
}
