//! エラー型の定義
//!
//! このモジュールは、Komachiライブラリで使用されるすべてのエラー型を定義します。

use std::error::Error;
use std::fmt::{self, Debug};

/// Komachi専用のResult型
///
/// エラー型としてデフォルトで[`GeocodeError`]を使用します。
pub type Result<T, E = GeocodeError> = std::result::Result<T, E>;

/// Komachiのエラー型
///
/// このライブラリで発生する可能性のあるすべてのエラーを表現します。
/// 住所の部分一致の失敗はエラーではなく、`match_level`が到達水準を示したまま
/// レコードが下流へ流れます（[`crate::query::Query`]参照）。
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    /// 無効な引数エラー
    ///
    /// [`InvalidArgumentError`]のエラーバリアント。
    #[error(transparent)]
    InvalidArgument(InvalidArgumentError),

    /// 無効なフォーマットエラー
    ///
    /// [`InvalidFormatError`]のエラーバリアント。
    #[error(transparent)]
    InvalidFormat(InvalidFormatError),

    /// 無効な状態エラー
    ///
    /// 索引の破損など、処理を継続できない内部状態を示します。
    #[error(transparent)]
    InvalidState(InvalidStateError),

    /// 参照データベースのエラー
    ///
    /// [`rusqlite::Error`]のエラーバリアント。
    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    /// 整数パースエラー
    ///
    /// [`ParseIntError`](std::num::ParseIntError)のエラーバリアント。
    #[error(transparent)]
    ParseInt(std::num::ParseIntError),

    /// 浮動小数点数パースエラー
    ///
    /// [`ParseFloatError`](std::num::ParseFloatError)のエラーバリアント。
    #[error(transparent)]
    ParseFloat(std::num::ParseFloatError),

    /// 正規表現のコンパイルエラー
    ///
    /// [`regex::Error`]のエラーバリアント。
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// JSONシリアライズエラー
    ///
    /// [`serde_json::Error`]のエラーバリアント。
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// バックグラウンドスレッドパニックエラー
    ///
    /// 辞書トライの構築スレッドやダウンロードワーカーがパニックした場合に発生します。
    #[error("Background thread panicked: {0}")]
    ThreadPanic(String),

    /// ダウンロードエラー
    ///
    /// [`DownloadError`]のエラーバリアント。
    /// `download`フィーチャーが有効な場合のみ利用可能です。
    #[cfg(feature = "download")]
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// I/Oエラー
    ///
    /// [`std::io::Error`]のエラーバリアント。
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl GeocodeError {
    /// 無効な引数エラーを生成します
    ///
    /// # 引数
    ///
    /// * `arg` - 引数の名前
    /// * `msg` - エラーメッセージ
    pub(crate) fn invalid_argument<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidArgument(InvalidArgumentError {
            arg,
            msg: msg.into(),
        })
    }

    /// 無効なフォーマットエラーを生成します
    ///
    /// # 引数
    ///
    /// * `arg` - フォーマット名
    /// * `msg` - エラーメッセージ
    pub(crate) fn invalid_format<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidFormat(InvalidFormatError {
            arg,
            msg: msg.into(),
        })
    }

    /// 無効な状態エラーを生成します
    ///
    /// # 引数
    ///
    /// * `msg` - エラーメッセージ
    /// * `cause` - エラーの原因
    pub(crate) fn invalid_state<S, M>(msg: S, cause: M) -> Self
    where
        S: Into<String>,
        M: Into<String>,
    {
        Self::InvalidState(InvalidStateError {
            msg: msg.into(),
            cause: cause.into(),
        })
    }
}

/// 引数が無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidArgumentError {
    /// 引数の名前
    pub(crate) arg: &'static str,

    /// エラーメッセージ
    pub(crate) msg: String,
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidArgumentError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidArgumentError {}

/// 入力フォーマットが無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidFormatError {
    /// フォーマットの名前
    pub(crate) arg: &'static str,

    /// エラーメッセージ
    pub(crate) msg: String,
}

impl fmt::Display for InvalidFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidFormatError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidFormatError {}

/// 状態が無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidStateError {
    /// エラーメッセージ
    pub(crate) msg: String,

    /// エラーの根本原因
    pub(crate) cause: String,
}

impl fmt::Display for InvalidStateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidStateError: {}: {}", self.msg, self.cause)
    }
}

impl Error for InvalidStateError {}

/// ダウンロード関連のエラー
///
/// `download`フィーチャーが有効な場合のみ利用可能です。
/// 参照データのダウンロード中に発生する可能性のあるエラーを表現します。
/// リトライ上限到達時にはタスク単位のレコードとしてストリームに流れ、
/// ストリーム全体を中断しません（[`crate::fetch`]参照）。
#[cfg(feature = "download")]
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// ネットワークリクエストの失敗
    #[error("Network request failed")]
    Request(#[from] reqwest::Error),

    /// I/Oエラー
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTPステータスエラー
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),

    /// ダウンロードファイルのチェックサム不一致
    ///
    /// ダウンロードされたファイルが破損している可能性があります。
    #[error("Downloaded file checksum mismatch. It may be corrupted.")]
    HashMismatch,

    /// アーカイブ内に期待したファイルが存在しない
    #[error("The archive does not contain the expected dataset file.")]
    DatasetFileNotFound,

    /// Zipアーカイブの展開エラー
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// パスの永続化エラー
    #[error(transparent)]
    PathPersist(#[from] tempfile::PersistError),
}

impl From<std::num::ParseIntError> for GeocodeError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::ParseInt(error)
    }
}

impl From<std::num::ParseFloatError> for GeocodeError {
    fn from(error: std::num::ParseFloatError) -> Self {
        Self::ParseFloat(error)
    }
}
