//! 参照データのダウンロードファブリック
//!
//! このモジュールは、同時実行数に上限のあるダウンロード処理を提供します。
//! ファブリックは`max_tasks`本のスレッドで共有の投入キューを払い出し、
//! 同時に実行されるタスク数はその上限を超えません。投入はキューが満杯の
//! 間ブロックし（背圧）、結果は完了順にイベントとして流れます。投入順は
//! 保存されません。
//!
//! 失敗したタスクはキャッシュを無効化したうえで最大5回まで再試行され、
//! 試行間には100〜5100ミリ秒の一様乱数の待機が入ります。上限に達した
//! タスクはストリームを中断せず、型付きのエラーレコードとして下流へ
//! 流れます。
//!
//! キャッシュはURLのSHA-256で内容アドレスされ、ダウンロードは一時ファイル
//! を経由して原子的に確定します。

#![cfg(feature = "download")]

use std::fs::{self, File};
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::{DownloadError, GeocodeError, Result};

/// 1タスクあたりの最大試行回数
const MAX_ATTEMPTS: u32 = 5;

/// 試行間の待機時間（ミリ秒）の範囲
const RETRY_DELAY_MS: Range<u64> = 100..5100;

/// ダウンロード要求
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// 取得先URL
    pub url: String,
    /// データセットの表示名
    pub name: String,
}

/// ダウンロード成功の結果
#[derive(Debug)]
pub struct DownloadedFile {
    pub request: DownloadRequest,
    /// キャッシュ内のファイルパス
    pub path: PathBuf,
    /// キャッシュから供給されたかどうか
    pub from_cache: bool,
    /// 要した試行回数
    pub attempts: u32,
}

/// リトライ上限に達したタスクのエラーレコード
///
/// ストリームの要素として流れ、ストリーム自体は中断しません。
#[derive(Debug, thiserror::Error)]
#[error("download of {} failed after {attempts} attempts: {source}", request.name)]
pub struct DownloadProcessError {
    pub request: DownloadRequest,
    pub attempts: u32,
    #[source]
    pub source: DownloadError,
}

/// ダウンロードストリームのイベント
#[derive(Debug)]
pub enum DownloadEvent {
    /// 1タスクの完了（成功またはリトライ上限）
    Item(std::result::Result<DownloadedFile, DownloadProcessError>),
    /// 終端。投入の終了が通知され、実行中のタスクが無くなったときに
    /// 一度だけ流れます。
    Done,
}

/// HTTP取得の抽象
///
/// 本番は[`HttpFetcher`]、テストはスタブを注入します。複数のタスクから
/// 同時に呼ばれます。
pub trait Fetcher: Send + Sync + 'static {
    /// URLの内容をライタへ書き込みます。
    fn fetch(&self, url: &str, out: &mut dyn Write) -> std::result::Result<(), DownloadError>;
}

/// reqwestによるHTTP取得
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// 既定のクライアントで作成します。
    pub fn new() -> std::result::Result<Self, DownloadError> {
        Ok(Self {
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(600))
                .build()?,
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, out: &mut dyn Write) -> std::result::Result<(), DownloadError> {
        let mut response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus(response.status()));
        }
        response.copy_to(out).map_err(DownloadError::Request)?;
        Ok(())
    }
}

/// URLから内容アドレスのキャッシュファイル名を導出します。
fn cache_file_name(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{}.dat", hex::encode(hasher.finalize()))
}

/// 1回分の取得を行います。
///
/// `use_cache`が真でキャッシュファイルが存在する場合はダウンロードを
/// 省略します。取得は一時ファイルへ書き込み、完了後に原子的に確定します。
fn download_once<F: Fetcher>(
    fetcher: &F,
    cache_dir: &Path,
    request: &DownloadRequest,
    use_cache: bool,
) -> std::result::Result<(PathBuf, bool), DownloadError> {
    let dest = cache_dir.join(cache_file_name(&request.url));
    if use_cache && dest.exists() {
        return Ok((dest, true));
    }
    fs::create_dir_all(cache_dir)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(cache_dir)?;
    fetcher.fetch(&request.url, temp_file.as_file_mut())?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(&dest)?;
    Ok((dest, false))
}

/// リトライ付きで1タスクを実行します。
///
/// 初回のみキャッシュを参照し、失敗後の再試行はキャッシュを無効化します。
/// 試行回数は増加のみで、上限は5回です。
fn run_task<F: Fetcher>(
    fetcher: &F,
    cache_dir: &Path,
    delay_ms: &Range<u64>,
    request: DownloadRequest,
) -> std::result::Result<DownloadedFile, DownloadProcessError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let use_cache = attempt == 1;
        match download_once(fetcher, cache_dir, &request, use_cache) {
            Ok((path, from_cache)) => {
                debug!(name = %request.name, attempt, from_cache, "download finished");
                return Ok(DownloadedFile {
                    request,
                    path,
                    from_cache,
                    attempts: attempt,
                });
            }
            Err(source) => {
                warn!(name = %request.name, attempt, error = %source, "download attempt failed");
                if attempt >= MAX_ATTEMPTS {
                    return Err(DownloadProcessError {
                        request,
                        attempts: attempt,
                        source,
                    });
                }
                let wait = rand::rng().random_range(delay_ms.clone());
                std::thread::sleep(Duration::from_millis(wait));
            }
        }
    }
}

/// ダウンロードファブリック
///
/// 容量制限付きの投入キューを、同数のスレッドが共有して払い出します。
/// 同時に実行されるタスク数は`max_tasks`を超えず、キューが満杯のとき
/// [`submit`]はブロックします。結果は完了順に[`recv`]から取り出します。
///
/// [`submit`]: Self::submit
/// [`recv`]: Self::recv
pub struct Downloader {
    intake: Option<SyncSender<DownloadRequest>>,
    events: Receiver<DownloadEvent>,
    supervisor: Option<JoinHandle<()>>,
}

impl Downloader {
    /// ファブリックを起動します。
    ///
    /// # 引数
    ///
    /// * `fetcher` - HTTP取得の実装
    /// * `cache_dir` - 内容アドレスキャッシュのディレクトリ
    /// * `max_tasks` - 同時に実行するタスク数の上限
    pub fn new<F: Fetcher>(fetcher: F, cache_dir: PathBuf, max_tasks: usize) -> Self {
        Self::with_delay(fetcher, cache_dir, max_tasks, RETRY_DELAY_MS)
    }

    fn with_delay<F: Fetcher>(
        fetcher: F,
        cache_dir: PathBuf,
        max_tasks: usize,
        delay_ms: Range<u64>,
    ) -> Self {
        let max_tasks = max_tasks.max(1);
        let (intake, requests) = mpsc::sync_channel::<DownloadRequest>(max_tasks);
        let (events_tx, events) = mpsc::channel();

        let fetcher = Arc::new(fetcher);
        let requests = Arc::new(Mutex::new(requests));
        let running = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(max_tasks);
        for _ in 0..max_tasks {
            let fetcher = Arc::clone(&fetcher);
            let requests = Arc::clone(&requests);
            let running = Arc::clone(&running);
            let events_tx = events_tx.clone();
            let cache_dir = cache_dir.clone();
            let delay_ms = delay_ms.clone();
            workers.push(std::thread::spawn(move || loop {
                // ロックは受信待ちの間だけ保持し、タスクの実行中は解放する
                let request = {
                    let Ok(guard) = requests.lock() else {
                        break;
                    };
                    guard.recv()
                };
                let Ok(request) = request else {
                    // 投入の終了。このワーカーは払い出しを終える。
                    break;
                };
                running.fetch_add(1, Ordering::SeqCst);
                let result = run_task(fetcher.as_ref(), &cache_dir, &delay_ms, request);
                // 完了順にそのまま下流へ押し出す
                let _ = events_tx.send(DownloadEvent::Item(result));
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        // 終端は、投入の終了が全ワーカーへ伝わり実行中のタスクが
        // 無くなったときに一度だけ流す
        let supervisor = std::thread::spawn(move || {
            for worker in workers {
                if let Err(panic) = worker.join() {
                    std::panic::resume_unwind(panic);
                }
            }
            debug_assert_eq!(running.load(Ordering::SeqCst), 0);
            let _ = events_tx.send(DownloadEvent::Done);
        });

        Self {
            intake: Some(intake),
            events,
            supervisor: Some(supervisor),
        }
    }

    /// タスクを投入します。キューが満杯の場合は空きが出るまでブロック
    /// します。
    pub fn submit(&self, request: DownloadRequest) -> Result<()> {
        match &self.intake {
            Some(intake) => intake
                .send(request)
                .map_err(|e| GeocodeError::invalid_state("download fabric is closed", e.to_string())),
            None => Err(GeocodeError::invalid_state(
                "download fabric is finishing",
                "submit after finish",
            )),
        }
    }

    /// これ以上の投入が無いことを通知します。
    ///
    /// 実行中のタスクがすべて完了すると[`DownloadEvent::Done`]が流れます。
    pub fn finish(&mut self) {
        self.intake.take();
    }

    /// 次のイベントを待ち受けます。
    pub fn recv(&self) -> Result<DownloadEvent> {
        self.events
            .recv()
            .map_err(|e| GeocodeError::invalid_state("download fabric worker is gone", e.to_string()))
    }

    /// 実行中のタスクの終了を待ち、ワーカーを停止します。
    pub fn close(mut self) -> Result<()> {
        self.intake.take();
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.join().map_err(|panic| {
                let msg = if let Some(s) = panic.downcast_ref::<&'static str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                GeocodeError::ThreadPanic(msg)
            })?;
        }
        Ok(())
    }
}

/// Zipアーカイブから指定拡張子のファイルを展開します。
///
/// データセットのアーカイブはCSVを内包するzipとして配布されます。
/// 展開されたファイルのパスを返します。
pub fn extract_archive(zip_path: &Path, dest_dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let file = File::open(zip_path).map_err(DownloadError::Io)?;
    let mut archive = zip::ZipArchive::new(file).map_err(DownloadError::Zip)?;
    fs::create_dir_all(dest_dir).map_err(DownloadError::Io)?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(DownloadError::Zip)?;
        let Some(name) = entry.enclosed_name() else {
            continue;
        };
        if name.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let file_name = name.file_name().map(PathBuf::from).unwrap_or_default();
        let dest = dest_dir.join(file_name);
        let mut out = File::create(&dest).map_err(DownloadError::Io)?;
        io::copy(&mut entry, &mut out).map_err(DownloadError::Io)?;
        extracted.push(dest);
    }
    if extracted.is_empty() {
        return Err(DownloadError::DatasetFileNotFound.into());
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// 指定回数だけ失敗してから成功するスタブ
    struct FlakyFetcher {
        failures: Arc<AtomicU32>,
        calls: Arc<AtomicU32>,
    }

    impl Fetcher for FlakyFetcher {
        fn fetch(&self, _url: &str, out: &mut dyn Write) -> std::result::Result<(), DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(DownloadError::Io(io::Error::other("stub failure")));
            }
            out.write_all(b"payload")?;
            Ok(())
        }
    }

    fn fabric(failures: u32) -> (Downloader, Arc<AtomicU32>, tempfile::TempDir) {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = FlakyFetcher {
            failures: Arc::new(AtomicU32::new(failures)),
            calls: Arc::clone(&calls),
        };
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::with_delay(fetcher, dir.path().to_path_buf(), 4, 0..1);
        (downloader, calls, dir)
    }

    fn request(name: &str) -> DownloadRequest {
        DownloadRequest {
            url: format!("https://example.invalid/{}", name),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_success_first_attempt() {
        let (mut downloader, calls, _dir) = fabric(0);
        downloader.submit(request("a")).unwrap();
        downloader.finish();

        match downloader.recv().unwrap() {
            DownloadEvent::Item(Ok(file)) => {
                assert_eq!(file.attempts, 1);
                assert!(!file.from_cache);
                assert!(file.path.exists());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(downloader.recv().unwrap(), DownloadEvent::Done));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        downloader.close().unwrap();
    }

    #[test]
    fn test_retry_then_success() {
        let (mut downloader, calls, _dir) = fabric(2);
        downloader.submit(request("b")).unwrap();
        downloader.finish();

        match downloader.recv().unwrap() {
            DownloadEvent::Item(Ok(file)) => assert_eq!(file.attempts, 3),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        downloader.close().unwrap();
    }

    #[test]
    fn test_exhaustion_yields_error_record() {
        let (mut downloader, calls, _dir) = fabric(u32::MAX);
        downloader.submit(request("c")).unwrap();
        downloader.submit(request("d")).unwrap();
        downloader.finish();

        let mut errors = 0;
        loop {
            match downloader.recv().unwrap() {
                DownloadEvent::Item(Err(e)) => {
                    assert_eq!(e.attempts, MAX_ATTEMPTS);
                    errors += 1;
                }
                DownloadEvent::Item(Ok(_)) => panic!("should not succeed"),
                DownloadEvent::Done => break,
            }
        }
        // ストリームは中断せず、両方のタスクがエラーレコードになる
        assert_eq!(errors, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2 * MAX_ATTEMPTS);
        downloader.close().unwrap();
    }

    /// URL末尾に応じて遅延するスタブ
    struct StaggeredFetcher;

    impl Fetcher for StaggeredFetcher {
        fn fetch(&self, url: &str, out: &mut dyn Write) -> std::result::Result<(), DownloadError> {
            if url.ends_with("slow") {
                std::thread::sleep(Duration::from_millis(300));
            }
            out.write_all(b"payload")?;
            Ok(())
        }
    }

    #[test]
    fn test_completion_order_not_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut downloader =
            Downloader::with_delay(StaggeredFetcher, dir.path().to_path_buf(), 4, 0..1);
        // 遅いタスクを先に投入しても、速いタスクの完了が先に流れる
        downloader.submit(request("slow")).unwrap();
        downloader.submit(request("quick")).unwrap();
        downloader.finish();

        let mut names = Vec::new();
        loop {
            match downloader.recv().unwrap() {
                DownloadEvent::Item(Ok(file)) => names.push(file.request.name),
                DownloadEvent::Item(Err(e)) => panic!("unexpected failure: {}", e),
                DownloadEvent::Done => break,
            }
        }
        assert_eq!(names, vec!["quick".to_string(), "slow".to_string()]);
        downloader.close().unwrap();
    }

    #[test]
    fn test_cache_hit_skips_fetch() {
        let (mut first, _, dir) = fabric(0);
        first.submit(request("e")).unwrap();
        first.finish();
        assert!(matches!(first.recv().unwrap(), DownloadEvent::Item(Ok(_))));
        first.close().unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = FlakyFetcher {
            failures: Arc::new(AtomicU32::new(0)),
            calls: Arc::clone(&calls),
        };
        let mut second = Downloader::with_delay(fetcher, dir.path().to_path_buf(), 4, 0..1);
        second.submit(request("e")).unwrap();
        second.finish();
        match second.recv().unwrap() {
            DownloadEvent::Item(Ok(file)) => assert!(file.from_cache),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        second.close().unwrap();
    }

    #[test]
    fn test_submit_after_finish_fails() {
        let (mut downloader, _, _dir) = fabric(0);
        downloader.finish();
        assert!(downloader.submit(request("f")).is_err());
        downloader.close().unwrap();
    }
}
