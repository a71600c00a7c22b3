//! バックグラウンド初期化の一回限りの待ち合わせ
//!
//! 辞書トライの構築は起動時にバックグラウンドスレッドで行われ、トライを
//! 所有するステージは最初のレコードを処理する前に完了を待ちます。
//! [`Background`]はその待ち合わせを提供します。構築は一度だけ実行され、
//! 完了後の参照取得はロックを伴いません。

use std::sync::{Mutex, OnceLock};
use std::thread::JoinHandle;

use crate::errors::{GeocodeError, Result};

/// バックグラウンドで構築される値への一回限りの待ち合わせ
///
/// `spawn`で構築スレッドを起動し、`wait`が最初に呼ばれた時点で合流します。
/// 以降の`wait`は構築済みの値への参照を直ちに返します。構築の失敗
/// （エラーもパニックも）は原因が保存され、以降のどの呼び出しでも
/// 同じ原因付きのエラーとして報告されます。
pub struct Background<T> {
    handle: Mutex<Option<JoinHandle<Result<T>>>>,
    slot: OnceLock<T>,
    error: OnceLock<String>,
}

impl<T: Send + 'static> Background<T> {
    /// 構築関数をバックグラウンドスレッドで起動します。
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self {
            handle: Mutex::new(Some(std::thread::spawn(f))),
            slot: OnceLock::new(),
            error: OnceLock::new(),
        }
    }

    /// 構築済みの値を直接包みます。テストや同期構築向けです。
    pub fn ready(value: T) -> Self {
        let slot = OnceLock::new();
        let _ = slot.set(value);
        Self {
            handle: Mutex::new(None),
            slot,
            error: OnceLock::new(),
        }
    }

    /// 構築の完了を待って値への参照を返します。
    ///
    /// # エラー
    ///
    /// 構築関数がエラーを返した場合、またはスレッドがパニックした場合は
    /// [`GeocodeError::InvalidState`]を返します。
    pub fn wait(&self) -> Result<&T> {
        if let Some(v) = self.slot.get() {
            return Ok(v);
        }
        {
            let mut guard = self
                .handle
                .lock()
                .map_err(|e| GeocodeError::ThreadPanic(e.to_string()))?;
            if let Some(handle) = guard.take() {
                match handle.join() {
                    Ok(Ok(value)) => {
                        let _ = self.slot.set(value);
                    }
                    Ok(Err(e)) => {
                        let _ = self.error.set(e.to_string());
                    }
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&'static str>() {
                            s.to_string()
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "Unknown panic".to_string()
                        };
                        // 2回目以降の呼び出しにも原因を残す
                        let _ = self.error.set(msg.clone());
                        return Err(GeocodeError::ThreadPanic(msg));
                    }
                }
            }
        }
        self.slot.get().ok_or_else(|| {
            GeocodeError::invalid_state(
                "dictionary initialization failed",
                self.error.get().cloned().unwrap_or_default(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_returns_built_value() {
        let bg = Background::spawn(|| Ok(21 * 2));
        assert_eq!(*bg.wait().unwrap(), 42);
        // 2回目以降も同じ参照が返る
        assert_eq!(*bg.wait().unwrap(), 42);
    }

    #[test]
    fn test_wait_reports_error_each_time() {
        let bg: Background<u32> =
            Background::spawn(|| Err(GeocodeError::invalid_state("boom", "cause")));
        assert!(bg.wait().is_err());
        assert!(bg.wait().is_err());
    }

    #[test]
    fn test_wait_preserves_panic_cause() {
        let bg: Background<u32> = Background::spawn(|| panic!("builder exploded"));
        let first = bg.wait().unwrap_err();
        assert!(matches!(first, GeocodeError::ThreadPanic(_)));
        assert!(first.to_string().contains("builder exploded"));
        // 2回目の呼び出しでもパニックの原因が保存されている
        let second = bg.wait().unwrap_err();
        assert!(second.to_string().contains("builder exploded"));
    }

    #[test]
    fn test_ready_skips_thread() {
        let bg = Background::ready(String::from("built"));
        assert_eq!(bg.wait().unwrap(), "built");
    }
}
