use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// 任务级进度聚合
///
/// 所有分块的已完成字节数累加在一个原子计数器里，`advance` 先加再取快照，
/// 读者永远看不到半途的和。
#[derive(Debug)]
pub struct Progress {
    total_length: u64,
    completed: AtomicU64,
    // 串行化 累加+通知，订阅者看到的进度不会倒退
    notify: Mutex<()>,
}

impl Progress {
    pub fn new(total_length: u64) -> Self {
        Self {
            total_length,
            completed: AtomicU64::new(0),
            notify: Mutex::new(()),
        }
    }

    pub fn completed_bytes(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// 累加 `delta` 字节并返回新的完成比例
    pub fn advance(&self, delta: u64) -> f64 {
        let completed = self.completed.fetch_add(delta, Ordering::SeqCst) + delta;
        self.fraction(completed)
    }

    /// 累加后在同一个临界区内通知新的完成比例
    pub(crate) fn advance_and_notify(&self, delta: u64, notify: impl FnOnce(f64)) {
        let _guard = self.notify.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        notify(self.advance(delta));
    }

    /// 当前完成比例，范围 `[0, 1]`
    pub fn value(&self) -> f64 {
        self.fraction(self.completed_bytes())
    }

    /// 停止或重置分块之后，用分块的实际和重新校准
    pub(crate) fn reset_to(&self, completed: u64) -> f64 {
        self.completed.store(completed, Ordering::SeqCst);
        self.fraction(completed)
    }

    fn fraction(&self, completed: u64) -> f64 {
        if self.total_length == 0 {
            return 1.0;
        }
        (completed as f64 / self.total_length as f64).min(1.0)
    }
}
