//! 调用频率限制
//!
//! 工作者每读一段数据就发一次进度事件，终端渲染不需要这么频繁。

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Window {
    started: Instant,
    count: u32,
}

/// 每个 `period` 窗口内最多放行 `max_invocations` 次，超出的调用直接丢弃
pub struct RateLimited<F> {
    action: F,
    max_invocations: u32,
    period: Duration,
    window: Mutex<Window>,
}

impl<F> RateLimited<F> {
    pub fn new(action: F, max_invocations: u32, period: Duration) -> Self {
        Self {
            action,
            max_invocations,
            period,
            window: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    /// 调用被放行时返回 `true`
    pub fn call<T>(&self, value: T) -> bool
    where
        F: Fn(T),
    {
        let admitted = {
            let mut window = self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            if now.duration_since(window.started) >= self.period {
                window.started = now;
                window.count = 0;
            }
            window.count += 1;
            window.count <= self.max_invocations
        };
        if admitted {
            (self.action)(value);
        }
        admitted
    }
}

/// 把回调包装成限流版本
pub fn limit_rate<T, F>(action: F, max_invocations: u32, period: Duration) -> impl Fn(T) + Send + Sync
where
    F: Fn(T) + Send + Sync,
{
    let limited = RateLimited::new(action, max_invocations, period);
    move |value| {
        limited.call(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_rate_limited_drops_excess_calls() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let limited = RateLimited::new(
            move |n: u32| {
                counter.fetch_add(n, Ordering::SeqCst);
            },
            2,
            Duration::from_millis(50),
        );

        assert!(limited.call(1));
        assert!(limited.call(1));
        assert!(!limited.call(1));
        assert_eq!(count.load(Ordering::SeqCst), 2);

        std::thread::sleep(Duration::from_millis(60));
        assert!(limited.call(1));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_limit_rate_wraps_closure() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let callback = limit_rate(
            move |_: f64| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            1,
            Duration::from_secs(60),
        );
        for i in 0..10 {
            callback(i as f64 / 10.0);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
