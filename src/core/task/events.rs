//! 任务事件分发
//!
//! 订阅者在发出事件的线程上被同步调用，回调里应只做轻量工作；
//! 需要异步消费时用 [`EventHub::channel`] 转成 mpsc 接收端。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::core::chunk::ChunkState;
use crate::core::error::DownloadError;
use crate::core::task::state::TaskState;

pub type SubscriptionId = u64;

type Subscriber = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// 任务级完成比例
    Progress(f64),
    /// 状态发生了实际变化；进入 `Failed` 时附带原因（若有）
    StateChanged {
        state: TaskState,
        error: Option<Arc<DownloadError>>,
    },
    /// 单个分块的 `completed / range.length`，每次更新都会发出
    ChunkProgress { index: usize, fraction: f64 },
    ChunkStateChanged { index: usize, state: ChunkState },
}

#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
}

impl EventHub {
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write().push((id, Arc::new(callback)));
        id
    }

    /// 返回是否真的移除了订阅
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.write();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    /// 以无界通道的形式订阅
    pub fn channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            // 接收端已丢弃时静默忽略
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    pub fn emit(&self, event: TaskEvent) {
        // 先拷贝一份订阅者列表，回调里可以安全地再订阅或退订
        let subscribers: Vec<Subscriber> = self
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in subscribers {
            callback(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<(SubscriptionId, Subscriber)>> {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(SubscriptionId, Subscriber)>> {
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_subscribers_receive_events_in_order() {
        let hub = EventHub::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        hub.subscribe(move |event| {
            if let TaskEvent::Progress(value) = event {
                sink.lock().unwrap().push(*value);
            }
        });

        hub.emit(TaskEvent::Progress(0.25));
        hub.emit(TaskEvent::ChunkStateChanged {
            index: 0,
            state: ChunkState::Completed,
        });
        hub.emit(TaskEvent::Progress(0.5));

        assert_eq!(*seen.lock().unwrap(), vec![0.25, 0.5]);
    }

    #[test]
    fn test_unsubscribe() {
        let hub = EventHub::default();
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let id = hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        hub.emit(TaskEvent::Progress(0.1));

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.emit(TaskEvent::Progress(0.2));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(hub.is_empty());
    }

    #[test]
    fn test_subscribe_from_callback_does_not_deadlock() {
        let hub = Arc::new(EventHub::default());
        let inner = hub.clone();
        hub.subscribe(move |_| {
            inner.subscribe(|_| {});
        });

        hub.emit(TaskEvent::Progress(1.0));
        assert_eq!(hub.len(), 2);
    }

    #[tokio::test]
    async fn test_channel_delivers_clones() {
        let hub = EventHub::default();
        let (_, mut rx) = hub.channel();

        hub.emit(TaskEvent::StateChanged {
            state: TaskState::Failed,
            error: Some(Arc::new(DownloadError::RangeNotSupported)),
        });

        match rx.recv().await {
            Some(TaskEvent::StateChanged { state, error }) => {
                assert_eq!(state, TaskState::Failed);
                assert!(matches!(error.as_deref(), Some(DownloadError::RangeNotSupported)));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
