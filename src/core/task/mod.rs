//! `task` 模块包含了与单个下载任务相关的所有逻辑
//!
//! 主要包括：
//! - `state`: 任务状态机 `TaskState` 与转换表
//! - `events`: 进度、状态、分块状态的事件分发
//! - `options`: 任务参数 `TaskOptions`
//!
//! [`Task`] 本身负责编排：首次启动时探测长度并划分分块，
//! 之后每一轮运行派生一个协调者，协调者再派生 `parallel_count` 个工作者。
//! 每一轮运行都有自己的取消令牌，`Stop` 只取消当前这一轮。

pub mod events;
pub mod options;
pub mod state;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::chunk::{ChunkQueue, ChunkSnapshot};
use crate::core::error::{DownloadError, DownloadResult};
use crate::core::probe::probe_length;
use crate::core::progress::Progress;
use crate::core::transport::{HttpTransport, Transport};
use crate::core::worker::{open_destination, run_worker, WorkerContext};

pub use events::{EventHub, SubscriptionId, TaskEvent};
pub use options::TaskOptions;
pub use state::{Effect, Signal, TaskState, Transition};

/// 首次探测之后确定下来的分块计划，跨多轮运行复用
#[derive(Debug, Clone)]
struct Plan {
    queue: Arc<ChunkQueue>,
    progress: Arc<Progress>,
}

struct Lifecycle {
    state: TaskState,
    last_error: Option<Arc<DownloadError>>,
    /// 每次 `Start` 加一，过期运行发来的信号会被丢弃
    generation: u64,
    cancel: CancellationToken,
    coordinator: Option<JoinHandle<()>>,
    plan: Option<Plan>,
}

struct TaskInner {
    id: Uuid,
    options: TaskOptions,
    transport: Arc<dyn Transport>,
    events: Arc<EventHub>,
    root: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
    /// 串行化并发的 `start` 调用
    launch: tokio::sync::Mutex<()>,
    state_tx: watch::Sender<TaskState>,
}

impl TaskInner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 处理 `Start` 以外的信号；指定 `generation` 时只对那一轮运行生效
    fn signal(
        &self,
        signal: Signal,
        error: Option<Arc<DownloadError>>,
        generation: Option<u64>,
    ) -> bool {
        debug_assert_ne!(signal, Signal::Start);

        let (transition, error) = {
            let mut lifecycle = self.lifecycle();
            if generation.is_some_and(|generation| generation != lifecycle.generation) {
                debug!("任务 {}: 丢弃过期运行的信号 {:?}", self.id, signal);
                return false;
            }
            let Some(transition) = lifecycle.state.on(signal) else {
                debug!("任务 {}: 状态 {:?} 下忽略信号 {:?}", self.id, lifecycle.state, signal);
                return false;
            };

            lifecycle.state = transition.to;
            if transition.effect == Effect::Cancel {
                lifecycle.cancel.cancel();
            }
            if transition.to == TaskState::Failed {
                lifecycle.last_error = error.clone();
            }
            self.state_tx.send_replace(transition.to);
            (transition, error)
        };

        self.announce(transition, error);
        true
    }

    /// 在锁外通知订阅者，回调里可以再调用任务的方法
    fn announce(&self, transition: Transition, error: Option<Arc<DownloadError>>) {
        match &error {
            Some(reason) => error!(
                "任务 {}: {} -> {}，原因: {}",
                self.id, transition.from, transition.to, reason
            ),
            None => info!("任务 {}: {} -> {}", self.id, transition.from, transition.to),
        }
        self.events.emit(TaskEvent::StateChanged {
            state: transition.to,
            error,
        });
    }
}

/// 任务的可序列化快照
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub url: String,
    pub path: PathBuf,
    pub state: TaskState,
    pub progress: f64,
    pub total_length: Option<u64>,
    pub completed_bytes: u64,
    pub error: Option<String>,
    pub chunks: Vec<ChunkSnapshot>,
}

/// 一个可停止、可恢复的分块并行下载任务
///
/// 丢弃 `Task` 会取消所有仍在进行的工作。
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// 使用基于 reqwest 的默认传输层创建任务
    pub fn new(options: TaskOptions) -> DownloadResult<Self> {
        options.validate()?;
        let transport = HttpTransport::new(&options)?;
        Self::with_transport(options, Arc::new(transport))
    }

    pub fn with_transport(options: TaskOptions, transport: Arc<dyn Transport>) -> DownloadResult<Self> {
        options.validate()?;

        let root = CancellationToken::new();
        let (state_tx, _) = watch::channel(TaskState::Stopped);
        let lifecycle = Lifecycle {
            state: TaskState::Stopped,
            last_error: None,
            generation: 0,
            cancel: root.child_token(),
            coordinator: None,
            plan: None,
        };

        let id = Uuid::new_v4();
        debug!("创建任务 {}: {} -> {}", id, options.url, options.path.display());
        Ok(Self {
            inner: Arc::new(TaskInner {
                id,
                options,
                transport,
                events: Arc::new(EventHub::default()),
                root,
                lifecycle: Mutex::new(lifecycle),
                launch: tokio::sync::Mutex::new(()),
                state_tx,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn options(&self) -> &TaskOptions {
        &self.inner.options
    }

    pub fn state(&self) -> TaskState {
        self.inner.lifecycle().state
    }

    /// 进入 `Failed` 的原因；重新启动后清空
    pub fn last_error(&self) -> Option<Arc<DownloadError>> {
        self.inner.lifecycle().last_error.clone()
    }

    /// 探测成功之前为 `None`
    pub fn total_length(&self) -> Option<u64> {
        self.plan().map(|plan| plan.queue.total_length())
    }

    /// 完成比例；探测成功之前为 0
    pub fn progress(&self) -> f64 {
        self.plan().map_or(0.0, |plan| plan.progress.value())
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// 以通道形式接收之后的所有事件
    ///
    /// 不再需要时用返回的 id 调用 [`Task::unsubscribe`]，否则订阅会一直保留。
    pub fn events(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<TaskEvent>) {
        self.inner.events.channel()
    }

    /// 启动或恢复下载
    ///
    /// 首次启动会先探测文件长度；探测或打开文件失败时任务进入 `Failed`，
    /// 同一个错误也会从这里返回。状态不允许启动时直接返回 `Ok`。
    pub async fn start(&self) -> Result<(), Arc<DownloadError>> {
        let inner = &self.inner;
        let _launch = inner.launch.lock().await;

        let (transition, generation, cancel, stale, coordinator, plan) = {
            let mut lifecycle = inner.lifecycle();
            let Some(transition) = lifecycle.state.on(Signal::Start) else {
                debug!("任务 {}: 状态 {:?} 下忽略启动", inner.id, lifecycle.state);
                return Ok(());
            };

            lifecycle.state = transition.to;
            lifecycle.last_error = None;
            lifecycle.generation += 1;
            let cancel = inner.root.child_token();
            let stale = std::mem::replace(&mut lifecycle.cancel, cancel.clone());
            inner.state_tx.send_replace(transition.to);
            (
                transition,
                lifecycle.generation,
                cancel,
                stale,
                lifecycle.coordinator.take(),
                lifecycle.plan.clone(),
            )
        };
        inner.announce(transition, None);

        // 失败后的上一轮可能还有工作者在跑，必须等它们退出后才能重置分块
        stale.cancel();
        if let Some(handle) = coordinator {
            if let Err(e) = handle.await {
                warn!("任务 {}: 上一轮协调者异常退出: {}", inner.id, e);
            }
        }

        match self.launch(generation, cancel, plan).await {
            Ok(()) => Ok(()),
            Err(error) if error.is_cancelled() => {
                info!("任务 {}: 启动过程中被停止", inner.id);
                Err(Arc::new(error))
            }
            Err(error) => {
                let error = Arc::new(error);
                inner.signal(Signal::Fail, Some(error.clone()), Some(generation));
                Err(error)
            }
        }
    }

    async fn launch(
        &self,
        generation: u64,
        cancel: CancellationToken,
        plan: Option<Plan>,
    ) -> DownloadResult<()> {
        let inner = &self.inner;

        let plan = match plan {
            Some(plan) => {
                self.rearm(&plan);
                plan
            }
            None => {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                    outcome = probe_length(inner.transport.as_ref()) => outcome?,
                };
                let queue = ChunkQueue::new(outcome.total_length, inner.options.chunk_size)?;
                info!(
                    "任务 {}: 文件长度 {} 字节，划分为 {} 个分块",
                    inner.id,
                    outcome.total_length,
                    queue.len()
                );
                let plan = Plan {
                    queue: Arc::new(queue),
                    progress: Arc::new(Progress::new(outcome.total_length)),
                };
                inner.lifecycle().plan = Some(plan.clone());
                plan
            }
        };

        let file = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            file = open_destination(&inner.options.path, plan.queue.total_length()) => file?,
        };

        let ctx = Arc::new(WorkerContext {
            transport: inner.transport.clone(),
            queue: plan.queue,
            progress: plan.progress,
            file,
            events: inner.events.clone(),
            attempts: inner.options.attempts,
            delay: inner.options.delay,
            cancel,
        });
        let handle = tokio::spawn(coordinate(inner.clone(), ctx, generation));
        inner.lifecycle().coordinator = Some(handle);
        Ok(())
    }

    /// 恢复前把被放弃的分块放回队列，并按分块的实际和校准进度
    fn rearm(&self, plan: &Plan) {
        let restart = self.inner.options.restart_from_zero;
        let dropped = plan.queue.rearm(restart);
        if dropped > 0 || restart {
            debug!(
                "任务 {}: 重置分块，丢弃 {} 字节{}",
                self.inner.id,
                dropped,
                if restart { "（从头开始）" } else { "" }
            );
        }
        let value = plan.progress.reset_to(plan.queue.completed_bytes());
        self.inner.events.emit(TaskEvent::Progress(value));
    }

    /// 停止下载；已完成的分块保留，下次启动时跳过
    pub fn stop(&self) -> bool {
        self.inner.signal(Signal::Stop, None, None)
    }

    pub fn complete(&self) -> bool {
        self.inner.signal(Signal::Complete, None, None)
    }

    pub fn fail(&self) -> bool {
        self.inner.signal(Signal::Fail, None, None)
    }

    pub fn fail_with(&self, reason: DownloadError) -> bool {
        self.inner.signal(Signal::Fail, Some(Arc::new(reason)), None)
    }

    /// 等待任务离开 `Started`，返回此时的状态
    pub async fn wait(&self) -> TaskState {
        let mut rx = self.inner.state_tx.subscribe();
        let settled = rx
            .wait_for(|state| *state != TaskState::Started)
            .await
            .map(|state| *state);
        settled.unwrap_or_else(|_| self.state())
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let (state, error) = {
            let lifecycle = self.inner.lifecycle();
            (
                lifecycle.state,
                lifecycle.last_error.as_ref().map(|e| e.to_string()),
            )
        };
        let plan = self.plan();
        TaskSnapshot {
            id: self.inner.id,
            url: self.inner.options.url.clone(),
            path: self.inner.options.path.clone(),
            state,
            progress: plan.as_ref().map_or(0.0, |plan| plan.progress.value()),
            total_length: plan.as_ref().map(|plan| plan.queue.total_length()),
            completed_bytes: plan.as_ref().map_or(0, |plan| plan.queue.completed_bytes()),
            error,
            chunks: plan
                .map(|plan| plan.queue.chunks().iter().map(|chunk| chunk.snapshot()).collect())
                .unwrap_or_default(),
        }
    }

    fn plan(&self) -> Option<Plan> {
        self.inner.lifecycle().plan.clone()
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.inner.root.cancel();
    }
}

/// 一轮运行的协调者：派生工作者，汇总结果，全部分块完成后发出 `Complete`
async fn coordinate(inner: Arc<TaskInner>, ctx: Arc<WorkerContext>, generation: u64) {
    let mut workers = JoinSet::new();
    for id in 0..inner.options.parallel_count {
        workers.spawn(run_worker(id, ctx.clone()));
    }

    while let Some(joined) = workers.join_next().await {
        let error = match joined {
            Ok(Ok(_)) => continue,
            Ok(Err(error)) if error.is_cancelled() => continue,
            Ok(Err(error)) => error,
            Err(join_error) => DownloadError::from(join_error),
        };
        // 其余工作者继续跑完手上的分块
        inner.signal(Signal::Fail, Some(Arc::new(error)), Some(generation));
    }

    if ctx.cancel.is_cancelled() {
        debug!("任务 {}: 第 {} 轮运行已取消", inner.id, generation);
        return;
    }
    if !ctx.queue.is_completed() {
        return;
    }

    let synced = {
        let file = ctx.file.lock().await;
        file.sync_all().await
    };
    match synced {
        Ok(()) => inner.signal(Signal::Complete, None, Some(generation)),
        Err(e) => inner.signal(Signal::Fail, Some(Arc::new(e.into())), Some(generation)),
    };
}
