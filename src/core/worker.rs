//! 工作者循环
//!
//! 每个工作者反复从队列领取分块并下载，直到队列耗尽或任务被取消。
//! 单个分块的下载流程：
//! - 分配与分块等长的缓冲区
//! - 发送 `Range` 请求，逐段读入缓冲区，每读一段就更新分块进度并检查取消信号
//! - 读满后加锁，先 `seek` 到分块起点再整块写入目标文件
//! - 网络或 IO 故障时整块重试，最多 `attempts` 次，每次间隔 `delay`
//!
//! 取消不是失败：直接返回 `Cancelled`，不消耗重试次数。

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, trace, warn};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::chunk::{Chunk, ChunkQueue, ChunkState, ChunkUpdate};
use crate::core::error::{DownloadError, DownloadResult};
use crate::core::progress::Progress;
use crate::core::task::{EventHub, TaskEvent};
use crate::core::transport::Transport;

/// 所有工作者共享的目标文件句柄
pub(crate) type SharedFile = Arc<Mutex<File>>;

/// 打开（必要时创建）目标文件，并预分配到资源总长度
pub(crate) async fn open_destination(path: &Path, total_length: u64) -> DownloadResult<SharedFile> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;
    file.set_len(total_length).await?;
    Ok(Arc::new(Mutex::new(file)))
}

/// 一次运行中所有工作者共享的依赖
pub(crate) struct WorkerContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) queue: Arc<ChunkQueue>,
    pub(crate) progress: Arc<Progress>,
    pub(crate) file: SharedFile,
    pub(crate) events: Arc<EventHub>,
    pub(crate) attempts: u32,
    pub(crate) delay: Duration,
    pub(crate) cancel: CancellationToken,
}

impl WorkerContext {
    /// 每次 `set_completed` 都发分块进度和任务进度，状态变化时再发一次状态事件
    fn report(&self, chunk: &Chunk, update: ChunkUpdate) {
        trace!("分块 {} 进度 {:.1}%", chunk.index(), update.fraction * 100.0);
        self.events.emit(TaskEvent::ChunkProgress {
            index: chunk.index(),
            fraction: update.fraction,
        });
        self.progress
            .advance_and_notify(update.delta, |value| self.events.emit(TaskEvent::Progress(value)));
        if let Some(state) = update.state {
            self.announce(chunk, state);
        }
    }

    fn announce(&self, chunk: &Chunk, state: ChunkState) {
        self.events.emit(TaskEvent::ChunkStateChanged {
            index: chunk.index(),
            state,
        });
    }
}

/// 工作者主循环，返回本工作者完成的分块数
pub(crate) async fn run_worker(id: usize, ctx: Arc<WorkerContext>) -> DownloadResult<usize> {
    let mut finished = 0;
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let Some(chunk) = ctx.queue.claim() else {
            debug!("[Worker {}] 队列已耗尽，共完成 {} 个分块", id, finished);
            return Ok(finished);
        };
        debug!(
            "[Worker {}] 领取分块 {}: {:?}",
            id,
            chunk.index(),
            chunk.range()
        );
        ctx.announce(&chunk, ChunkState::Downloading);
        download_chunk(&ctx, &chunk).await?;
        finished += 1;
    }
}

/// 带重试地下载一个分块
pub(crate) async fn download_chunk(ctx: &WorkerContext, chunk: &Chunk) -> DownloadResult<()> {
    let length = chunk.range().length();
    let attempts = ctx.attempts.max(1);
    let mut buffer: Vec<u8> = Vec::with_capacity(length as usize);
    let mut attempt = 0;

    loop {
        attempt += 1;
        buffer.clear();

        let result = match fetch_into(ctx, chunk, &mut buffer).await {
            Ok(()) => write_chunk(ctx, chunk, &buffer).await,
            Err(error) => Err(error),
        };
        let error = match result {
            Ok(()) => {
                // 数据落盘之后才把分块标记为完成
                ctx.report(chunk, chunk.set_completed(length));
                debug!("分块 {} 下载完成 ({} 字节)", chunk.index(), length);
                return Ok(());
            }
            Err(error) => error,
        };

        if error.is_cancelled() {
            return Err(error);
        }
        if !error.is_retryable() || attempt >= attempts {
            error!("分块 {} 第 {} 次尝试失败，放弃: {}", chunk.index(), attempt, error);
            return Err(DownloadError::ChunkFailed {
                index: chunk.index(),
                attempts: attempt,
                source: Box::new(error),
            });
        }

        warn!(
            "分块 {} 第 {} 次尝试失败: {}，{} 毫秒后重试",
            chunk.index(),
            attempt,
            error,
            ctx.delay.as_millis()
        );
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            _ = tokio::time::sleep(ctx.delay) => {}
        }
    }
}

async fn fetch_into(ctx: &WorkerContext, chunk: &Chunk, buffer: &mut Vec<u8>) -> DownloadResult<()> {
    let range = chunk.range();
    let length = range.length();

    let response = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
        response = ctx.transport.fetch(range) => response?,
    };
    match response.status {
        206 => {}
        // 整个文件从头返回，只有第一个分块可以直接使用
        200 if range.start() == 0 => {}
        200 => return Err(DownloadError::RangeNotSupported),
        code => return Err(DownloadError::Status(code)),
    }

    let mut body = response.body;
    while (buffer.len() as u64) < length {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            next = body.next() => next,
        };
        let Some(bytes) = next.transpose()? else {
            break;
        };

        let remaining = (length - buffer.len() as u64) as usize;
        buffer.extend_from_slice(&bytes[..bytes.len().min(remaining)]);

        // 最后一个字节留到写盘成功后再计入
        let readable = (buffer.len() as u64).min(length.saturating_sub(1));
        ctx.report(chunk, chunk.set_completed(readable));

        if ctx.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
    }

    if (buffer.len() as u64) < length {
        return Err(DownloadError::ShortRead {
            expected: length,
            actual: buffer.len() as u64,
        });
    }
    Ok(())
}

async fn write_chunk(ctx: &WorkerContext, chunk: &Chunk, buffer: &[u8]) -> DownloadResult<()> {
    let offset = chunk.range().start();
    let write = async {
        let mut file = ctx.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(buffer).await?;
        file.flush().await?;
        Ok::<(), std::io::Error>(())
    };

    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(DownloadError::Cancelled),
        result = write => result.map_err(DownloadError::from),
    }
}
