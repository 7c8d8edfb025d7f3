//! 分块与分块队列
//!
//! `ChunkQueue` 在构造时把 `[0, total_length)` 切成连续、无重叠的固定大小分块。
//! 工作者通过 [`ChunkQueue::claim`] 领取分块：扫描与标记 `Downloading`
//! 在同一个临界区内完成，因此同一个分块不会被两个工作者同时领取。

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::core::error::{DownloadError, DownloadResult};
use crate::core::range::Range;

/// 分块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChunkState {
    Waiting,
    Downloading,
    Completed,
}

#[derive(Debug)]
struct ChunkStatus {
    completed: u64,
    state: ChunkState,
}

/// 一次 `set_completed` 产生的通知
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkUpdate {
    /// 本次新增的已完成字节数
    pub delta: u64,
    /// `completed / range.length`
    pub fraction: f64,
    /// 状态发生变化时才为 `Some`
    pub state: Option<ChunkState>,
}

/// 下载块
#[derive(Debug)]
pub struct Chunk {
    index: usize,
    range: Range,
    status: Mutex<ChunkStatus>,
}

impl Chunk {
    fn new(index: usize, range: Range) -> Self {
        Self {
            index,
            range,
            status: Mutex::new(ChunkStatus {
                completed: 0,
                state: ChunkState::Waiting,
            }),
        }
    }

    fn status(&self) -> MutexGuard<'_, ChunkStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn completed(&self) -> u64 {
        self.status().completed
    }

    pub fn state(&self) -> ChunkState {
        self.status().state
    }

    /// 更新已完成字节数，并据此推导状态
    ///
    /// `completed` 只增不减：重试时从头读取的字节不会让进度倒退。
    pub fn set_completed(&self, completed: u64) -> ChunkUpdate {
        let length = self.range.length();
        let mut status = self.status();

        let completed = completed.min(length);
        let delta = completed.saturating_sub(status.completed);
        status.completed += delta;

        let derived = if status.completed >= length {
            ChunkState::Completed
        } else {
            ChunkState::Downloading
        };
        let state = if derived != status.state {
            status.state = derived;
            Some(derived)
        } else {
            None
        };

        let fraction = if length == 0 {
            1.0
        } else {
            status.completed as f64 / length as f64
        };

        ChunkUpdate { delta, fraction, state }
    }

    /// `Waiting -> Downloading`，只能在队列的领取临界区内调用
    fn try_claim(&self) -> bool {
        let mut status = self.status();
        if status.state == ChunkState::Waiting {
            status.state = ChunkState::Downloading;
            true
        } else {
            false
        }
    }

    /// 把分块放回 `Waiting`，返回被丢弃的已完成字节数
    pub(crate) fn rearm(&self) -> u64 {
        let mut status = self.status();
        let dropped = status.completed;
        status.completed = 0;
        status.state = ChunkState::Waiting;
        dropped
    }

    pub fn snapshot(&self) -> ChunkSnapshot {
        let status = self.status();
        ChunkSnapshot {
            index: self.index,
            start: self.range.start(),
            end: self.range.end(),
            completed: status.completed,
            state: status.state,
        }
    }
}

/// 分块的只读快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkSnapshot {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub completed: u64,
    pub state: ChunkState,
}

/// 分块队列
#[derive(Debug)]
pub struct ChunkQueue {
    chunks: Vec<Arc<Chunk>>,
    total_length: u64,
    claim_lock: Mutex<()>,
}

impl ChunkQueue {
    pub fn new(total_length: u64, chunk_size: u64) -> DownloadResult<Self> {
        if chunk_size == 0 {
            return Err(DownloadError::Config("分块大小必须大于0".to_string()));
        }

        let count = total_length.div_ceil(chunk_size);
        let mut chunks = Vec::with_capacity(count as usize);
        for i in 0..count {
            let start = i * chunk_size;
            let end = if i + 1 < count { start + chunk_size } else { total_length };
            chunks.push(Arc::new(Chunk::new(i as usize, Range::new(start, end)?)));
        }

        Ok(Self {
            chunks,
            total_length,
            claim_lock: Mutex::new(()),
        })
    }

    /// 领取第一个仍处于 `Waiting` 的分块；没有则返回 `None` 表示队列耗尽
    ///
    /// 返回的分块已处于 `Downloading`，这次状态变化由领取者负责通知。
    pub fn claim(&self) -> Option<Arc<Chunk>> {
        let _guard = self.claim_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.chunks
            .iter()
            .find(|chunk| chunk.try_claim())
            .cloned()
    }

    /// 重新启用被放弃的分块，返回被丢弃的字节总数
    ///
    /// 只能在没有任何工作者运行时调用。`include_completed` 为真时所有分块都从零开始。
    pub(crate) fn rearm(&self, include_completed: bool) -> u64 {
        let _guard = self.claim_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.chunks
            .iter()
            .filter(|chunk| match chunk.state() {
                ChunkState::Waiting => false,
                ChunkState::Downloading => true,
                ChunkState::Completed => include_completed,
            })
            .map(|chunk| chunk.rearm())
            .sum()
    }

    pub fn chunks(&self) -> &[Arc<Chunk>] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn completed_bytes(&self) -> u64 {
        self.chunks.iter().map(|chunk| chunk.completed()).sum()
    }

    pub fn is_completed(&self) -> bool {
        self.chunks
            .iter()
            .all(|chunk| chunk.state() == ChunkState::Completed)
    }
}
