//! Core: 下载引擎
//!
//! 自底向上：`range` / `chunk` 描述分块，`progress` 聚合进度，
//! `transport` + `probe` 负责网络，`worker` 执行分块下载，`task` 编排整个生命周期。

pub mod chunk;
pub mod error;
pub mod probe;
pub mod progress;
pub mod range;
pub mod task;
pub mod transport;
pub(crate) mod worker;

pub use chunk::{Chunk, ChunkQueue, ChunkSnapshot, ChunkState};
pub use error::{DownloadError, DownloadResult};
pub use progress::Progress;
pub use range::Range;
pub use task::{Task, TaskEvent, TaskOptions, TaskSnapshot, TaskState};
pub use transport::{HttpTransport, Transport};
