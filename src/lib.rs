//! paradown: 可断点续传、分块并行的 HTTP 下载器
//!
//! 引擎在 [`core`] 中；`config`、`cli`、`ui` 是命令行程序的外层。

pub mod cli;
pub mod config;
pub mod core;
pub mod env;
pub mod ui;
pub mod utils;

pub use crate::core::error::{DownloadError, DownloadResult};
pub use crate::core::task::{Task, TaskEvent, TaskOptions, TaskSnapshot, TaskState};
