use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::{DownloadError, DownloadResult};
use crate::utils::validator;

/// 单个下载任务的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    /// 目标文件路径
    pub path: PathBuf,
    pub url: String,
    /// 并发工作者数量
    pub parallel_count: usize,
    /// 分块大小（字节）
    pub chunk_size: u64,
    /// 每个分块的最大尝试次数（含第一次）
    pub attempts: u32,
    /// 两次尝试之间的等待时间
    pub delay: Duration,
    pub user_agent: Option<String>,
    /// 原样作为 `Cookie` 请求头发送
    pub cookies: Option<String>,
    pub proxy: Option<String>,
    /// 再次启动时丢弃已完成的分块，从头下载
    pub restart_from_zero: bool,
}

impl TaskOptions {
    pub const DEFAULT_PARALLEL_COUNT: usize = 8;
    pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

    pub fn new(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
            parallel_count: Self::DEFAULT_PARALLEL_COUNT,
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            attempts: Self::DEFAULT_ATTEMPTS,
            delay: Self::DEFAULT_DELAY,
            user_agent: None,
            cookies: None,
            proxy: None,
            restart_from_zero: false,
        }
    }

    pub fn validate(&self) -> DownloadResult<()> {
        if !validator::is_valid_url(&self.url) {
            return Err(DownloadError::InvalidUrl(self.url.clone()));
        }
        if self.path.as_os_str().is_empty() {
            return Err(DownloadError::Config("输出路径不能为空".to_string()));
        }
        if self.parallel_count == 0 {
            return Err(DownloadError::Config("并行数必须大于0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(DownloadError::Config("分块大小必须大于0".to_string()));
        }
        if self.attempts == 0 {
            return Err(DownloadError::Config("尝试次数必须大于0".to_string()));
        }
        Ok(())
    }
}
