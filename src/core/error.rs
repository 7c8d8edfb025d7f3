use thiserror::Error;
use std::io;

/// 下载引擎的错误分类
///
/// - 配置类错误（`Config`、`InvalidRange`、`InvalidUrl`）在构造时立即失败，不重试
/// - 能力不匹配（`RangeNotSupported`）与长度不可用（`LengthUnavailable`）为致命错误
/// - 网络 / IO / 短读等瞬时错误由分块重试循环吸收
/// - `Cancelled` 不是失败，任务会回到 Stopped 而不是 Failed
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("无效的区间: start {start} 大于 end {end}")]
    InvalidRange {
        start: u64,
        end: u64,
    },

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("服务器不支持 Range 请求")]
    RangeNotSupported,

    #[error("无法获取文件长度")]
    LengthUnavailable,

    #[error("服务器返回错误状态码: {0}")]
    Status(u16),

    #[error("网络错误: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    Io(#[from] io::Error),

    #[error("响应数据不完整: 预期 {expected} 字节, 实际 {actual} 字节")]
    ShortRead {
        expected: u64,
        actual: u64,
    },

    #[error("分块 {index} 在 {attempts} 次尝试后仍然失败: {source}")]
    ChunkFailed {
        index: usize,
        attempts: u32,
        #[source]
        source: Box<DownloadError>,
    },

    #[error("校验和不匹配: 预期 {expected}, 实际 {actual}")]
    ChecksumMismatch {
        expected: String,
        actual: String,
    },

    #[error("工作者异常退出: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("下载被取消")]
    Cancelled,
}

impl DownloadError {
    /// 分块下载中可以原地重试的瞬时错误
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network(_)
            | DownloadError::Io(_)
            | DownloadError::ShortRead { .. } => true,
            DownloadError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

impl From<url::ParseError> for DownloadError {
    fn from(error: url::ParseError) -> Self {
        DownloadError::InvalidUrl(error.to_string())
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;
