//! 文件长度与 Range 能力探测
//!
//! 重试分层（从具体到一般）：
//! 1. 先发 `HEAD`；状态码不成功时，只降级一次为 `GET` + `Range: bytes=0-1`
//! 2. 成功但不支持 Range：能力不匹配，立即失败，不重试
//! 3. 网络错误或拿不到长度：保持同样的请求方式重试，总共最多 5 次
//!
//! 长度优先取 `Content-Range` 声明的总长度，其次取 `Content-Length`。

use log::{debug, info, warn};

use crate::core::error::{DownloadError, DownloadResult};
use crate::core::transport::{ProbeRequest, ProbeResponse, Transport};

/// 探测的总尝试次数上限（含降级那一次）
pub const MAX_PROBE_ATTEMPTS: u32 = 5;

/// 解析后的 `Content-Range` 头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub first: Option<u64>,
    pub last: Option<u64>,
    pub total: Option<u64>,
}

impl ContentRange {
    /// 支持 `bytes a-b/total`、`bytes a-b/*` 和 `bytes */total`
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (span, total) = rest.split_once('/')?;

        let total = match total.trim() {
            "*" => None,
            digits => Some(digits.parse::<u64>().ok()?),
        };

        let (first, last) = match span.trim() {
            "*" => (None, None),
            span => {
                let (first, last) = span.split_once('-')?;
                let first = first.trim().parse::<u64>().ok()?;
                let last = last.trim().parse::<u64>().ok()?;
                if last < first {
                    return None;
                }
                (Some(first), Some(last))
            }
        };

        if first.is_none() && total.is_none() {
            return None;
        }
        Some(Self { first, last, total })
    }
}

/// 探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub total_length: u64,
    /// 最终成功的那次请求
    pub request: ProbeRequest,
    pub attempts: u32,
}

fn resolve_length(request: &ProbeRequest, response: &ProbeResponse) -> Option<u64> {
    let declared = response
        .content_range
        .as_deref()
        .and_then(ContentRange::parse)
        .and_then(|range| range.total);
    if declared.is_some() {
        return declared;
    }
    // 206 的 Content-Length 只是这一段的长度
    if request.range.is_some() && response.status == 206 {
        return None;
    }
    response.content_length
}

/// 探测资源总长度，并确认服务器支持 Range 请求
pub async fn probe_length(transport: &dyn Transport) -> DownloadResult<ProbeOutcome> {
    let mut request = ProbeRequest::head();
    let mut fell_back = false;
    let mut attempts = 0;

    loop {
        attempts += 1;
        debug!("探测文件长度: 第 {} 次, {:?}", attempts, request);

        let error = match transport.probe(&request).await {
            Ok(response) if !response.is_success() => {
                if !fell_back && attempts < MAX_PROBE_ATTEMPTS {
                    warn!("探测请求返回 {}，改用带 Range 的 GET 重试", response.status);
                    fell_back = true;
                    request = ProbeRequest::ranged_get(0, 1);
                    continue;
                }
                return Err(DownloadError::Status(response.status));
            }
            Ok(response) if !response.supports_range() => {
                return Err(DownloadError::RangeNotSupported);
            }
            Ok(response) => match resolve_length(&request, &response) {
                Some(total_length) => {
                    info!("探测完成: 文件长度 {} 字节, 共尝试 {} 次", total_length, attempts);
                    return Ok(ProbeOutcome {
                        total_length,
                        request,
                        attempts,
                    });
                }
                None => DownloadError::LengthUnavailable,
            },
            Err(error) => error,
        };

        if attempts >= MAX_PROBE_ATTEMPTS {
            return Err(error);
        }
        warn!("探测失败（第 {} 次）: {}，使用相同请求重试", attempts, error);
    }
}
