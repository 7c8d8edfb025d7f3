//! HTTP 传输层
//!
//! 引擎只通过 [`Transport`] 访问网络：探测请求（HEAD / 带 Range 的 GET）和分块请求。
//! [`HttpTransport`] 基于一个共享的、带连接池的 `reqwest::Client`，同一个任务的所有工作者复用它。

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, COOKIE, RANGE};
use url::Url;

use crate::core::error::{DownloadError, DownloadResult};
use crate::core::range::Range;
use crate::core::task::TaskOptions;
use crate::env;

// reqwest 无法限制每个主机的总连接数，也没有连接寿命上限；
// 这里只能限制空闲连接数，并用 TCP keepalive 探测失效的长连接。

/// 每个主机保留的最大空闲连接数
pub const MAX_IDLE_PER_HOST: usize = 256;
/// TCP keepalive 间隔
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(60);
/// 空闲连接回收时间
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(15);
/// 最大重定向次数
pub const MAX_REDIRECTS: usize = 10;

/// 响应体字节流
pub type ByteStream = BoxStream<'static, DownloadResult<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Head,
    Get,
}

/// 探测请求：方法 + 可选的闭区间 Range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub method: ProbeMethod,
    pub range: Option<(u64, u64)>,
}

impl ProbeRequest {
    pub fn head() -> Self {
        Self {
            method: ProbeMethod::Head,
            range: None,
        }
    }

    /// `GET` + `Range: bytes=first-last`
    pub fn ranged_get(first: u64, last: u64) -> Self {
        Self {
            method: ProbeMethod::Get,
            range: Some((first, last)),
        }
    }

    pub fn range_header(&self) -> Option<String> {
        self.range.map(|(first, last)| format!("bytes={}-{}", first, last))
    }
}

/// 探测所需的响应信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub accept_ranges: Option<String>,
    pub content_range: Option<String>,
    pub content_length: Option<u64>,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Accept-Ranges` 包含 `bytes`，或者响应本身已经带有 `Content-Range`
    pub fn supports_range(&self) -> bool {
        let accepts_bytes = self
            .accept_ranges
            .as_deref()
            .map(|value| value.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")))
            .unwrap_or(false);
        accepts_bytes || self.content_range.is_some()
    }
}

/// 分块请求的响应
pub struct FetchResponse {
    pub status: u16,
    pub body: ByteStream,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn probe(&self, request: &ProbeRequest) -> DownloadResult<ProbeResponse>;

    async fn fetch(&self, range: Range) -> DownloadResult<FetchResponse>;
}

/// 基于 reqwest 的传输实现
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(options: &TaskOptions) -> DownloadResult<Self> {
        let url = Url::parse(&options.url)?;

        let mut headers = HeaderMap::new();
        if let Some(cookies) = &options.cookies {
            let value = HeaderValue::from_str(cookies)
                .map_err(|e| DownloadError::Config(format!("无效的 Cookie: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let user_agent = options
            .user_agent
            .clone()
            .unwrap_or_else(env::default_user_agent);

        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE);

        if let Some(proxy) = &options.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| DownloadError::Config(format!("无效的代理地址 {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build()?;
        Ok(Self { client, url })
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn probe(&self, request: &ProbeRequest) -> DownloadResult<ProbeResponse> {
        let mut builder = match request.method {
            ProbeMethod::Head => self.client.head(self.url.clone()),
            ProbeMethod::Get => self.client.get(self.url.clone()),
        };
        if let Some(range) = request.range_header() {
            builder = builder.header(RANGE, range);
        }

        let response = builder.send().await?;
        let headers = response.headers();
        // HEAD 的响应体为空，长度只能从响应头里取
        Ok(ProbeResponse {
            status: response.status().as_u16(),
            accept_ranges: header_string(headers, ACCEPT_RANGES),
            content_range: header_string(headers, CONTENT_RANGE),
            content_length: header_string(headers, CONTENT_LENGTH)
                .and_then(|value| value.trim().parse::<u64>().ok()),
        })
    }

    async fn fetch(&self, range: Range) -> DownloadResult<FetchResponse> {
        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, range.header_value())
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(DownloadError::from))
            .boxed();
        Ok(FetchResponse { status, body })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! 测试用的脚本化传输层，记录每一次请求

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::io;
    use std::sync::Mutex;

    /// 分块请求的故障脚本，按分块起点排队消费
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum FetchFault {
        /// 建立连接失败
        Connect,
        /// 读到一半连接被重置
        MidStream,
        /// 响应体提前结束
        Short,
        /// 返回指定状态码
        Status(u16),
        /// 读到一半后永远挂起
        Hang,
    }

    pub(crate) struct MockTransport {
        body: Vec<u8>,
        probes: Mutex<VecDeque<DownloadResult<ProbeResponse>>>,
        probe_log: Mutex<Vec<ProbeRequest>>,
        faults: Mutex<HashMap<u64, VecDeque<FetchFault>>>,
        always_fail: bool,
        fetch_log: Mutex<Vec<Range>>,
        read_size: usize,
        read_delay: Option<Duration>,
    }

    impl MockTransport {
        pub(crate) fn serving(body: Vec<u8>) -> Self {
            Self {
                body,
                probes: Mutex::new(VecDeque::new()),
                probe_log: Mutex::new(Vec::new()),
                faults: Mutex::new(HashMap::new()),
                always_fail: false,
                fetch_log: Mutex::new(Vec::new()),
                read_size: 64,
                read_delay: None,
            }
        }

        pub(crate) fn with_probes(self, probes: Vec<DownloadResult<ProbeResponse>>) -> Self {
            *self.probes.lock().unwrap() = probes.into();
            self
        }

        pub(crate) fn with_faults(self, start: u64, faults: Vec<FetchFault>) -> Self {
            self.faults.lock().unwrap().insert(start, faults.into());
            self
        }

        pub(crate) fn always_failing(mut self) -> Self {
            self.always_fail = true;
            self
        }

        pub(crate) fn with_read_size(mut self, read_size: usize) -> Self {
            self.read_size = read_size.max(1);
            self
        }

        pub(crate) fn with_read_delay(mut self, delay: Duration) -> Self {
            self.read_delay = Some(delay);
            self
        }

        pub(crate) fn probe_requests(&self) -> Vec<ProbeRequest> {
            self.probe_log.lock().unwrap().clone()
        }

        pub(crate) fn fetch_count(&self) -> usize {
            self.fetch_log.lock().unwrap().len()
        }

        pub(crate) fn fetches_for(&self, start: u64) -> usize {
            self.fetch_log
                .lock()
                .unwrap()
                .iter()
                .filter(|range| range.start() == start)
                .count()
        }

        /// 默认的探测响应：200 + Accept-Ranges: bytes + Content-Length
        pub(crate) fn default_probe(&self) -> ProbeResponse {
            ProbeResponse {
                status: 200,
                accept_ranges: Some("bytes".to_string()),
                content_range: None,
                content_length: Some(self.body.len() as u64),
            }
        }

        fn pieces(&self, bytes: &[u8]) -> Vec<DownloadResult<Bytes>> {
            bytes
                .chunks(self.read_size)
                .map(|piece| Ok(Bytes::copy_from_slice(piece)))
                .collect()
        }

        fn stream(&self, items: Vec<DownloadResult<Bytes>>, hang: bool) -> ByteStream {
            let delay = self.read_delay;
            let body = futures::stream::iter(items).then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            });
            if hang {
                body.chain(futures::stream::pending()).boxed()
            } else {
                body.boxed()
            }
        }
    }

    fn connection_error(kind: io::ErrorKind) -> DownloadError {
        DownloadError::Io(io::Error::new(kind, "模拟的网络故障"))
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn probe(&self, request: &ProbeRequest) -> DownloadResult<ProbeResponse> {
            self.probe_log.lock().unwrap().push(request.clone());
            match self.probes.lock().unwrap().pop_front() {
                Some(outcome) => outcome,
                None => Ok(self.default_probe()),
            }
        }

        async fn fetch(&self, range: Range) -> DownloadResult<FetchResponse> {
            self.fetch_log.lock().unwrap().push(range);
            if self.always_fail {
                return Err(connection_error(io::ErrorKind::ConnectionRefused));
            }

            let fault = self
                .faults
                .lock()
                .unwrap()
                .get_mut(&range.start())
                .and_then(|queue| queue.pop_front());

            let start = range.start() as usize;
            let end = (range.end() as usize).min(self.body.len());
            let slice = &self.body[start..end];
            let half = slice.len() / 2;

            let (status, body) = match fault {
                None => (206, self.stream(self.pieces(slice), false)),
                Some(FetchFault::Connect) => {
                    return Err(connection_error(io::ErrorKind::ConnectionRefused))
                }
                Some(FetchFault::Status(code)) => (code, self.stream(Vec::new(), false)),
                Some(FetchFault::Short) => (206, self.stream(self.pieces(&slice[..half]), false)),
                Some(FetchFault::MidStream) => {
                    let mut items = self.pieces(&slice[..half]);
                    items.push(Err(connection_error(io::ErrorKind::ConnectionReset)));
                    (206, self.stream(items, false))
                }
                Some(FetchFault::Hang) => (206, self.stream(self.pieces(&slice[..half]), true)),
            };
            Ok(FetchResponse { status, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_request_headers() {
        assert_eq!(ProbeRequest::head().range_header(), None);
        assert_eq!(
            ProbeRequest::ranged_get(0, 1).range_header().as_deref(),
            Some("bytes=0-1")
        );
    }

    #[test]
    fn test_supports_range() {
        let mut response = ProbeResponse {
            status: 200,
            ..Default::default()
        };
        assert!(!response.supports_range());

        response.accept_ranges = Some("none".to_string());
        assert!(!response.supports_range());

        response.accept_ranges = Some("Bytes".to_string());
        assert!(response.supports_range());

        response.accept_ranges = None;
        response.content_range = Some("bytes 0-1/100".to_string());
        assert!(response.supports_range());
    }

    #[test]
    fn test_pool_tuning_defaults() {
        assert_eq!(MAX_IDLE_PER_HOST, 256);
        assert_eq!(POOL_IDLE_TIMEOUT, Duration::from_secs(15));
        assert_eq!(TCP_KEEPALIVE, Duration::from_secs(60));
    }

    #[test]
    fn test_http_transport_rejects_bad_proxy() {
        let mut options = TaskOptions::new("https://example.com/file.bin", "file.bin");
        options.proxy = Some("http://proxy.invalid:99999".to_string());
        assert!(matches!(HttpTransport::new(&options), Err(DownloadError::Config(_))));
    }

    #[test]
    fn test_http_transport_builds_with_cookies() {
        let mut options = TaskOptions::new("https://example.com/file.bin", "file.bin");
        options.cookies = Some("session=abc; theme=dark".to_string());
        let transport = HttpTransport::new(&options).unwrap();
        assert_eq!(transport.url.host_str(), Some("example.com"));
    }
}
