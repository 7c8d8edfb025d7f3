use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{DownloadError, DownloadResult};
use crate::core::task::TaskOptions;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 默认下载目录
    pub download_dir: String,
    /// 并发工作者数量
    pub parallel_count: usize,
    /// 分块大小（字节）
    pub chunk_size: u64,
    /// 每个分块的最大尝试次数
    pub attempts: u32,
    /// 重试间隔（毫秒）
    pub delay_ms: u64,
    /// User-Agent，留空使用 `paradown/<版本号>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// 原样发送的 Cookie 头
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    /// 代理地址，例如 `http://127.0.0.1:7890`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// 日志文件路径
    pub log_file: String,
    /// 日志级别：error / warn / info / debug / trace
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: ".".to_string(),
            parallel_count: TaskOptions::DEFAULT_PARALLEL_COUNT,
            chunk_size: TaskOptions::DEFAULT_CHUNK_SIZE,
            attempts: TaskOptions::DEFAULT_ATTEMPTS,
            delay_ms: TaskOptions::DEFAULT_DELAY.as_millis() as u64,
            user_agent: None,
            cookies: None,
            proxy: None,
            log_file: "logs/paradown.log".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// 加载配置文件；不存在时写出默认配置，格式错误时回落到默认配置并覆盖原文件
    pub fn load(path: &Path) -> DownloadResult<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                log::warn!("配置文件格式错误: {}，将使用默认配置", e);
                eprintln!("配置文件格式错误: {}，将使用默认配置", e);
                let config = Config::default();
                config.save_with_tutorial(path)?;
                Ok(config)
            }
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &Path) -> DownloadResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::Config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", TUTORIAL, config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    /// 校验配置合法性
    pub fn validate(&self) -> DownloadResult<()> {
        if self.parallel_count == 0 {
            return Err(DownloadError::Config("并行数必须大于0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(DownloadError::Config("分块大小必须大于0".to_string()));
        }
        if self.attempts == 0 {
            return Err(DownloadError::Config("尝试次数必须大于0".to_string()));
        }
        if self.download_dir.is_empty() {
            return Err(DownloadError::Config("下载目录不能为空".to_string()));
        }
        Ok(())
    }

    /// 合并命令行参数到配置，命令行优先
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(dir) = &args.download_dir {
            self.download_dir = dir.clone();
        }
        if let Some(parallel_count) = args.parallel_count {
            self.parallel_count = parallel_count;
        }
        if let Some(chunk_size) = args.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(attempts) = args.attempts {
            self.attempts = attempts;
        }
        if let Some(delay_ms) = args.delay {
            self.delay_ms = delay_ms;
        }
        if args.user_agent.is_some() {
            self.user_agent = args.user_agent.clone();
        }
        if args.cookie.is_some() {
            self.cookies = args.cookie.clone();
        }
        if args.proxy.is_some() {
            self.proxy = args.proxy.clone();
        }
    }

    /// 生成引擎使用的任务参数
    pub fn task_options(&self, url: &str, path: PathBuf) -> TaskOptions {
        let mut options = TaskOptions::new(url, path);
        options.parallel_count = self.parallel_count;
        options.chunk_size = self.chunk_size;
        options.attempts = self.attempts;
        options.delay = Duration::from_millis(self.delay_ms);
        options.user_agent = self.user_agent.clone().filter(|ua| !ua.trim().is_empty());
        options.cookies = self.cookies.clone().filter(|c| !c.trim().is_empty());
        options.proxy = self.proxy.clone().filter(|p| !p.trim().is_empty());
        options
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 并行数: {}\n\
            - 分块大小: {}\n\
            - 尝试次数: {}\n\
            - 重试间隔: {} 毫秒\n\
            - 代理: {}",
            self.download_dir,
            self.parallel_count,
            crate::ui::format_size(self.chunk_size),
            self.attempts,
            self.delay_ms,
            self.proxy.as_deref().unwrap_or("无"),
        )
    }
}

const TUTORIAL: &str = r#"# paradown 配置文件
# ====================
#
# 这是一个 TOML 格式的配置文件。修改后保存即可，下次运行生效。
#
# 配置文件位置：
# - Windows: %APPDATA%/paradown/paradown.toml
# - macOS: ~/Library/Application Support/paradown/paradown.toml
# - Linux: ~/.config/paradown/paradown.toml
#
# 命令行参数会覆盖配置文件中的设置，优先级：命令行 > 配置文件 > 默认值
#
# 使用示例：
#   paradown https://example.com/file.iso                  # 使用默认配置
#   paradown -t 16 https://example.com/file.iso            # 16 个并发连接
#   paradown -s 1048576 https://example.com/file.iso       # 1MB 分块
#   paradown -d /path/to/downloads https://example.com/file.iso
#   paradown --proxy http://127.0.0.1:7890 https://example.com/file.iso
#   paradown -e                                            # 编辑本文件
#
# 下载过程中按 p 暂停 / 继续，按 q 退出。
#
# ==================== 配置项说明 ====================
#
# download_dir    默认下载目录，支持相对路径和绝对路径
# parallel_count  并发连接数，建议 4-16
# chunk_size      分块大小（字节），每个分块在内存中完整缓冲后再写盘
# attempts        每个分块的最大尝试次数（含第一次）
# delay_ms        两次尝试之间的等待时间（毫秒）
# user_agent      自定义 User-Agent
# cookies         原样发送的 Cookie 头，例如 "a=1; b=2"
# proxy           代理地址，支持 http / https
# log_file        日志文件路径，超过 10MB 自动轮转为 .backup
# log_level       日志级别，环境变量 RUST_LOG 优先
#
# ==================== 故障排除 ====================
#
# 问题：提示服务器不支持 Range 请求
# 解决：该服务器无法分块下载，paradown 不支持这类地址
#
# 问题：经常下载失败
# 解决：增加 attempts 或 delay_ms
#
# 问题：内存占用过高
# 解决：减小 chunk_size 或 parallel_count
"#;
