//! CLI: 命令行接口和参数解析模块
//!
//! ## 主要功能
//!
//! - 命令行参数解析
//! - 配置文件路径管理与编辑器集成
//! - 从 URL 推断保存的文件名
//!
//! ## 支持的命令
//!
//! - 基本下载：`paradown <url>`
//! - 编辑配置：`paradown -e`
//! - 指定配置：`paradown -c paradown.toml <url>`
//! - 下载后校验：`paradown --sha256 <hex> <url>`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/paradown/paradown.toml`
//! - macOS: `~/Library/Application Support/paradown/paradown.toml`
//! - Linux: `~/.config/paradown/paradown.toml`

use clap::{CommandFactory, FromArgMatches, Parser};
use std::env as std_env;
use std::path::PathBuf;
use url::Url;

use crate::config::Config;
use crate::core::error::DownloadResult;
use crate::env;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata = std_env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("paradown").join("paradown.toml")
    }
    #[cfg(target_os = "macos")]
    {
        let home = std_env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join("Library/Application Support")
            .join("paradown")
            .join("paradown.toml")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = std_env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".config").join("paradown").join("paradown.toml")
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &std::path::Path) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 $EDITOR，其次 xdg-open，最后 nano
        let opened = std_env::var("EDITOR")
            .ok()
            .and_then(|editor| std::process::Command::new(editor).arg(config_path).status().ok())
            .is_some_and(|status| status.success());
        if !opened && std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// paradown 命令行参数
///
/// 示例用法：
///   paradown https://example.com/file.iso
///   paradown -t 16 -s 1048576 https://example.com/file.iso
///   paradown -e  # 编辑配置文件
#[derive(Parser, Debug, Clone)]
#[command(
    name = "paradown",
    author = "panzhifu",
    version = env::VERSION,
    about = "一个用 Rust 编写的可断点续传、分块并行的 HTTP 下载器",
    long_about = "把文件按固定大小分块，用多个连接并行下载，直接写入目标文件的对应位置。\n下载过程中按 p 暂停 / 继续，按 q 退出。\n\n示例：\n  paradown https://example.com/file.iso\n  paradown -o out.iso -t 16 https://example.com/file.iso\n  paradown --sha256 <hex> https://example.com/file.iso\n  paradown -e\n"
)]
pub struct Args {
    /// 要下载的 URL
    #[arg(required_unless_present = "edit_config", help = "要下载的 URL（http / https）。")]
    pub url: Option<String>,

    /// 保存的文件名
    #[arg(short = 'o', long = "output", help = "保存的文件名，默认从 URL 推断。")]
    pub file_name: Option<String>,

    /// 下载目录
    #[arg(short = 'd', long, help = "下载目录，覆盖配置文件中的设置。")]
    pub download_dir: Option<String>,

    /// 并发连接数
    #[arg(short = 't', long = "parallel", help = "并发连接数，覆盖配置文件中的设置。")]
    pub parallel_count: Option<usize>,

    /// 分块大小（字节）
    #[arg(short = 's', long, help = "分块大小（字节），覆盖配置文件中的设置。")]
    pub chunk_size: Option<u64>,

    /// 每个分块的最大尝试次数
    #[arg(short = 'a', long, help = "每个分块的最大尝试次数（含第一次）。")]
    pub attempts: Option<u32>,

    /// 重试间隔（毫秒）
    #[arg(long, value_name = "MS", help = "两次尝试之间的等待时间（毫秒）。")]
    pub delay: Option<u64>,

    #[arg(long, help = "自定义 User-Agent。")]
    pub user_agent: Option<String>,

    #[arg(long, help = "原样发送的 Cookie 头，例如 \"a=1; b=2\"。")]
    pub cookie: Option<String>,

    #[arg(long, help = "代理地址，例如 http://127.0.0.1:7890。")]
    pub proxy: Option<String>,

    /// 下载完成后校验的 SHA-256
    #[arg(long, value_name = "HEX", help = "下载完成后校验文件的 SHA-256。")]
    pub sha256: Option<String>,

    /// 以 JSON 输出结果
    #[arg(long, help = "不显示进度条，结束时以 JSON 输出任务快照。")]
    pub json: bool,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_os_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: PathBuf,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,
}

impl Args {
    /// 解析进程参数，`--version` 附带构建信息
    pub fn from_env() -> Self {
        let matches = Args::command().long_version(env::long_version()).get_matches();
        Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }

    /// 加载（必要时创建）配置文件，合并命令行参数并校验
    pub fn load_config(&self) -> DownloadResult<Config> {
        let mut config = Config::load(&self.config)?;
        config.merge_from_args(self);
        config.validate()?;
        Ok(config)
    }

    /// 保存的文件名：优先 `-o`，其次 URL 路径的最后一段
    pub fn file_name_for(&self, url: &str) -> String {
        if let Some(name) = &self.file_name {
            return name.clone();
        }
        file_name_from_url(url)
            .unwrap_or_else(|| format!("download_{}", chrono::Utc::now().timestamp()))
    }
}

/// 从 URL 路径中提取文件名
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?.trim();
    if last.is_empty() {
        None
    } else {
        Some(last.to_string())
    }
}
