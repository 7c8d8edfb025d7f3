mod progress;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::task::TaskState;

pub use progress::ProgressView;

pub fn print_success(message: &str) {
    println!("✓ {}", message);
}

pub fn print_error(message: &str) {
    eprintln!("✗ {}", message);
}

/// 下载结束时打印的摘要
pub struct DownloadSummary {
    pub path: PathBuf,
    pub state: TaskState,
    pub total_size: Option<u64>,
    pub elapsed_time: Duration,
    pub error: Option<String>,
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n下载摘要:")?;
        writeln!(f, "文件: {}", self.path.display())?;
        writeln!(f, "状态: {}", self.state)?;
        match self.total_size {
            Some(size) => writeln!(f, "总大小: {}", format_size(size))?,
            None => writeln!(f, "总大小: 未知")?,
        }
        writeln!(f, "耗时: {:.2}秒", self.elapsed_time.as_secs_f64())?;
        if let (Some(size), true) = (self.total_size, self.state == TaskState::Completed) {
            let secs = self.elapsed_time.as_secs_f64();
            if secs > 0.0 {
                writeln!(f, "平均速度: {}/s", format_size((size as f64 / secs) as u64))?;
            }
        }
        if let Some(error) = &self.error {
            writeln!(f, "错误: {}", error)?;
        }
        Ok(())
    }
}

/// 人类可读的字节数，保留两位小数
pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1023), "1023.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(4 * 1024 * 1024), "4.00 MB");
        assert_eq!(format_size(3 * 1024u64.pow(4)), "3.00 TB");
        assert_eq!(format_size(2048 * 1024u64.pow(4)), "2048.00 TB");
    }

    #[test]
    fn test_summary_display() {
        let summary = DownloadSummary {
            path: PathBuf::from("ubuntu.iso"),
            state: TaskState::Failed,
            total_size: Some(2048),
            elapsed_time: Duration::from_millis(1500),
            error: Some("服务器不支持 Range 请求".to_string()),
        };
        let text = summary.to_string();
        assert!(text.contains("ubuntu.iso"));
        assert!(text.contains("2.00 KB"));
        assert!(text.contains("1.50秒"));
        assert!(text.contains("Range"));
        assert!(!text.contains("平均速度"));
    }
}
