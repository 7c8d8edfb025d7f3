use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta}) {msg}";

/// 单个任务的终端进度条
///
/// 引擎每读一段数据就发一次进度，调用方应先用 [`crate::utils::throttle::limit_rate`] 限流。
pub struct ProgressView {
    bar: ProgressBar,
}

impl ProgressView {
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new(0);
            let style = ProgressStyle::with_template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-");
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(250));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }

    /// 探测完成后设置总字节数
    pub fn set_total(&self, total: u64) {
        self.bar.set_length(total);
    }

    pub fn set_fraction(&self, fraction: f64) {
        let total = self.bar.length().unwrap_or(0);
        self.bar.set_position((fraction.clamp(0.0, 1.0) * total as f64) as u64);
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    /// 在进度条上方打印一行，不打断进度条
    pub fn println(&self, message: impl AsRef<str>) {
        self.bar.println(message);
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }
}
