//! 产品元信息

use std::sync::OnceLock;

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const HOMEPAGE: &str = env!("CARGO_PKG_REPOSITORY");

/// 构建时的 git 短哈希，非 git 环境下为空
pub fn git_sha() -> Option<&'static str> {
    option_env!("VERGEN_GIT_SHA").filter(|sha| !sha.is_empty() && !sha.starts_with("VERGEN"))
}

pub fn build_timestamp() -> Option<&'static str> {
    option_env!("VERGEN_BUILD_TIMESTAMP").filter(|ts| !ts.is_empty())
}

/// 默认 User-Agent：`paradown/<version>`
pub fn default_user_agent() -> String {
    format!("{}/{}", NAME, VERSION)
}

/// `--version` 的完整输出
pub fn long_version() -> &'static str {
    static LONG_VERSION: OnceLock<String> = OnceLock::new();
    LONG_VERSION.get_or_init(|| {
        let mut version = VERSION.to_string();
        if let Some(sha) = git_sha() {
            version.push_str(&format!(" ({})", sha));
        }
        if let Some(built) = build_timestamp() {
            version.push_str(&format!("\nbuilt: {}", built));
        }
        version.push_str(&format!("\n{}", HOMEPAGE));
        version
    })
}
