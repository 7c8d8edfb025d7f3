use std::path::Path;

use anyhow::Result;
use url::Url;

/// 只接受带主机名的 http / https 绝对地址
pub fn is_valid_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some(),
        Err(_) => false,
    }
}

/// 下载目录必须是目录（不存在时稍后会被创建）
pub fn validate_download_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        anyhow::bail!("下载目录不能为空");
    }
    if dir.exists() && !dir.is_dir() {
        anyhow::bail!("下载目录不是目录: {}", dir.display());
    }
    Ok(())
}

/// SHA-256 期望值必须是 64 位十六进制
pub fn validate_sha256(hex_digest: &str) -> Result<()> {
    let digest = hex_digest.trim();
    if digest.len() != 64 || hex::decode(digest).is_err() {
        anyhow::bail!("无效的 SHA-256: {}", hex_digest);
    }
    Ok(())
}
