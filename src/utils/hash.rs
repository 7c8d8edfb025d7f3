//! 文件哈希

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::core::error::{DownloadError, DownloadResult};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// 计算文件的 SHA-256，返回小写十六进制
pub async fn sha256_file(path: &Path) -> DownloadResult<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// 校验文件的 SHA-256，期望值大小写不敏感
pub async fn verify_sha256(path: &Path, expected: &str) -> DownloadResult<()> {
    let actual = sha256_file(path).await?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(DownloadError::ChecksumMismatch {
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        })
    }
}
