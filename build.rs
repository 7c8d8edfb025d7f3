use std::error::Error;

use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn Error>> {
    // 生成构建时间与 git 信息，供 `--version` 和启动日志使用
    EmitBuilder::builder()
        .build_timestamp()
        .git_sha(true)
        .git_commit_date()
        .emit()?;
    Ok(())
}
