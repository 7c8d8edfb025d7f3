use chrono::Local; // 用于获取本地时间
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// 默认的日志文件大小上限
pub const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;

/// 按大小轮转的日志文件
///
/// 超过 `max_size` 后当前文件改名为 `<path>.backup`（覆盖旧的备份），再新建一个文件继续写。
pub struct RotatingFile {
    writer: BufWriter<File>,
    path: PathBuf,
    max_size: u64,
    current_size: u64,
}

impl RotatingFile {
    pub fn new(path: &Path, max_size: u64) -> io::Result<Self> {
        // 确保日志目录存在
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = Self::open(path)?;
        let current_size = file.metadata()?.len();

        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            max_size,
            current_size,
        })
    }

    fn open(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".backup");
        PathBuf::from(name)
    }

    /// 检查并执行日志轮转
    fn check_rotation(&mut self) -> io::Result<()> {
        if self.current_size <= self.max_size {
            return Ok(());
        }
        self.writer.flush()?;

        let backup = self.backup_path();
        if backup.exists() {
            std::fs::remove_file(&backup)?;
        }
        std::fs::rename(&self.path, &backup)?;

        self.writer = BufWriter::new(Self::open(&self.path)?);
        self.current_size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_rotation()?;
        let written = self.writer.write(buf)?;
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// 安装全局日志：写入轮转文件，`RUST_LOG` 优先于 `level`
pub fn init(path: &Path, level: LevelFilter, max_size: u64) -> anyhow::Result<()> {
    let file = RotatingFile::new(path, max_size)?;

    Builder::from_env(Env::default().default_filter_or(level.as_str()))
        .target(Target::Pipe(Box::new(file)))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()?;
    Ok(())
}

/// 解析配置文件里的日志级别，无法识别时回落到 `Info`
pub fn parse_level(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_moves_file_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("paradown.log");
        let mut file = RotatingFile::new(&path, 16).unwrap();

        file.write_all(b"0123456789abcdefXYZ\n").unwrap();
        file.write_all(b"after rotation\n").unwrap();
        file.flush().unwrap();

        let backup = std::fs::read_to_string(file.backup_path()).unwrap();
        assert_eq!(backup, "0123456789abcdefXYZ\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "after rotation\n");
    }

    #[test]
    fn test_existing_size_counts_toward_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, vec![b'x'; 32]).unwrap();

        let mut file = RotatingFile::new(&path, 16).unwrap();
        file.write_all(b"new\n").unwrap();
        file.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");
        assert!(file.backup_path().exists());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level(" WARN "), LevelFilter::Warn);
        assert_eq!(parse_level("verbose"), LevelFilter::Info);
    }
}
