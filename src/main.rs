use anyhow::{bail, Context};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use log::{error, info, warn};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use paradown::cli;
use paradown::config::Config;
use paradown::env;
use paradown::ui::{self, DownloadSummary, ProgressView};
use paradown::utils::throttle::limit_rate;
use paradown::utils::{hash, logger, validator};
use paradown::{Task, TaskEvent, TaskState};

const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);
const KEYBOARD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 离开作用域时恢复终端
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

enum KeyAction {
    Toggle,
    Quit,
    None,
}

fn key_action(key: KeyEvent) -> KeyAction {
    if key.kind != KeyEventKind::Press {
        return KeyAction::None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Quit,
        KeyCode::Char('q') | KeyCode::Char('Q') => KeyAction::Quit,
        KeyCode::Char('p') | KeyCode::Char('P') => KeyAction::Toggle,
        _ => KeyAction::None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::from_env();

    if args.edit_config {
        // 确保文件存在再打开
        Config::load(&args.config).context("无法创建配置文件")?;
        cli::open_config_in_editor(&args.config);
        return Ok(());
    }

    let config = args.load_config().context("配置无效")?;
    if let Err(e) = logger::init(
        Path::new(&config.log_file),
        logger::parse_level(&config.log_level),
        logger::DEFAULT_MAX_SIZE,
    ) {
        eprintln!("日志初始化失败: {}，继续运行但不记录日志", e);
    }
    info!("{} {} 启动", env::NAME, env::long_version().replace('\n', " "));
    info!("配置文件路径: {}", args.config.display());

    let Some(url) = args.url.clone() else {
        bail!("未提供 URL");
    };
    if !validator::is_valid_url(&url) {
        bail!("无效的URL: {}", url);
    }
    if let Some(expected) = &args.sha256 {
        validator::validate_sha256(expected)?;
    }

    let download_dir = PathBuf::from(&config.download_dir);
    validator::validate_download_dir(&download_dir)?;
    tokio::fs::create_dir_all(&download_dir)
        .await
        .with_context(|| format!("无法创建下载目录: {}", download_dir.display()))?;
    let path = download_dir.join(args.file_name_for(&url));

    let task = Task::new(config.task_options(&url, path.clone()))?;
    info!("创建下载任务 {}: {} -> {}", task.id(), url, path.display());
    if !args.json {
        println!("{}", config.get_summary());
        println!("\n开始下载 {} (按 'p' 暂停/继续, 'q' 退出)", path.display());
    }

    let view = Arc::new(ProgressView::new(!args.json));
    let sink = view.clone();
    let redraw = limit_rate(move |fraction: f64| sink.set_fraction(fraction), 1, PROGRESS_UPDATE_INTERVAL);
    let sink = view.clone();
    task.subscribe(move |event| match event {
        TaskEvent::Progress(fraction) => redraw(*fraction),
        TaskEvent::StateChanged { state, .. } => sink.set_message(state.to_string()),
        TaskEvent::ChunkProgress { .. } | TaskEvent::ChunkStateChanged { .. } => {}
    });

    let started = Instant::now();
    let outcome = run(&task, &view, args.json).await;
    let elapsed = started.elapsed();

    view.set_fraction(task.progress());
    view.finish(task.state().to_string());

    let mut exit_error = outcome.err().map(|e| e.to_string());
    if exit_error.is_none() {
        exit_error = task.last_error().map(|e| e.to_string());
    }

    if task.state() == TaskState::Completed {
        if let Some(expected) = &args.sha256 {
            match hash::verify_sha256(&path, expected).await {
                Ok(()) => info!("SHA-256 校验通过"),
                Err(e) => {
                    error!("{}", e);
                    exit_error = Some(e.to_string());
                }
            }
        }
    }

    if args.json {
        let mut snapshot = serde_json::to_value(task.snapshot())?;
        snapshot["elapsed_secs"] = serde_json::json!(elapsed.as_secs_f64());
        if let Some(error) = &exit_error {
            snapshot["error"] = serde_json::json!(error);
        }
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!(
            "{}",
            DownloadSummary {
                path: path.clone(),
                state: task.state(),
                total_size: task.total_length(),
                elapsed_time: elapsed,
                error: exit_error.clone(),
            }
        );
        match (&exit_error, task.state()) {
            (None, TaskState::Completed) => ui::print_success("下载完成"),
            (Some(e), _) => ui::print_error(e),
            (None, state) => ui::print_error(&format!("下载未完成: {}", state)),
        }
    }

    info!("任务 {} 结束: {}", task.id(), task.state());
    if exit_error.is_some() || task.state() != TaskState::Completed {
        std::process::exit(1);
    }
    Ok(())
}

/// 启动任务并驱动交互，直到任务结束或用户退出
async fn run(task: &Task, view: &ProgressView, json: bool) -> anyhow::Result<()> {
    task.start().await?;
    if let Some(total) = task.total_length() {
        view.set_total(total);
    }

    let interactive = !json && std::io::stdin().is_terminal();
    if !interactive {
        tokio::select! {
            state = task.wait() => info!("任务结束: {}", state),
            _ = tokio::signal::ctrl_c() => {
                warn!("收到 Ctrl-C，停止下载");
                task.stop();
            }
        }
        return Ok(());
    }

    let _raw = RawModeGuard::enable()?;
    let mut paused = false;
    loop {
        while event::poll(Duration::ZERO)? {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            match key_action(key) {
                KeyAction::Quit => {
                    view.println("用户退出");
                    info!("用户主动退出下载");
                    task.stop();
                    return Ok(());
                }
                KeyAction::Toggle if paused => {
                    view.println("继续下载");
                    info!("用户继续下载");
                    paused = false;
                    task.start().await?;
                }
                KeyAction::Toggle => {
                    view.println("已暂停，按 p 继续");
                    info!("用户暂停下载");
                    paused = task.stop();
                }
                KeyAction::None => {}
            }
        }

        match task.state() {
            TaskState::Completed | TaskState::Failed => return Ok(()),
            TaskState::Stopped if !paused => return Ok(()),
            _ => {}
        }
        tokio::time::sleep(KEYBOARD_POLL_INTERVAL).await;
    }
}
