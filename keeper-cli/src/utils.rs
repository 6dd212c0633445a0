use anyhow::{Context, Result};
use keeper_core::config::LoggingConfig;
use keeper_core::constants::logging::{COMBINED_LOG_FILE, DEFAULT_LOG_LEVEL, ERROR_LOG_FILE};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// # 日志系统
///
/// 1. **库代码只使用 `tracing` 宏**：`info!()`, `warn!()`, `error!()`, `debug!()`
/// 2. **应用入口控制日志配置**：在 `main.rs` 中调用 `setup_logging()`
/// 3. **命令结果与日志分离**：JSON 结果写到标准输出，日志写到标准错误
///
/// 日志级别优先级：`RUST_LOG` > `-v/--verbose` (debug) > 配置文件 `logging.level`。
///
/// 配置了 `logging.dir` 时额外写入两个按天滚动的文件：
/// - `combined.log`：全部日志
/// - `error.log`：仅错误
///
/// 返回的 guard 需要在进程退出前一直持有，否则文件日志可能丢失。
pub fn setup_logging(verbose: bool, logging: Option<&LoggingConfig>) -> Result<Vec<WorkerGuard>> {
    let default_level = if verbose {
        "debug"
    } else {
        logging
            .map(|config| config.level.as_str())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    };
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("无效的日志级别: {default_level}"))?,
    };

    // 输出到终端 - 使用简洁格式，用户友好
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(false)
        .with_line_number(false)
        .without_time()
        .compact();

    let mut guards = Vec::new();
    let (combined, errors) = match logging.and_then(|config| config.dir.as_deref()) {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("无法创建日志目录: {dir}"))?;

            let (combined_writer, guard) =
                tracing_appender::non_blocking(rolling::daily(dir, COMBINED_LOG_FILE));
            guards.push(guard);
            let (error_writer, guard) =
                tracing_appender::non_blocking(rolling::daily(dir, ERROR_LOG_FILE));
            guards.push(guard);

            // 输出到文件 - 包含模块路径和行号，便于排查
            let combined = fmt::layer()
                .with_writer(combined_writer)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true);
            let errors = fmt::layer()
                .with_writer(error_writer)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .with_filter(LevelFilter::ERROR);
            (Some(combined), Some(errors))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(combined)
        .with(errors)
        .try_init()
        .context("日志系统初始化失败")?;

    Ok(guards)
}
