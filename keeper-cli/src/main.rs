use clap::Parser;
use keeper_cli::{Cli, CliApp, Commands, run_init, setup_logging};
use keeper_core::{KeeperError, config::AppConfig};
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    // 解析命令行参数
    let cli = Cli::parse();

    // `init` 命令是特例，它不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        let _guards = match setup_logging(cli.verbose, None) {
            Ok(guards) => guards,
            Err(e) => {
                eprintln!("❌ {e:#}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = run_init(cli.config.as_deref(), force).await {
            error!("❌ 初始化失败: {}", e);
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    // 日志配置来自配置文件，先加载配置再初始化日志
    let config = AppConfig::load(cli.config.as_deref());
    let _guards = match setup_logging(cli.verbose, config.as_ref().ok().map(|c| &c.logging)) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("❌ {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut app = match config.and_then(CliApp::new) {
        Ok(app) => app,
        Err(KeeperError::ConfigNotFound) => {
            match &cli.config {
                Some(path) => error!("❌ 配置文件 '{}' 未找到。", path.display()),
                None => error!("❌ 当前目录下未找到配置文件 (config.toml / keeper.toml / .keeper.toml)。"),
            }
            error!("👉 请先运行 'keeper-cli init' 命令来创建配置文件。");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("❌ 应用初始化失败: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // 运行命令
    if let Err(e) = app.run_command(cli.command).await {
        error!("❌ 操作失败: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
