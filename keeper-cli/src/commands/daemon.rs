use crate::app::CliApp;
use keeper_core::Result;
use keeper_core::orchestrator::RestoreSource;
use tokio::signal;
use tracing::{error, info};

/// 注册所有定时任务并持续运行，直到收到退出信号
pub async fn run_daemon(app: &mut CliApp) -> Result<()> {
    info!("🦉 DB Keeper 守护模式");

    for target in app.config.enabled_targets() {
        app.orchestrator.schedule_backup(target.clone(), None)?;
        app.orchestrator
            .schedule_restore_test(target, RestoreSource::Latest, None)?;
    }

    app.orchestrator.start();
    info!("按 Ctrl-C 退出");

    shutdown_signal().await;

    info!("收到退出信号，正在停止...");
    app.orchestrator.stop();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "无法监听 Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "无法监听 SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
