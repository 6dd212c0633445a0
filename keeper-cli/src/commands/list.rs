use crate::app::CliApp;
use keeper_core::Result;
use tracing::info;

/// 列出所有备份（最新在前）
pub async fn run_list(app: &CliApp) -> Result<()> {
    let artifacts = app.orchestrator.retention().list_artifacts().await;

    if artifacts.is_empty() {
        info!("📦 {} 中没有备份", app.config.get_backup_dir().display());
        return Ok(());
    }

    info!("📦 共 {} 个备份", artifacts.len());
    for artifact in &artifacts {
        println!(
            "{:<48} {:>10.2} MB  {}",
            artifact.name,
            artifact.size as f64 / 1024.0 / 1024.0,
            artifact.modified.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
