use crate::app::CliApp;
use keeper_core::Result;
use tracing::info;

/// 按保留策略清理一次旧备份
pub async fn run_prune(app: &CliApp) -> Result<()> {
    let policy = app.orchestrator.retention().policy();
    info!(
        "🧹 清理旧备份（保留 {} 天，最多 {} 个）",
        policy.retention_days, policy.max_count
    );

    let deleted = app.orchestrator.retention().apply_retention().await;
    info!("✅ 已删除 {} 个备份", deleted);
    Ok(())
}
