use super::print_json;
use crate::app::CliApp;
use keeper_core::{KeeperError, Result, target::DatabaseKind};
use tracing::info;

/// 立即执行一次备份
pub async fn run_backup(app: &CliApp, kind: DatabaseKind) -> Result<()> {
    info!("💾 创建 {} 备份", kind);

    let target = app.config.target_for(kind);
    let result = app.orchestrator.execute_backup(&target).await;
    print_json(&result)?;

    if !result.success {
        return Err(KeeperError::custom(
            result.error.unwrap_or_else(|| "备份失败".to_string()),
        ));
    }
    Ok(())
}
