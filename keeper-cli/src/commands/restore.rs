use super::print_json;
use crate::app::CliApp;
use keeper_core::{KeeperError, Result, target::DatabaseKind};
use std::path::Path;
use tracing::info;

/// 将备份恢复到测试库
pub async fn run_restore(app: &CliApp, file: &Path, kind: DatabaseKind) -> Result<()> {
    let artifact = app.resolve_artifact(file);
    info!("🔄 恢复测试: {}", artifact.display());

    let target = app.config.target_for(kind);
    let result = app.orchestrator.test_restore(&artifact, &target).await;
    print_json(&result)?;

    if !result.success {
        return Err(KeeperError::custom(
            result.error.unwrap_or_else(|| "恢复测试失败".to_string()),
        ));
    }
    Ok(())
}
