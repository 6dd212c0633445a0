use crate::app::CliApp;
use keeper_core::verifier::StoredCheck;
use keeper_core::{KeeperError, Result};
use std::path::Path;
use tracing::{error, info};

/// 根据校验文件检查备份完整性
pub async fn run_verify(app: &CliApp, file: &Path) -> Result<()> {
    let artifact = app.resolve_artifact(file);
    info!("🔍 校验备份: {}", artifact.display());

    match app.orchestrator.verifier().check_against_stored(&artifact).await {
        StoredCheck::Match => {
            info!("✅ 校验通过");
            Ok(())
        }
        StoredCheck::Mismatch { expected, actual } => {
            error!("❌ 校验和不匹配");
            error!("   期望: {}", expected);
            error!("   实际: {}", actual);
            Err(KeeperError::ChecksumMismatch(artifact.display().to_string()))
        }
        other => {
            error!("❌ {}", other);
            Err(KeeperError::IntegrityCheckFailed(other.to_string()))
        }
    }
}
