use super::print_json;
use crate::app::CliApp;
use keeper_core::Result;

/// 以 JSON 输出编排器状态
pub async fn run_status(app: &CliApp) -> Result<()> {
    let status = app.orchestrator.get_status().await;
    print_json(&status)
}
