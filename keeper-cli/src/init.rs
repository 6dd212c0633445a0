use keeper_core::{config::AppConfig, constants::config, error::Result};
use std::path::Path;
use tracing::{info, warn};

/// 运行独立的初始化流程
pub async fn run_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let config_path = config_path.unwrap_or(Path::new(config::CONFIG_FILE_NAME));

    info!("🦉 DB Keeper 初始化");
    info!("======================");

    // 检查是否已经初始化过
    if !force && config_path.exists() {
        warn!("⚠️  检测到已存在的配置文件: {}", config_path.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: keeper-cli init --force");
        return Ok(());
    }

    info!("📋 步骤 1: 创建配置文件");
    let config = AppConfig::default();
    config.save_to_file(config_path)?;
    info!("   ✅ 创建配置文件: {}", config_path.display());

    info!("📋 步骤 2: 创建目录结构");
    config.ensure_dirs()?;
    info!("   ✅ 备份目录: {}", config.backup.dir);
    if let Some(log_dir) = &config.logging.dir {
        info!("   ✅ 日志目录: {}", log_dir);
    }

    info!("🎉 初始化完成！");
    info!("👉 请通过环境变量 DB_PASSWORD / MYSQL_PASSWORD 提供数据库密码");
    info!("👉 然后运行 'keeper-cli backup' 执行第一次备份");
    Ok(())
}
