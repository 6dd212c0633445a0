use keeper_core::{
    Result, config::AppConfig, engine::CommandEngine, orchestrator::BackupOrchestrator,
};
use std::path::{Path, PathBuf};

use crate::cli::Commands;
use crate::commands;

pub struct CliApp {
    pub config: AppConfig,
    pub orchestrator: BackupOrchestrator<CommandEngine>,
}

impl CliApp {
    /// 使用已加载的配置初始化CLI应用
    pub fn new(config: AppConfig) -> Result<Self> {
        let orchestrator =
            BackupOrchestrator::new(config.orchestrator_policy(), CommandEngine::new())?;

        Ok(Self {
            config,
            orchestrator,
        })
    }

    /// 相对路径按备份目录解析
    pub fn resolve_artifact(&self, file: &Path) -> PathBuf {
        resolve_artifact_path(&self.config.get_backup_dir(), file)
    }

    /// 运行应用命令
    pub async fn run_command(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::Backup { kind } => commands::run_backup(self, kind).await,
            Commands::Restore { file, kind } => commands::run_restore(self, &file, kind).await,
            Commands::Verify { file } => commands::run_verify(self, &file).await,
            Commands::Status => commands::run_status(self).await,
            Commands::List => commands::run_list(self).await,
            Commands::Prune => commands::run_prune(self).await,
            Commands::Daemon => commands::run_daemon(self).await,
        }
    }
}

fn resolve_artifact_path(backup_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }

    let candidate = backup_dir.join(file);
    // 允许直接传入相对当前目录的路径
    if !candidate.exists() && file.exists() {
        return file.to_path_buf();
    }
    candidate
}
