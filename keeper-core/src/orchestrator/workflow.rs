use super::messages::JobWork;
use super::types::{JobType, OrchestratorPolicy, RestoreSource, WorkflowResult};
use crate::KeeperError;
use crate::constants::backup;
use crate::engine::DumpEngine;
use crate::retention::RetentionManager;
use crate::target::{BackupTarget, DatabaseKind};
use crate::verifier::{IntegrityVerifier, VerifyFailure};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

/// 生成备份文件名: `<kind>_<target>_<UTC时间戳>.<ext>`
pub fn generate_filename(kind: DatabaseKind, target_name: &str) -> String {
    generate_filename_at(kind, target_name, Utc::now())
}

pub fn generate_filename_at(kind: DatabaseKind, target_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}.{}",
        kind,
        target_name,
        now.format(backup::FILENAME_TIMESTAMP_FORMAT),
        kind.extension()
    )
}

/// 备份 → 校验 → 保留策略 的执行流水线
pub(crate) struct Pipeline<E> {
    engine: E,
    verifier: IntegrityVerifier,
    retention: RetentionManager,
    policy: OrchestratorPolicy,
}

impl<E: DumpEngine> Pipeline<E> {
    pub fn new(policy: OrchestratorPolicy, engine: E) -> Self {
        let retention = RetentionManager::new(policy.backup_dir.clone(), policy.retention);
        Self {
            engine,
            verifier: IntegrityVerifier::new(),
            retention,
            policy,
        }
    }

    pub fn verifier(&self) -> &IntegrityVerifier {
        &self.verifier
    }

    pub fn retention(&self) -> &RetentionManager {
        &self.retention
    }

    pub fn policy(&self) -> &OrchestratorPolicy {
        &self.policy
    }

    /// 执行一次备份
    ///
    /// 各步骤依次执行，任何一步失败即返回：
    /// 备份失败不做校验，校验失败保留文件但不执行保留策略。
    #[instrument(skip(self, target), fields(kind = %target.kind, database = target.target_name()))]
    pub async fn execute_backup(&self, target: &BackupTarget) -> WorkflowResult {
        let filename = generate_filename(target.kind, target.target_name());
        let output = self.policy.backup_dir.join(&filename);

        info!("🗄️ 开始备份: {}", filename);
        if let Err(e) = self
            .engine
            .backup(target.kind, &target.config, &output)
            .await
        {
            error!(error = %e, "备份失败");
            return WorkflowResult::failure(e);
        }

        let mut result = WorkflowResult {
            success: true,
            path: Some(output.clone()),
            database: Some(target.target_name().to_string()),
            ..Default::default()
        };

        if self.policy.verify {
            let verification = self.verifier.verify(&output).await;
            if !verification.valid {
                let e = match verification.error {
                    Some(VerifyFailure::EmptyFile) => {
                        KeeperError::EmptyArtifact(output.display().to_string())
                    }
                    _ => KeeperError::VerificationFailed,
                };
                error!(error = %e, "备份校验失败: {}", output.display());
                result.success = false;
                result.error = Some(e.to_string());
                result.verification = Some(verification);
                return result;
            }
            result.verification = Some(verification);
        }

        let deleted = self.retention.apply_retention().await;
        if deleted > 0 {
            info!("🧹 保留策略清理了 {} 个旧备份", deleted);
        }

        info!("✅ 备份完成: {}", output.display());
        result
    }

    /// 恢复测试：校验通过后恢复到 `<database><suffix>` 测试库
    #[instrument(skip(self, target), fields(kind = %target.kind, artifact = %artifact.display()))]
    pub async fn test_restore(&self, artifact: &Path, target: &BackupTarget) -> WorkflowResult {
        let check = self.verifier.check_against_stored(artifact).await;
        if !check.is_match() {
            let e = KeeperError::IntegrityCheckFailed(check.to_string());
            warn!(error = %e, "跳过恢复测试");
            return WorkflowResult {
                path: Some(artifact.to_path_buf()),
                ..WorkflowResult::failure(e)
            };
        }

        let test_db = format!(
            "{}{}",
            target.target_name(),
            self.policy.restore_test.test_db_suffix
        );

        info!("🔄 开始恢复测试: {} -> {}", artifact.display(), test_db);
        let outcome = self
            .engine
            .restore(target.kind, artifact, &target.config, &test_db)
            .await;

        let mut result = match outcome {
            Ok(()) => {
                info!("✅ 恢复测试通过: {}", test_db);
                WorkflowResult {
                    success: true,
                    ..Default::default()
                }
            }
            Err(e) => {
                error!(error = %e, "恢复测试失败");
                WorkflowResult::failure(e)
            }
        };
        result.path = Some(artifact.to_path_buf());
        result.database = Some(test_db);
        result
    }

    /// 该目标最新的备份文件
    pub async fn latest_artifact(&self, target: &BackupTarget) -> Option<PathBuf> {
        self.retention
            .list_artifacts()
            .await
            .into_iter()
            .find(|artifact| target.owns_artifact(&artifact.name))
            .map(|artifact| artifact.path)
    }

    /// 执行一次定时任务
    pub async fn run_job(&self, work: &JobWork) -> WorkflowResult {
        match &work.job_type {
            JobType::Backup => self.execute_backup(&work.target).await,
            JobType::RestoreTest { source } => {
                let artifact = match source {
                    RestoreSource::Fixed(path) => path.clone(),
                    RestoreSource::Latest => match self.latest_artifact(&work.target).await {
                        Some(path) => path,
                        None => {
                            warn!("{} 没有可用于恢复测试的备份", work.target.artifact_prefix());
                            return WorkflowResult::failure(KeeperError::NotFound(format!(
                                "{}*",
                                work.target.artifact_prefix()
                            )));
                        }
                    },
                };
                self.test_restore(&artifact, &work.target).await
            }
        }
    }
}
