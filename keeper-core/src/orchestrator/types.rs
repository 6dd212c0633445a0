use crate::constants::{backup, cron, restore_test};
use crate::retention::{BackupStats, RetentionPolicy};
use crate::target::DatabaseKind;
use crate::verifier::VerificationResult;
use crate::{KeeperError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 一次备份或恢复测试的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowResult {
    pub fn failure(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// 同一任务在上一次执行未结束时再次触发的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// 并发执行
    #[default]
    Allow,
    /// 丢弃本次触发
    Skip,
}

impl FromStr for OverlapPolicy {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(OverlapPolicy::Allow),
            "skip" => Ok(OverlapPolicy::Skip),
            other => Err(KeeperError::custom(format!("未知的重叠策略: {other}"))),
        }
    }
}

/// 恢复测试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreTestPolicy {
    pub enabled: bool,
    pub schedule: String,
    pub test_db_suffix: String,
}

impl Default for RestoreTestPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: restore_test::DEFAULT_RESTORE_TEST_CRON.to_string(),
            test_db_suffix: restore_test::DEFAULT_TEST_DB_SUFFIX.to_string(),
        }
    }
}

/// 编排器策略
#[derive(Debug, Clone)]
pub struct OrchestratorPolicy {
    pub backup_dir: PathBuf,
    pub verify: bool,
    pub retention: RetentionPolicy,
    pub default_schedule: String,
    pub restore_test: RestoreTestPolicy,
    pub overlap: OverlapPolicy,
}

impl Default for OrchestratorPolicy {
    fn default() -> Self {
        Self {
            backup_dir: backup::get_default_storage_dir(),
            verify: false,
            retention: RetentionPolicy::default(),
            default_schedule: cron::DEFAULT_BACKUP_CRON.to_string(),
            restore_test: RestoreTestPolicy::default(),
            overlap: OverlapPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// 恢复测试使用的备份文件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreSource {
    Fixed(PathBuf),
    /// 触发时该目标最新的备份
    Latest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobType {
    Backup,
    RestoreTest { source: RestoreSource },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Scheduled,
    Running,
    Succeeded,
    Failed,
}

/// 单个任务的运行状态
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub job_type: JobType,
    pub kind: DatabaseKind,
    pub target: String,
    pub schedule: String,
    pub state: RunState,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// 由定时器和分发器共同维护的任务运行时信息
#[derive(Debug, Clone, Default)]
pub(crate) struct JobRuntime {
    pub state: RunState,
    pub active: usize,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl JobRuntime {
    pub fn begin(&mut self) {
        self.active += 1;
        self.state = RunState::Running;
        self.last_run_at = Some(Utc::now());
    }

    pub fn finish(&mut self, result: &WorkflowResult) {
        self.active = self.active.saturating_sub(1);
        if result.success {
            self.last_error = None;
        } else {
            self.last_error = result.error.clone();
        }
        if self.active == 0 {
            self.state = if result.success {
                RunState::Succeeded
            } else {
                RunState::Failed
            };
        }
    }
}

/// 状态输出中的策略摘要
#[derive(Debug, Clone, Serialize)]
pub struct PolicySnapshot {
    pub backup_dir: PathBuf,
    pub verify_backups: bool,
    pub retention_days: u32,
    pub max_backups: usize,
    pub default_schedule: String,
    pub restore_test_enabled: bool,
    pub restore_test_schedule: String,
    pub overlap: OverlapPolicy,
}

impl From<&OrchestratorPolicy> for PolicySnapshot {
    fn from(policy: &OrchestratorPolicy) -> Self {
        Self {
            backup_dir: policy.backup_dir.clone(),
            verify_backups: policy.verify,
            retention_days: policy.retention.retention_days,
            max_backups: policy.retention.max_count,
            default_schedule: policy.default_schedule.clone(),
            restore_test_enabled: policy.restore_test.enabled,
            restore_test_schedule: policy.restore_test.schedule.clone(),
            overlap: policy.overlap,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub scheduled_jobs: usize,
    pub jobs: Vec<JobStatus>,
    pub backup_stats: BackupStats,
    pub config: PolicySnapshot,
}
