// 备份编排器
//
// 定时器到点后把任务按值发送给分发器，分发器为每次触发
// 启动独立的执行任务，互不排队。编排器本身是普通的值，
// 由调用方持有，不存在全局调度器。

mod messages;
mod scheduler;
mod types;
mod workflow;

pub use messages::{JobMessage, JobWork};
pub use scheduler::parse_schedule;
pub use types::{
    JobId, JobStatus, JobType, OrchestratorPolicy, OrchestratorStatus, OverlapPolicy,
    PolicySnapshot, RestoreSource, RestoreTestPolicy, RunState, WorkflowResult,
};
pub use workflow::{generate_filename, generate_filename_at};

use crate::Result;
use crate::constants::cron::DISPATCH_CHANNEL_CAPACITY;
use crate::engine::{CommandEngine, DumpEngine};
use crate::retention::RetentionManager;
use crate::target::BackupTarget;
use crate::verifier::IntegrityVerifier;
use croner::Cron;
use dashmap::DashMap;
use scheduler::{JobDispatcher, spawn_timer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use types::JobRuntime;
use workflow::Pipeline;

struct ScheduledJob {
    id: JobId,
    work: JobWork,
    schedule: String,
    cron: Cron,
    timer: Option<JoinHandle<()>>,
}

/// 备份编排器：任务注册、启停、手动执行与状态查询
pub struct BackupOrchestrator<E: DumpEngine = CommandEngine> {
    pipeline: Arc<Pipeline<E>>,
    jobs: Vec<ScheduledJob>,
    runtime: Arc<DashMap<JobId, JobRuntime>>,
    dispatcher: Option<mpsc::Sender<JobMessage>>,
    next_job_id: u64,
}

impl<E: DumpEngine> BackupOrchestrator<E> {
    /// 创建编排器，备份目录不存在时自动创建
    pub fn new(policy: OrchestratorPolicy, engine: E) -> Result<Self> {
        std::fs::create_dir_all(&policy.backup_dir)?;
        info!("📁 备份目录: {}", policy.backup_dir.display());

        Ok(Self {
            pipeline: Arc::new(Pipeline::new(policy, engine)),
            jobs: Vec::new(),
            runtime: Arc::new(DashMap::new()),
            dispatcher: None,
            next_job_id: 0,
        })
    }

    pub fn verifier(&self) -> &IntegrityVerifier {
        self.pipeline.verifier()
    }

    pub fn retention(&self) -> &RetentionManager {
        self.pipeline.retention()
    }

    pub fn policy(&self) -> &OrchestratorPolicy {
        self.pipeline.policy()
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// 立即执行一次备份
    pub async fn execute_backup(&self, target: &BackupTarget) -> WorkflowResult {
        self.pipeline.execute_backup(target).await
    }

    /// 对指定备份执行恢复测试
    pub async fn test_restore(&self, artifact: &Path, target: &BackupTarget) -> WorkflowResult {
        self.pipeline.test_restore(artifact, target).await
    }

    /// 该目标最新的备份文件
    pub async fn latest_artifact(&self, target: &BackupTarget) -> Option<PathBuf> {
        self.pipeline.latest_artifact(target).await
    }

    /// 注册定时备份任务，未指定表达式时使用策略中的默认值
    pub fn schedule_backup(&mut self, target: BackupTarget, schedule: Option<&str>) -> Result<JobId> {
        let schedule = schedule
            .map(str::to_string)
            .unwrap_or_else(|| self.policy().default_schedule.clone());
        self.register(target, JobType::Backup, schedule)
    }

    /// 注册定时恢复测试任务，恢复测试未启用时返回 `None`
    pub fn schedule_restore_test(
        &mut self,
        target: BackupTarget,
        source: RestoreSource,
        schedule: Option<&str>,
    ) -> Result<Option<JobId>> {
        let policy = &self.policy().restore_test;
        if !policy.enabled {
            info!("恢复测试未启用，跳过注册: {}", target.artifact_prefix());
            return Ok(None);
        }

        let schedule = schedule
            .map(str::to_string)
            .unwrap_or_else(|| policy.schedule.clone());
        self.register(target, JobType::RestoreTest { source }, schedule)
            .map(Some)
    }

    fn register(&mut self, target: BackupTarget, job_type: JobType, schedule: String) -> Result<JobId> {
        let cron = parse_schedule(&schedule)?;

        self.next_job_id += 1;
        let id = JobId(self.next_job_id);
        self.runtime.insert(id, JobRuntime::default());

        let mut job = ScheduledJob {
            id,
            work: JobWork { target, job_type },
            schedule,
            cron,
            timer: None,
        };
        if let Some(sender) = &self.dispatcher {
            job.timer = Some(self.arm(&job, sender.clone()));
        }

        info!(
            "⏰ 已注册任务 {} ({} {}): {}",
            id,
            job.work.target.kind,
            job.work.target.target_name(),
            job.schedule
        );
        self.jobs.push(job);
        Ok(id)
    }

    fn arm(&self, job: &ScheduledJob, sender: mpsc::Sender<JobMessage>) -> JoinHandle<()> {
        spawn_timer(
            job.id,
            job.cron.clone(),
            job.work.clone(),
            sender,
            self.runtime.clone(),
        )
    }

    /// 启动所有已注册任务的定时器
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("编排器已在运行");
            return;
        }

        let (sender, receiver) = mpsc::channel(DISPATCH_CHANNEL_CAPACITY);
        let dispatcher = JobDispatcher::new(
            self.pipeline.clone(),
            self.runtime.clone(),
            self.policy().overlap,
        );
        tokio::spawn(dispatcher.run(receiver));

        let timers: Vec<_> = self
            .jobs
            .iter()
            .map(|job| self.arm(job, sender.clone()))
            .collect();
        for (job, timer) in self.jobs.iter_mut().zip(timers) {
            job.timer = Some(timer);
        }

        self.dispatcher = Some(sender);
        info!("🚀 备份编排器已启动，共 {} 个任务", self.jobs.len());
    }

    /// 停止所有定时器并清空任务，正在执行的备份不受影响
    pub fn stop(&mut self) {
        for job in self.jobs.drain(..) {
            if let Some(timer) = job.timer {
                timer.abort();
            }
        }
        self.runtime.clear();
        self.dispatcher = None;
        info!("🛑 备份编排器已停止");
    }

    /// 当前状态
    pub async fn get_status(&self) -> OrchestratorStatus {
        let jobs = self
            .jobs
            .iter()
            .map(|job| {
                let runtime = self
                    .runtime
                    .get(&job.id)
                    .map(|state| state.value().clone())
                    .unwrap_or_default();
                JobStatus {
                    id: job.id,
                    job_type: job.work.job_type.clone(),
                    kind: job.work.target.kind,
                    target: job.work.target.target_name().to_string(),
                    schedule: job.schedule.clone(),
                    state: runtime.state,
                    last_run_at: runtime.last_run_at,
                    last_error: runtime.last_error,
                    next_run_at: runtime.next_run_at,
                }
            })
            .collect::<Vec<_>>();

        OrchestratorStatus {
            running: self.is_running(),
            scheduled_jobs: jobs.len(),
            jobs,
            backup_stats: self.retention().get_stats().await,
            config: PolicySnapshot::from(self.policy()),
        }
    }
}

impl<E: DumpEngine> Drop for BackupOrchestrator<E> {
    fn drop(&mut self) {
        for job in &self.jobs {
            if let Some(timer) = &job.timer {
                timer.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::RetentionPolicy;
    use crate::target::{DatabaseKind, ServerConnection, TargetConfig};
    use crate::{KeeperError, verifier};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeState {
        backups: AtomicUsize,
        current: AtomicUsize,
        peak: AtomicUsize,
        restores: Mutex<Vec<String>>,
    }

    #[derive(Clone, Default)]
    struct FakeEngine {
        fail_backup: bool,
        write_empty: bool,
        delay: Duration,
        state: Arc<FakeState>,
    }

    impl DumpEngine for FakeEngine {
        async fn backup(
            &self,
            _kind: DatabaseKind,
            _config: &TargetConfig,
            output: &Path,
        ) -> Result<()> {
            self.state.backups.fetch_add(1, Ordering::SeqCst);
            let running = self.state.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.peak.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.state.current.fetch_sub(1, Ordering::SeqCst);

            if self.fail_backup {
                return Err(KeeperError::external_tool("pg_dump 执行失败"));
            }
            let content: &[u8] = if self.write_empty { b"" } else { b"dump data" };
            tokio::fs::write(output, content).await?;
            Ok(())
        }

        async fn restore(
            &self,
            _kind: DatabaseKind,
            _artifact: &Path,
            _config: &TargetConfig,
            target_name: &str,
        ) -> Result<()> {
            self.state
                .restores
                .lock()
                .unwrap()
                .push(target_name.to_string());
            Ok(())
        }
    }

    fn policy(dir: &Path, verify: bool) -> OrchestratorPolicy {
        OrchestratorPolicy {
            backup_dir: dir.to_path_buf(),
            verify,
            retention: RetentionPolicy {
                retention_days: 30,
                max_count: 10,
            },
            ..Default::default()
        }
    }

    fn target() -> BackupTarget {
        BackupTarget::new(
            DatabaseKind::Postgres,
            TargetConfig::Server(ServerConnection {
                database: Some("orders".to_string()),
                ..ServerConnection::postgres_default()
            }),
        )
    }

    fn write_expired(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"old").unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(40 * 24 * 3600))
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_successful_backup_verifies_and_prunes() {
        let temp = TempDir::new().unwrap();
        let expired = write_expired(temp.path(), "postgres_orders_2020-01-01T00-00-00.backup");
        let orchestrator =
            BackupOrchestrator::new(policy(temp.path(), true), FakeEngine::default()).unwrap();

        let result = orchestrator.execute_backup(&target()).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.database.as_deref(), Some("orders"));
        let path = result.path.unwrap();
        assert!(path.exists());
        assert!(verifier::sidecar_path(&path).exists());
        assert!(result.verification.unwrap().valid);
        assert!(!expired.exists());
    }

    #[tokio::test]
    async fn test_failed_backup_skips_verification_and_retention() {
        let temp = TempDir::new().unwrap();
        let expired = write_expired(temp.path(), "postgres_orders_2020-01-01T00-00-00.backup");
        let engine = FakeEngine {
            fail_backup: true,
            ..Default::default()
        };
        let orchestrator = BackupOrchestrator::new(policy(temp.path(), true), engine).unwrap();

        let result = orchestrator.execute_backup(&target()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("pg_dump"));
        assert!(result.verification.is_none());
        assert!(expired.exists());
    }

    #[tokio::test]
    async fn test_failed_verification_keeps_artifact_and_skips_retention() {
        let temp = TempDir::new().unwrap();
        let expired = write_expired(temp.path(), "postgres_orders_2020-01-01T00-00-00.backup");
        let engine = FakeEngine {
            write_empty: true,
            ..Default::default()
        };
        let orchestrator = BackupOrchestrator::new(policy(temp.path(), true), engine).unwrap();

        let result = orchestrator.execute_backup(&target()).await;

        assert!(!result.success);
        let verification = result.verification.unwrap();
        assert_eq!(
            result.error,
            Some(KeeperError::EmptyArtifact(verification.path.display().to_string()).to_string())
        );
        assert!(!verification.valid);
        assert!(verification.path.exists());
        assert!(!verifier::sidecar_path(&verification.path).exists());
        assert!(expired.exists());
    }

    #[tokio::test]
    async fn test_backup_without_verification_has_no_sidecar() {
        let temp = TempDir::new().unwrap();
        let orchestrator =
            BackupOrchestrator::new(policy(temp.path(), false), FakeEngine::default()).unwrap();

        let result = orchestrator.execute_backup(&target()).await;

        assert!(result.success);
        assert!(result.verification.is_none());
        assert!(!verifier::sidecar_path(&result.path.unwrap()).exists());
    }

    #[tokio::test]
    async fn test_restore_requires_matching_sidecar() {
        let temp = TempDir::new().unwrap();
        let engine = FakeEngine::default();
        let state = engine.state.clone();
        let orchestrator = BackupOrchestrator::new(policy(temp.path(), false), engine).unwrap();

        let artifact = temp.path().join("postgres_orders_2024-01-01T02-00-00.backup");
        std::fs::write(&artifact, b"dump data").unwrap();

        let result = orchestrator.test_restore(&artifact, &target()).await;
        assert!(!result.success);
        assert!(state.restores.lock().unwrap().is_empty());

        orchestrator.verifier().verify(&artifact).await;
        std::fs::write(&artifact, b"dump datA").unwrap();
        let result = orchestrator.test_restore(&artifact, &target()).await;
        assert!(!result.success);
        assert!(state.restores.lock().unwrap().is_empty());

        orchestrator.verifier().verify(&artifact).await;
        let result = orchestrator.test_restore(&artifact, &target()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.database.as_deref(), Some("orders_restore_test"));
        assert_eq!(
            *state.restores.lock().unwrap(),
            vec!["orders_restore_test".to_string()]
        );
    }

    #[tokio::test]
    async fn test_latest_artifact_matches_target_prefix() {
        let temp = TempDir::new().unwrap();
        let orchestrator =
            BackupOrchestrator::new(policy(temp.path(), false), FakeEngine::default()).unwrap();
        assert!(orchestrator.latest_artifact(&target()).await.is_none());

        std::fs::write(temp.path().join("mysql_shop_2024-01-02T02-00-00.sql"), b"x").unwrap();
        let result = orchestrator.execute_backup(&target()).await;

        assert_eq!(orchestrator.latest_artifact(&target()).await, result.path);
    }

    #[tokio::test]
    async fn test_latest_artifact_ignores_longer_target_names() {
        let temp = TempDir::new().unwrap();
        let orchestrator =
            BackupOrchestrator::new(policy(temp.path(), false), FakeEngine::default()).unwrap();

        let write_aged = |name: &str, days: u64| {
            let path = temp.path().join(name);
            std::fs::write(&path, b"dump data").unwrap();
            let file = std::fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(SystemTime::now() - Duration::from_secs(days * 24 * 3600))
                .unwrap();
            path
        };
        let orders = write_aged("postgres_orders_2024-01-01T02-00-00.backup", 2);
        write_aged("postgres_orders_archive_2024-01-02T02-00-00.backup", 1);

        assert_eq!(orchestrator.latest_artifact(&target()).await, Some(orders));
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut orchestrator =
            BackupOrchestrator::new(policy(temp.path(), false), FakeEngine::default()).unwrap();

        assert!(orchestrator.schedule_backup(target(), Some("every day")).is_err());
        assert!(orchestrator.schedule_backup(target(), Some("0 25 * * *")).is_err());
        assert_eq!(orchestrator.get_status().await.scheduled_jobs, 0);
    }

    #[tokio::test]
    async fn test_restore_test_not_registered_when_disabled() {
        let temp = TempDir::new().unwrap();
        let mut orchestrator =
            BackupOrchestrator::new(policy(temp.path(), false), FakeEngine::default()).unwrap();

        let id = orchestrator
            .schedule_restore_test(target(), RestoreSource::Latest, None)
            .unwrap();
        assert!(id.is_none());

        let mut enabled = policy(temp.path(), false);
        enabled.restore_test.enabled = true;
        let mut orchestrator = BackupOrchestrator::new(enabled, FakeEngine::default()).unwrap();
        let id = orchestrator
            .schedule_restore_test(target(), RestoreSource::Latest, None)
            .unwrap();
        assert!(id.is_some());

        let status = orchestrator.get_status().await;
        assert_eq!(status.jobs[0].schedule, "0 4 * * 0");
        assert_eq!(
            status.jobs[0].job_type,
            JobType::RestoreTest {
                source: RestoreSource::Latest
            }
        );
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let temp = TempDir::new().unwrap();
        let mut orchestrator =
            BackupOrchestrator::new(policy(temp.path(), false), FakeEngine::default()).unwrap();

        let first = orchestrator.schedule_backup(target(), None).unwrap();
        orchestrator.start();
        let second = orchestrator
            .schedule_backup(target(), Some("30 3 * * *"))
            .unwrap();
        assert_ne!(first, second);

        let status = orchestrator.get_status().await;
        assert!(status.running);
        assert_eq!(status.scheduled_jobs, 2);
        assert_eq!(status.jobs[0].schedule, "0 2 * * *");
        assert_eq!(status.jobs[0].state, RunState::Scheduled);
        assert_eq!(status.config.default_schedule, "0 2 * * *");

        orchestrator.stop();
        let status = orchestrator.get_status().await;
        assert!(!status.running);
        assert_eq!(status.scheduled_jobs, 0);
        assert!(status.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_skip_policy_prevents_overlapping_runs() {
        let temp = TempDir::new().unwrap();
        let engine = FakeEngine {
            delay: Duration::from_millis(2500),
            ..Default::default()
        };
        let state = engine.state.clone();
        let mut skip = policy(temp.path(), false);
        skip.overlap = OverlapPolicy::Skip;
        let mut orchestrator = BackupOrchestrator::new(skip, engine).unwrap();

        orchestrator
            .schedule_backup(target(), Some("* * * * * *"))
            .unwrap();
        orchestrator.start();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        let status = orchestrator.get_status().await;
        assert!(status.jobs[0].last_run_at.is_some());
        orchestrator.stop();

        assert!(state.backups.load(Ordering::SeqCst) >= 1);
        assert_eq!(state.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_allow_policy_runs_overlapping_fires() {
        let temp = TempDir::new().unwrap();
        let engine = FakeEngine {
            delay: Duration::from_millis(2500),
            ..Default::default()
        };
        let state = engine.state.clone();
        let mut orchestrator =
            BackupOrchestrator::new(policy(temp.path(), false), engine).unwrap();
        assert_eq!(orchestrator.policy().overlap, OverlapPolicy::Allow);

        orchestrator
            .schedule_backup(target(), Some("* * * * * *"))
            .unwrap();
        orchestrator.start();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        orchestrator.stop();

        assert!(state.peak.load(Ordering::SeqCst) >= 2);
    }
}
