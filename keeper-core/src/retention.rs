use crate::constants::backup;
use crate::verifier::sidecar_path;
use crate::{KeeperError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// 保留策略：超过天数或超过数量的备份都会被删除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub max_count: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: backup::DEFAULT_RETENTION_DAYS,
            max_count: backup::DEFAULT_MAX_BACKUPS,
        }
    }
}

/// 删除原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionReason {
    Expired,
    OverCount,
}

impl RetentionPolicy {
    /// 判断按时间倒序排列的第 `index` 个备份是否应被删除
    pub fn violation(&self, index: usize, age: Duration) -> Option<RetentionReason> {
        if age > Duration::days(i64::from(self.retention_days)) {
            Some(RetentionReason::Expired)
        } else if index >= self.max_count {
            Some(RetentionReason::OverCount)
        } else {
            None
        }
    }
}

/// 目录中的一个备份文件
#[derive(Debug, Clone, Serialize)]
pub struct BackupArtifact {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// 文件修改时间，备份年龄以此为准
    pub modified: DateTime<Utc>,
}

impl BackupArtifact {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.modified
    }
}

/// 单个备份的大小摘要
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub name: String,
    pub size: u64,
    pub size_mb: String,
    pub created: DateTime<Utc>,
}

/// 备份目录统计
#[derive(Debug, Clone, Serialize)]
pub struct BackupStats {
    pub count: usize,
    pub total_size: u64,
    pub total_size_mb: String,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub backups: Vec<ArtifactSummary>,
}

fn format_mb(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / BYTES_PER_MB)
}

/// 文件名是否属于备份文件（排除校验文件和日志）
pub fn is_artifact_name(name: &str) -> bool {
    let Some((_, extension)) = name.rsplit_once('.') else {
        return false;
    };

    if backup::EXCLUDED_EXTENSIONS.contains(&extension) {
        return false;
    }
    backup::ARTIFACT_EXTENSIONS.contains(&extension)
}

/// 保留策略管理器
///
/// 不维护任何索引，目录列表就是唯一的数据来源，外部工具可以随时增删文件。
#[derive(Debug, Clone)]
pub struct RetentionManager {
    backup_dir: PathBuf,
    policy: RetentionPolicy,
}

impl RetentionManager {
    pub fn new(backup_dir: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            policy,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// 列出所有备份文件，按修改时间降序（最新的在前）
    ///
    /// 目录无法读取时返回空列表。
    pub async fn list_artifacts(&self) -> Vec<BackupArtifact> {
        match self.scan().await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                error!(error = %e, "读取备份目录失败: {}", self.backup_dir.display());
                Vec::new()
            }
        }
    }

    async fn scan(&self) -> Result<Vec<BackupArtifact>> {
        let mut entries = tokio::fs::read_dir(&self.backup_dir).await?;
        let mut artifacts = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_artifact_name(&name) {
                continue;
            }

            let path = entry.path();
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("跳过无法读取的文件 {}: {}", path.display(), e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let modified = match metadata.modified() {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(e) => {
                    debug!("跳过无修改时间的文件 {}: {}", path.display(), e);
                    continue;
                }
            };

            artifacts.push(BackupArtifact {
                name,
                path,
                size: metadata.len(),
                modified,
            });
        }

        // 稳定排序，同一次扫描内相同时间戳的顺序不会变化
        artifacts.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(artifacts)
    }

    /// 执行保留策略，返回实际删除的备份数量
    pub async fn apply_retention(&self) -> usize {
        info!("执行保留策略...");

        let artifacts = self.list_artifacts().await;
        let now = Utc::now();
        let mut deleted_count = 0;

        for (index, artifact) in artifacts.iter().enumerate() {
            let Some(reason) = self.policy.violation(index, artifact.age(now)) else {
                continue;
            };

            debug!(?reason, index, "备份不符合保留策略: {}", artifact.name);
            match self.delete_artifact(&artifact.path).await {
                Ok(()) => deleted_count += 1,
                Err(e) => warn!("删除备份失败 {}: {}", artifact.path.display(), e),
            }
        }

        info!("保留策略执行完成，删除了 {} 个旧备份", deleted_count);
        deleted_count
    }

    /// 删除备份及其校验文件
    ///
    /// 文件已不存在视为成功；校验文件删除失败只记录警告。
    pub async fn delete_artifact(&self, path: &Path) -> Result<()> {
        info!("删除旧备份: {}", path.display());

        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("备份已被删除: {}", path.display());
            }
            Err(e) => {
                return Err(KeeperError::filesystem(format!(
                    "删除 {} 失败: {}",
                    path.display(),
                    e
                )));
            }
        }

        let sidecar = sidecar_path(path);
        match tokio::fs::remove_file(&sidecar).await {
            Ok(()) => debug!("已删除校验文件: {}", sidecar.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("删除校验文件失败 {}: {}", sidecar.display(), e),
        }

        Ok(())
    }

    /// 备份目录统计（只读）
    pub async fn get_stats(&self) -> BackupStats {
        let artifacts = self.list_artifacts().await;
        let total_size: u64 = artifacts.iter().map(|a| a.size).sum();

        BackupStats {
            count: artifacts.len(),
            total_size,
            total_size_mb: format_mb(total_size),
            oldest: artifacts.last().map(|a| a.modified),
            newest: artifacts.first().map(|a| a.modified),
            backups: artifacts
                .iter()
                .map(|a| ArtifactSummary {
                    name: a.name.clone(),
                    size: a.size,
                    size_mb: format_mb(a.size),
                    created: a.modified,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration as StdDuration, SystemTime};
    use tempfile::tempdir;

    const DAY: u64 = 24 * 60 * 60;

    fn write_aged(dir: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "data").unwrap();
        let mtime = SystemTime::now() - StdDuration::from_secs(age_secs);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
        path
    }

    fn manager(dir: &Path, retention_days: u32, max_count: usize) -> RetentionManager {
        RetentionManager::new(
            dir,
            RetentionPolicy {
                retention_days,
                max_count,
            },
        )
    }

    #[test]
    fn test_artifact_name_filter() {
        assert!(is_artifact_name("postgres_db_2024-01-01T02-00-00.backup"));
        assert!(is_artifact_name("mysql_db.sql"));
        assert!(is_artifact_name("mongo.dump"));
        assert!(is_artifact_name("archive.tar.gz"));
        assert!(!is_artifact_name("postgres_db.backup.sha256"));
        assert!(!is_artifact_name("combined.log"));
        assert!(!is_artifact_name("notes.txt"));
        assert!(!is_artifact_name("README"));
    }

    #[test]
    fn test_thresholds_are_ored() {
        let policy = RetentionPolicy {
            retention_days: 30,
            max_count: 5,
        };
        assert_eq!(
            policy.violation(0, Duration::days(40)),
            Some(RetentionReason::Expired)
        );
        assert_eq!(
            policy.violation(7, Duration::days(1)),
            Some(RetentionReason::OverCount)
        );
        assert_eq!(policy.violation(4, Duration::days(30)), None);
    }

    #[tokio::test]
    async fn test_list_artifacts_newest_first() {
        let dir = tempdir().unwrap();
        write_aged(dir.path(), "old.backup", 3 * DAY);
        write_aged(dir.path(), "new.sql", 60);
        write_aged(dir.path(), "mid.dump", DAY);

        let names: Vec<_> = manager(dir.path(), 30, 10)
            .list_artifacts()
            .await
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["new.sql", "mid.dump", "old.backup"]);
    }

    #[tokio::test]
    async fn test_list_excludes_sidecars_logs_and_dirs() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("backup.backup"), "data").unwrap();
        std::fs::write(dir.path().join("backup.backup.sha256"), "checksum").unwrap();
        std::fs::write(dir.path().join("error.log"), "log").unwrap();
        std::fs::create_dir(dir.path().join("nested.backup")).unwrap();

        let artifacts = manager(dir.path(), 30, 10).list_artifacts().await;
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "backup.backup");
        assert_eq!(artifacts[0].size, 4);
    }

    #[tokio::test]
    async fn test_missing_directory_yields_empty_list() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir.path().join("missing"), 30, 10);
        assert!(manager.list_artifacts().await.is_empty());
        assert_eq!(manager.apply_retention().await, 0);
    }

    #[tokio::test]
    async fn test_expired_artifact_deleted_regardless_of_count() {
        let dir = tempdir().unwrap();
        let young = write_aged(dir.path(), "a.backup", DAY);
        let recent = write_aged(dir.path(), "b.backup", 10 * DAY);
        let old = write_aged(dir.path(), "c.backup", 40 * DAY);

        let deleted = manager(dir.path(), 30, 10).apply_retention().await;
        assert_eq!(deleted, 1);
        assert!(young.exists());
        assert!(recent.exists());
        assert!(!old.exists());
    }

    #[tokio::test]
    async fn test_count_limit_deletes_oldest() {
        let dir = tempdir().unwrap();
        let paths: Vec<_> = (0..8)
            .map(|i| write_aged(dir.path(), &format!("b{i}.backup"), (i + 1) * 3600))
            .collect();

        let deleted = manager(dir.path(), 30, 5).apply_retention().await;
        assert_eq!(deleted, 3);
        for (i, path) in paths.iter().enumerate() {
            assert_eq!(path.exists(), i < 5, "{}", path.display());
        }
    }

    #[tokio::test]
    async fn test_apply_retention_is_idempotent() {
        let dir = tempdir().unwrap();
        for i in 0..7 {
            write_aged(dir.path(), &format!("b{i}.sql"), (i + 1) * 3600);
        }
        write_aged(dir.path(), "expired.sql", 90 * DAY);

        let manager = manager(dir.path(), 30, 5);
        assert_eq!(manager.apply_retention().await, 3);
        assert_eq!(manager.apply_retention().await, 0);
    }

    #[tokio::test]
    async fn test_delete_removes_sidecar() {
        let dir = tempdir().unwrap();
        let backup_path = dir.path().join("test.backup");
        std::fs::write(&backup_path, "data").unwrap();
        std::fs::write(sidecar_path(&backup_path), "checksum").unwrap();

        manager(dir.path(), 30, 10)
            .delete_artifact(&backup_path)
            .await
            .unwrap();
        assert!(!backup_path.exists());
        assert!(!sidecar_path(&backup_path).exists());
    }

    #[tokio::test]
    async fn test_delete_without_sidecar_or_file_succeeds() {
        let dir = tempdir().unwrap();
        let backup_path = dir.path().join("test.backup");
        std::fs::write(&backup_path, "data").unwrap();

        let manager = manager(dir.path(), 30, 10);
        manager.delete_artifact(&backup_path).await.unwrap();
        // 重复删除视为成功
        manager.delete_artifact(&backup_path).await.unwrap();
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = tempdir().unwrap();
        write_aged(dir.path(), "old.backup", DAY);
        write_aged(dir.path(), "new.backup", 60);

        let stats = manager(dir.path(), 30, 10).get_stats().await;
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_size, 8);
        assert_eq!(stats.total_size_mb, "0.00");
        assert!(stats.oldest < stats.newest);
        assert_eq!(stats.backups[0].name, "new.backup");
    }

    #[tokio::test]
    async fn test_stats_on_empty_directory() {
        let dir = tempdir().unwrap();
        let stats = manager(dir.path(), 30, 10).get_stats().await;
        assert_eq!(stats.count, 0);
        assert_eq!(stats.total_size, 0);
        assert!(stats.oldest.is_none());
        assert!(stats.newest.is_none());
        assert!(stats.backups.is_empty());
    }
}
